//! Navigation module: path tracking toward externally planned paths
pub mod path_follower;

use self::path_follower::{PathFollower, PathTracker};
use crate::common::types::{GovernedCommand, Point2D, VehiclePose};
use crate::config::TrackerConfig;
use crate::control::governor::KinematicLimits;
use crate::error::Result;
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Navigation stack for the robot
#[derive(Debug)]
pub struct NavigationStack {
    base: LifecycleNodeBase,
    path_follower: Box<dyn PathFollower>,
}

impl NavigationStack {
    /// Create a new navigation stack tracking with pure pursuit
    pub fn new(config: TrackerConfig, limits: KinematicLimits) -> Result<Self> {
        Ok(Self::with_path_follower(PathTracker::new(config, limits)?))
    }

    /// Create a new navigation stack with a specific path follower
    pub fn with_path_follower<T: PathFollower + 'static>(path_follower: T) -> Self {
        NavigationStack {
            base: LifecycleNodeBase::new("navigation_stack"),
            path_follower: Box::new(path_follower),
        }
    }

    /// Retune the path follower. Controller memory is kept.
    pub fn configure_path_follower(&mut self, params: &HashMap<String, f64>) -> Result<()> {
        self.path_follower.configure(params)
    }

    /// Get the name of the current path follower
    pub fn path_follower_name(&self) -> &str {
        self.path_follower.name()
    }

    pub fn state(&self) -> State {
        self.base.get_state()
    }

    /// Replace the current path; controller memory restarts with it
    pub fn set_path(&mut self, path: Vec<Point2D>) {
        info!("Setting path with {} points", path.len());
        self.path_follower.set_path(path);
        self.path_follower.reset();
    }

    /// Waypoints not yet reached
    pub fn remaining_path(&self) -> &[Point2D] {
        self.path_follower.path()
    }

    /// Forget controller memory, e.g. after the robot was stopped for a while
    pub fn reset_controller(&mut self) {
        self.path_follower.reset();
    }

    /// Compute velocity command for the current pose.
    ///
    /// Returns `None` while the stack is not active.
    pub fn compute_velocity_command(
        &mut self,
        pose: VehiclePose,
        now: Instant,
    ) -> Option<GovernedCommand> {
        if !self.base.is_active() {
            debug!("navigation stack inactive, no command");
            return None;
        }
        Some(self.path_follower.compute_command_at(pose, now))
    }
}

impl LifecycleNode for NavigationStack {
    fn on_configure(&mut self) -> Result<()> {
        info!("Configuring navigation stack");
        self.base.configure()
    }

    fn on_activate(&mut self) -> Result<()> {
        info!("Activating navigation stack");
        self.path_follower.reset();
        self.base.activate()
    }

    fn on_deactivate(&mut self) -> Result<()> {
        info!("Deactivating navigation stack");
        self.base.deactivate()
    }

    fn on_cleanup(&mut self) -> Result<()> {
        info!("Cleaning up navigation stack");
        self.path_follower.set_path(Vec::new());
        self.base.cleanup()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_stack() -> NavigationStack {
        let mut stack = NavigationStack::new(
            TrackerConfig::default(),
            KinematicLimits::forward_only(0.5, 1.0),
        )
        .unwrap();
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();
        stack
    }

    #[test]
    fn inactive_stack_yields_no_command() {
        let mut stack =
            NavigationStack::new(TrackerConfig::default(), KinematicLimits::symmetric(0.5, 1.0))
                .unwrap();
        stack.set_path(vec![(1.0, 0.0)]);
        assert!(stack
            .compute_velocity_command(VehiclePose::default(), Instant::now())
            .is_none());
    }

    #[test]
    fn tracks_a_straight_path() {
        let mut stack = active_stack();
        stack.set_path(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        let out = stack
            .compute_velocity_command(VehiclePose::new(0.0, 0.0, 0.0), Instant::now())
            .unwrap();
        assert!(out.command.angular.abs() < 1e-9);
        assert!((out.command.forward - 0.03).abs() < 1e-9);
        // (0, 0) was within reach and got pruned.
        assert_eq!(stack.remaining_path(), &[(1.0, 0.0), (2.0, 0.0)]);
    }

    #[test]
    fn cleanup_forgets_the_path() {
        let mut stack = active_stack();
        stack.set_path(vec![(1.0, 0.0)]);
        stack.on_deactivate().unwrap();
        stack.on_cleanup().unwrap();
        assert!(stack.remaining_path().is_empty());
        assert_eq!(stack.path_follower_name(), "PurePursuitTracker");
    }

    #[test]
    fn retuning_keeps_the_path() {
        let mut stack = active_stack();
        stack.set_path(vec![(1.0, 0.0), (2.0, 0.0)]);
        let params = HashMap::from([("base_speed".to_string(), 0.05)]);
        stack.configure_path_follower(&params).unwrap();
        assert_eq!(stack.remaining_path().len(), 2);

        let out = stack
            .compute_velocity_command(VehiclePose::default(), Instant::now())
            .unwrap();
        assert!((out.command.forward - 0.06).abs() < 1e-9);

        let params = HashMap::from([("lookahead_growth".to_string(), 0.5)]);
        assert!(stack.configure_path_follower(&params).is_err());
    }
}
