//! Path following

use crate::common::types::{GovernedCommand, Point2D, VehiclePose};
use crate::error::Result;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Instant;

/// Trait for path following algorithms
pub trait PathFollower: Debug + Send + Sync {
    /// Replace the path to follow (replanning)
    fn set_path(&mut self, path: Vec<Point2D>);

    /// Waypoints not yet reached
    fn path(&self) -> &[Point2D];

    /// Forget controller memory so the next tick behaves like the first
    fn reset(&mut self);

    /// Compute a clamped velocity command for `pose` at time `now`
    fn compute_command_at(&mut self, pose: VehiclePose, now: Instant) -> GovernedCommand;

    /// Compute a clamped velocity command for `pose` using the wall clock
    fn compute_command(&mut self, pose: VehiclePose) -> GovernedCommand {
        self.compute_command_at(pose, Instant::now())
    }

    /// Get the name of this path follower
    fn name(&self) -> &str;

    /// Configure the path follower with parameters
    fn configure(&mut self, params: &HashMap<String, f64>) -> Result<()>;
}

pub mod pure_pursuit;

pub use pure_pursuit::PathTracker;
