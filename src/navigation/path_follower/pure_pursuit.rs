//! Pure pursuit path tracker with a PID heading loop
//!
//! Each call prunes reached waypoints, searches for a lookahead point on the
//! remaining polyline with a growing circle, steers toward it with a PID on
//! heading error and slows down sharply as the heading error grows.

use super::PathFollower;
use crate::common::types::{ControlCommand, GovernedCommand, Point2D, VehiclePose};
use crate::common::wrap_angle;
use crate::control::governor::{CommandGovernor, KinematicLimits};
use crate::config::TrackerConfig;
use crate::error::{CoreError, Result};
use nalgebra::Vector2;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::Instant;
use tracing::{debug, warn};

/// Exponent shaping the forward speed falloff with heading error
const SPEED_FALLOFF_EXPONENT: i32 = 12;

/// PID memory carried between ticks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub integral: f64,
    pub previous_error: f64,
    pub last_update: Option<Instant>,
}

/// Intersection of the circle (`center`, `radius`) with the segment
/// `start`-`end`, as the point at the lower valid segment parameter.
pub fn circle_segment_intersection(
    center: Point2D,
    radius: f64,
    start: Point2D,
    end: Point2D,
) -> Option<Point2D> {
    let diff = Vector2::new(end.0 - start.0, end.1 - start.1);
    let offset = Vector2::new(start.0 - center.0, start.1 - center.1);

    let a = diff.norm_squared();
    if a == 0.0 {
        return None;
    }
    let b = 2.0 * offset.dot(&diff);
    let c = offset.norm_squared() - radius * radius;

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    let t = [(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
        .into_iter()
        .find(|t| (0.0..=1.0).contains(t))?;

    Some((start.0 + t * diff.x, start.1 + t * diff.y))
}

/// Pure pursuit + PID controller over a monotonically consumed path
#[derive(Debug)]
pub struct PathTracker {
    config: TrackerConfig,
    governor: CommandGovernor,
    path: Vec<Point2D>,
    state: ControllerState,
}

impl PathTracker {
    pub fn new(config: TrackerConfig, limits: KinematicLimits) -> Result<Self> {
        config.validate()?;
        Ok(PathTracker {
            config,
            governor: CommandGovernor::new(limits),
            path: Vec::new(),
            state: ControllerState::default(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Drop every waypoint up to and including the first one within reach
    /// of `pose`. Returns how many were removed.
    pub fn prune(&mut self, pose: &VehiclePose) -> usize {
        let reached = self
            .path
            .iter()
            .position(|&p| pose.distance_to(p) < self.config.waypoint_reached_radius);
        match reached {
            Some(index) => {
                self.path.drain(..=index);
                index + 1
            }
            None => 0,
        }
    }

    /// Point where a circle of `radius` around `pose` crosses the path.
    ///
    /// Every segment is checked and the last one with a valid crossing wins.
    pub fn intersect_path(&self, pose: &VehiclePose, radius: f64) -> Option<Point2D> {
        if let [only] = self.path.as_slice() {
            return Some(*only);
        }
        let center = (pose.x, pose.y);
        self.path
            .windows(2)
            .filter_map(|seg| circle_segment_intersection(center, radius, seg[0], seg[1]))
            .last()
    }

    /// Lookahead point for `pose`, growing the search radius until the path
    /// is found and falling back to the first remaining waypoint.
    pub fn lookahead_point(&self, pose: &VehiclePose) -> Option<Point2D> {
        let first = *self.path.first()?;
        let mut radius = self.config.lookahead_initial;
        while radius <= self.config.lookahead_max {
            if let Some(point) = self.intersect_path(pose, radius) {
                return Some(point);
            }
            radius *= self.config.lookahead_growth;
        }
        debug!("no path intersection within {:.2} m, targeting first waypoint", self.config.lookahead_max);
        Some(first)
    }

    fn pid(&mut self, error: f64, now: Instant) -> f64 {
        let dt = match self.state.last_update {
            Some(last) => now.saturating_duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        self.state.integral += error * dt;

        let derivative = if dt > 0.0 {
            self.config.kd * (error - self.state.previous_error) / dt
        } else {
            0.0
        };
        let output = self.config.kp * error + self.config.ki * self.state.integral + derivative;

        self.state.previous_error = error;
        self.state.last_update = Some(now);
        output
    }

    fn forward_speed(&self, error: f64) -> f64 {
        self.config.base_speed * (1.0 - error.abs() / PI).powi(SPEED_FALLOFF_EXPONENT)
            + self.config.min_speed
    }
}

impl PathFollower for PathTracker {
    fn set_path(&mut self, path: Vec<Point2D>) {
        debug!("Setting path with {} points", path.len());
        self.path = path;
    }

    fn path(&self) -> &[Point2D] {
        &self.path
    }

    fn reset(&mut self) {
        self.state = ControllerState::default();
    }

    fn compute_command_at(&mut self, pose: VehiclePose, now: Instant) -> GovernedCommand {
        self.prune(&pose);

        let target = match self.lookahead_point(&pose) {
            Some(point) => point,
            None => {
                warn!("No path to follow, commanding zero velocity");
                return GovernedCommand {
                    command: ControlCommand::zero(),
                    clamped: false,
                };
            }
        };

        let bearing = (target.1 - pose.y).atan2(target.0 - pose.x);
        let heading_error = wrap_angle(bearing - pose.heading);

        let angular = self.pid(heading_error, now);
        let forward = self.forward_speed(heading_error);
        debug!(
            target_x = target.0,
            target_y = target.1,
            heading_error,
            forward,
            angular,
            "pure pursuit output"
        );

        self.governor.govern(ControlCommand::new(forward, angular))
    }

    fn name(&self) -> &str {
        "PurePursuitTracker"
    }

    fn configure(&mut self, params: &HashMap<String, f64>) -> Result<()> {
        let mut config = self.config.clone();
        for (key, &value) in params {
            match key.as_str() {
                "lookahead_initial" => config.lookahead_initial = value,
                "lookahead_max" => config.lookahead_max = value,
                "lookahead_growth" => config.lookahead_growth = value,
                "waypoint_reached_radius" => config.waypoint_reached_radius = value,
                "kp" => config.kp = value,
                "ki" => config.ki = value,
                "kd" => config.kd = value,
                "base_speed" => config.base_speed = value,
                "min_speed" => config.min_speed = value,
                other => return Err(CoreError::invalid(other, "unknown tracker parameter")),
            }
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }
}
