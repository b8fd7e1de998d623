//! Common utilities and types shared across the core

use std::f64::consts::{PI, TAU};

/// Common types used across the codebase
pub mod types {
    /// A metric 2D point (x, y) in meters
    pub type Point2D = (f64, f64);

    /// Ordered sequence of metric waypoints
    pub type Path = Vec<Point2D>;

    /// Planar vehicle pose, relative to the first pose ever observed
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct VehiclePose {
        pub x: f64,
        pub y: f64,
        /// Heading in radians, counter-clockwise from +x
        pub heading: f64,
    }

    impl VehiclePose {
        pub fn new(x: f64, y: f64, heading: f64) -> Self {
            VehiclePose { x, y, heading }
        }

        /// Euclidean distance from this pose to a point
        pub fn distance_to(&self, point: Point2D) -> f64 {
            ((point.0 - self.x).powi(2) + (point.1 - self.y).powi(2)).sqrt()
        }
    }

    /// Velocity command for the mobile base
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct ControlCommand {
        /// Forward velocity in m/s
        pub forward: f64,
        /// Angular velocity in rad/s
        pub angular: f64,
    }

    impl ControlCommand {
        pub fn new(forward: f64, angular: f64) -> Self {
            ControlCommand { forward, angular }
        }

        pub fn zero() -> Self {
            ControlCommand::default()
        }
    }

    /// A command after it passed through the governor
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct GovernedCommand {
        pub command: ControlCommand,
        /// True when clamping altered at least one component
        pub clamped: bool,
    }
}

/// Wrap an angle into (-pi, pi]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::types::VehiclePose;
    use super::*;

    #[test]
    fn wrap_angle_keeps_pi_positive() {
        assert!((wrap_angle(PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-12);
    }

    #[test]
    fn wrap_angle_folds_large_values() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_angle(-5.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_angle(0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn pose_distance() {
        let pose = VehiclePose::new(1.0, 1.0, 0.0);
        assert!((pose.distance_to((4.0, 5.0)) - 5.0).abs() < 1e-12);
    }
}
