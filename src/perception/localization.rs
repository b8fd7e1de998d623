//! Odometry localizer
//!
//! The base's odometry cannot be reset reliably, so the first pose ever
//! received becomes the origin and every later pose is expressed relative
//! to it.

use crate::common::types::VehiclePose;
use crate::common::wrap_angle;
use nalgebra::{Isometry2, Quaternion, UnitQuaternion, Vector2};
use tracing::{debug, info};

/// Yaw (rotation about +z) of an orientation quaternion
pub fn yaw_from_quaternion(x: f64, y: f64, z: f64, w: f64) -> f64 {
    let q = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
    let (_, _, yaw) = q.euler_angles();
    yaw
}

/// Origin-fixing localizer for raw odometry poses
#[derive(Debug, Default)]
pub struct OdometryLocalizer {
    origin: Option<Isometry2<f64>>,
    pose: Option<VehiclePose>,
}

impl OdometryLocalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw odometry pose and return it relative to the origin
    pub fn update(&mut self, raw: VehiclePose) -> VehiclePose {
        let current = Isometry2::new(Vector2::new(raw.x, raw.y), raw.heading);
        let origin = *self.origin.get_or_insert_with(|| {
            info!(x = raw.x, y = raw.y, heading = raw.heading, "fixing odometry origin");
            current
        });

        let relative = origin.inverse() * current;
        let pose = VehiclePose::new(
            relative.translation.vector.x,
            relative.translation.vector.y,
            wrap_angle(relative.rotation.angle()),
        );
        debug!(x = pose.x, y = pose.y, heading = pose.heading, "odometry pose");
        self.pose = Some(pose);
        pose
    }

    /// Most recent relative pose, if any odometry has arrived
    pub fn pose(&self) -> Option<VehiclePose> {
        self.pose
    }

    pub fn has_origin(&self) -> bool {
        self.origin.is_some()
    }
}
