//! Typed configuration for the core, loadable from TOML
//!
//! Every section has defaults matching the reference robot, so an empty file
//! (or no file at all) yields a working configuration.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub ray_caster: RayCasterConfig,
    pub panorama: PanoramaConfig,
    pub tracker: TrackerConfig,
    pub limits: LimitsConfig,
    pub node: NodeConfig,
}

/// Local occupancy grid parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayCasterConfig {
    /// Cells per grid side
    pub grid_size: usize,
    /// Meters per cell
    pub resolution: f64,
    /// Yaw of the scanner relative to the robot forward axis (radians)
    pub mount_yaw: f64,
    /// Forward window mean at or below which the path ahead is obstructed
    pub obstruction_threshold: f64,
}

impl Default for RayCasterConfig {
    fn default() -> Self {
        RayCasterConfig {
            grid_size: 128,
            resolution: 0.01,
            mount_yaw: 0.0,
            obstruction_threshold: 0.75,
        }
    }
}

impl RayCasterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size < 3 {
            return Err(CoreError::invalid("grid_size", "must be at least 3 cells"));
        }
        if !(self.resolution > 0.0) {
            return Err(CoreError::invalid("resolution", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.obstruction_threshold) {
            return Err(CoreError::invalid(
                "obstruction_threshold",
                "must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Panorama assembly parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanoramaConfig {
    /// Occupied fraction above which a blind corner block is filled
    pub corner_occupancy_threshold: f64,
    /// Interval between stall warnings while waiting on a capture
    pub poll_interval_ms: u64,
    /// Give up on a capture after this long
    pub capture_timeout_ms: u64,
    /// Resize RGB captures to this shape before stitching
    pub rgb_height: Option<usize>,
    pub rgb_width: Option<usize>,
}

impl Default for PanoramaConfig {
    fn default() -> Self {
        PanoramaConfig {
            corner_occupancy_threshold: 0.1,
            poll_interval_ms: 500,
            capture_timeout_ms: 10_000,
            rgb_height: None,
            rgb_width: None,
        }
    }
}

impl PanoramaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.corner_occupancy_threshold) {
            return Err(CoreError::invalid(
                "corner_occupancy_threshold",
                "must lie in [0, 1]",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(CoreError::invalid("poll_interval_ms", "must be positive"));
        }
        if self.capture_timeout_ms < self.poll_interval_ms {
            return Err(CoreError::invalid(
                "capture_timeout_ms",
                "must not be shorter than the poll interval",
            ));
        }
        if self.rgb_height.is_some() != self.rgb_width.is_some() {
            return Err(CoreError::invalid(
                "rgb_height",
                "rgb_height and rgb_width must be set together",
            ));
        }
        if self.rgb_height == Some(0) || self.rgb_width == Some(0) {
            return Err(CoreError::invalid("rgb_height", "resize shape must be non-zero"));
        }
        Ok(())
    }
}

/// Pure pursuit and PID parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub lookahead_initial: f64,
    pub lookahead_max: f64,
    pub lookahead_growth: f64,
    /// Waypoints closer than this are considered reached and pruned
    pub waypoint_reached_radius: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub base_speed: f64,
    pub min_speed: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            lookahead_initial: 0.2,
            lookahead_max: 2.0,
            lookahead_growth: 1.25,
            waypoint_reached_radius: 0.15,
            kp: 0.5,
            ki: 0.0,
            kd: 0.0,
            base_speed: 0.02,
            min_speed: 0.01,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.lookahead_initial > 0.0) {
            return Err(CoreError::invalid("lookahead_initial", "must be positive"));
        }
        if self.lookahead_max < self.lookahead_initial {
            return Err(CoreError::invalid(
                "lookahead_max",
                "must not be smaller than lookahead_initial",
            ));
        }
        if !(self.lookahead_growth > 1.0) {
            return Err(CoreError::invalid("lookahead_growth", "must be greater than 1"));
        }
        if self.waypoint_reached_radius < 0.0 {
            return Err(CoreError::invalid(
                "waypoint_reached_radius",
                "must be non-negative",
            ));
        }
        if self.base_speed < 0.0 || self.min_speed < 0.0 {
            return Err(CoreError::invalid("base_speed", "speeds must be non-negative"));
        }
        Ok(())
    }
}

/// Kinematic limits applied to every outgoing command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_forward: f64,
    pub max_angular: f64,
    /// Permit negative forward velocity
    pub allow_reverse: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_forward: 0.5,
            max_angular: 1.0,
            allow_reverse: false,
        }
    }
}

/// Control loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Control tick period in seconds
    pub dt: f64,
    /// Capacity of the inbound event queue
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            dt: 0.1,
            event_capacity: 32,
        }
    }
}

impl NodeConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.dt)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.dt > 0.0) || !self.dt.is_finite() {
            return Err(CoreError::invalid("dt", "must be a positive number of seconds"));
        }
        if self.event_capacity == 0 {
            return Err(CoreError::invalid("event_capacity", "must be positive"));
        }
        Ok(())
    }
}

impl CoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config from a file. Returns `None` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| CoreError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw).map(Some)
    }

    pub fn validate(&self) -> Result<()> {
        self.ray_caster.validate()?;
        self.panorama.validate()?;
        self.tracker.validate()?;
        self.node.validate()?;
        if !(self.limits.max_forward >= 0.0) || !(self.limits.max_angular >= 0.0) {
            return Err(CoreError::invalid("limits", "limits must be non-negative"));
        }
        Ok(())
    }
}
