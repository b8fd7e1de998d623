//! Kinematic limits for outgoing velocity commands

use crate::common::types::{ControlCommand, GovernedCommand};
use crate::config::LimitsConfig;
use tracing::warn;

/// Clamp `value` into `[min, max]`
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Allowed velocity ranges of the base
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicLimits {
    pub min_forward: f64,
    pub max_forward: f64,
    pub min_angular: f64,
    pub max_angular: f64,
}

impl KinematicLimits {
    /// Forward in `[-max_forward, max_forward]`, angular in `[-max_angular, max_angular]`
    pub fn symmetric(max_forward: f64, max_angular: f64) -> Self {
        KinematicLimits {
            min_forward: -max_forward,
            max_forward,
            min_angular: -max_angular,
            max_angular,
        }
    }

    /// Like [`KinematicLimits::symmetric`] but never drives in reverse
    pub fn forward_only(max_forward: f64, max_angular: f64) -> Self {
        KinematicLimits {
            min_forward: 0.0,
            ..Self::symmetric(max_forward, max_angular)
        }
    }
}

impl From<&LimitsConfig> for KinematicLimits {
    fn from(config: &LimitsConfig) -> Self {
        if config.allow_reverse {
            KinematicLimits::symmetric(config.max_forward, config.max_angular)
        } else {
            KinematicLimits::forward_only(config.max_forward, config.max_angular)
        }
    }
}

/// Clamps every command to the kinematic limits
#[derive(Debug, Clone)]
pub struct CommandGovernor {
    limits: KinematicLimits,
}

impl CommandGovernor {
    pub fn new(limits: KinematicLimits) -> Self {
        CommandGovernor { limits }
    }

    pub fn limits(&self) -> KinematicLimits {
        self.limits
    }

    /// Clamp a command, flagging and logging whenever it changed
    pub fn govern(&self, command: ControlCommand) -> GovernedCommand {
        let limited = ControlCommand {
            forward: clamp(command.forward, self.limits.min_forward, self.limits.max_forward),
            angular: clamp(command.angular, self.limits.min_angular, self.limits.max_angular),
        };
        let clamped = limited != command;
        if clamped {
            warn!(
                "Clamped command from ({:.2}, {:.2}) to ({:.2}, {:.2})",
                command.forward, command.angular, limited.forward, limited.angular
            );
        }
        GovernedCommand {
            command: limited,
            clamped,
        }
    }
}
