//! Control module: the last stop before actuation
pub mod governor;

use self::governor::{CommandGovernor, KinematicLimits};
use crate::common::types::{ControlCommand, GovernedCommand};
use crate::error::Result;
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use std::any::Any;
use tracing::{info, warn};

/// Control stack for the robot
#[derive(Debug)]
pub struct ControlStack {
    base: LifecycleNodeBase,
    governor: CommandGovernor,
}

impl ControlStack {
    /// Create a new control stack
    pub fn new(limits: KinematicLimits) -> Self {
        ControlStack {
            base: LifecycleNodeBase::new("control_stack"),
            governor: CommandGovernor::new(limits),
        }
    }

    pub fn state(&self) -> State {
        self.base.get_state()
    }

    pub fn limits(&self) -> KinematicLimits {
        self.governor.limits()
    }

    /// Clamp a command for actuation. An inactive stack only lets a stop
    /// command through.
    pub fn govern(&self, command: ControlCommand) -> GovernedCommand {
        if !self.base.is_active() {
            if command != ControlCommand::zero() {
                warn!("Control stack inactive, replacing command with a stop");
            }
            return GovernedCommand {
                command: ControlCommand::zero(),
                clamped: command != ControlCommand::zero(),
            };
        }
        self.governor.govern(command)
    }
}

impl LifecycleNode for ControlStack {
    fn on_configure(&mut self) -> Result<()> {
        info!("Configuring control stack");
        self.base.configure()
    }

    fn on_activate(&mut self) -> Result<()> {
        info!("Activating control stack");
        self.base.activate()
    }

    fn on_deactivate(&mut self) -> Result<()> {
        info!("Deactivating control stack");
        self.base.deactivate()
    }

    fn on_cleanup(&mut self) -> Result<()> {
        info!("Cleaning up control stack");
        self.base.cleanup()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
