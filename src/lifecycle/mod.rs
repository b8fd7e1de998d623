//! Lifecycle management for core components

use crate::error::{CoreError, Result};
use std::any::Any;
use tracing::info;

/// Trait for components that follow a lifecycle pattern
pub trait LifecycleNode: Send + Sync {
    /// Configure the node
    fn on_configure(&mut self) -> Result<()>;

    /// Activate the node
    fn on_activate(&mut self) -> Result<()>;

    /// Deactivate the node
    fn on_deactivate(&mut self) -> Result<()>;

    /// Clean up the node
    fn on_cleanup(&mut self) -> Result<()>;

    /// Convert to Any for downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Base implementation for lifecycle nodes
#[derive(Debug)]
pub struct LifecycleNodeBase {
    pub name: String,
    state: State,
}

/// State of a lifecycle node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Inactive,
    Active,
}

impl LifecycleNodeBase {
    /// Create a new lifecycle node base
    pub fn new(name: &str) -> Self {
        LifecycleNodeBase {
            name: name.to_string(),
            state: State::Unconfigured,
        }
    }

    /// Get the current state
    pub fn get_state(&self) -> State {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Move from `from` to `to`, rejecting transitions out of any other state
    pub fn transition(&mut self, from: State, to: State) -> Result<()> {
        if self.state != from {
            return Err(CoreError::Lifecycle {
                component: self.name.clone(),
                reason: format!("cannot go {:?} -> {:?} from {:?}", from, to, self.state),
            });
        }
        info!(component = %self.name, "{:?} -> {:?}", from, to);
        self.state = to;
        Ok(())
    }

    pub fn configure(&mut self) -> Result<()> {
        self.transition(State::Unconfigured, State::Inactive)
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition(State::Inactive, State::Active)
    }

    pub fn deactivate(&mut self) -> Result<()> {
        self.transition(State::Active, State::Inactive)
    }

    pub fn cleanup(&mut self) -> Result<()> {
        self.transition(State::Inactive, State::Unconfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let mut base = LifecycleNodeBase::new("test");
        base.configure().unwrap();
        base.activate().unwrap();
        assert!(base.is_active());
        base.deactivate().unwrap();
        base.cleanup().unwrap();
        assert_eq!(base.get_state(), State::Unconfigured);
    }

    #[test]
    fn out_of_order_transition_fails() {
        let mut base = LifecycleNodeBase::new("test");
        assert!(matches!(base.activate(), Err(CoreError::Lifecycle { .. })));
        assert_eq!(base.get_state(), State::Unconfigured);
    }
}
