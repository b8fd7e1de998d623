pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod navigation;
pub mod node;
pub mod perception;
pub mod telemetry;

use crate::error::Result;
use crate::lifecycle::LifecycleNode;
use tracing::info;

/// Registry driving the lifecycle of the core's stacks
#[derive(Default)]
pub struct CmnCore {
    components: Vec<Box<dyn LifecycleNode>>,
}

impl CmnCore {
    /// Create a new, empty core
    pub fn new() -> Self {
        CmnCore {
            components: Vec::new(),
        }
    }

    /// Register a component with the core
    pub fn register<T: LifecycleNode + 'static>(&mut self, component: T) {
        self.components.push(Box::new(component));
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Configure then activate all registered components, in registration order
    pub fn init(&mut self) -> Result<()> {
        info!("Initializing {} components", self.components.len());
        for component in &mut self.components {
            component.on_configure()?;
            component.on_activate()?;
        }
        Ok(())
    }

    /// Deactivate then clean up all registered components, in reverse order
    pub fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down {} components", self.components.len());
        for component in self.components.iter_mut().rev() {
            component.on_deactivate()?;
            component.on_cleanup()?;
        }
        Ok(())
    }

    /// Get the first registered component of type `T`
    pub fn component_mut<T: LifecycleNode + 'static>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|component| component.as_any_mut().downcast_mut::<T>())
    }
}
