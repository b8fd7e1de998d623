//! Perception module: scan rasterization, panorama assembly and odometry
pub mod localization;
pub mod occupancy;
pub mod panorama;
pub mod ray_caster;
pub mod sensors;

use self::occupancy::LocalOccupancyGrid;
use self::ray_caster::{OccupancyRayCaster, RangeScan};
use self::sensors::{sensor_slot, SensorFeed, SensorSlot};
use crate::config::RayCasterConfig;
use crate::error::{CoreError, Result};
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cloneable handle turning scans into grids and obstruction updates.
///
/// Handles carry a copy of the ray caster, so reconfiguring the stack only
/// affects handles taken afterwards.
#[derive(Debug, Clone)]
pub struct ScanIngestor {
    ray_caster: OccupancyRayCaster,
    grid: Arc<SensorFeed<LocalOccupancyGrid>>,
    obstruction: Arc<watch::Sender<bool>>,
    active: Arc<AtomicBool>,
}

impl ScanIngestor {
    /// Rasterize `scan`, publish the grid and refresh the obstruction flag.
    ///
    /// Returns the new flag, or `None` while the stack is not active.
    pub fn ingest_scan(&self, scan: &RangeScan) -> Option<bool> {
        if !self.active.load(Ordering::Acquire) {
            debug!("perception stack inactive, dropping scan");
            return None;
        }
        let grid = self.ray_caster.cast(scan);
        let obstructed = self.ray_caster.is_forward_obstructed(&grid);
        self.grid.publish(grid);

        let changed = self.obstruction.send_if_modified(|flag| {
            let changed = *flag != obstructed;
            *flag = obstructed;
            changed
        });
        if changed && obstructed {
            warn!("Forward path obstructed");
        } else if changed {
            info!("Forward path clear");
        }
        Some(obstructed)
    }
}

/// Perception stack for the robot
#[derive(Debug)]
pub struct PerceptionStack {
    base: LifecycleNodeBase,
    ingestor: ScanIngestor,
}

impl PerceptionStack {
    /// Create a new perception stack
    pub fn new(config: RayCasterConfig) -> Result<Self> {
        let (feed, _) = sensor_slot("occupancy");
        let (obstruction, _) = watch::channel(false);
        Ok(PerceptionStack {
            base: LifecycleNodeBase::new("perception_stack"),
            ingestor: ScanIngestor {
                ray_caster: OccupancyRayCaster::new(config)?,
                grid: Arc::new(feed),
                obstruction: Arc::new(obstruction),
                active: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn state(&self) -> State {
        self.base.get_state()
    }

    /// Configure the ray caster. Only allowed while the stack is not active.
    pub fn configure_ray_caster(&mut self, params: &HashMap<String, f64>) -> Result<()> {
        if self.base.is_active() {
            return Err(CoreError::Lifecycle {
                component: self.base.name.clone(),
                reason: "deactivate before reconfiguring".into(),
            });
        }
        self.ingestor.ray_caster.configure(params)
    }

    pub fn ray_caster(&self) -> &OccupancyRayCaster {
        &self.ingestor.ray_caster
    }

    /// See [`ScanIngestor::ingest_scan`]
    pub fn ingest_scan(&self, scan: &RangeScan) -> Option<bool> {
        self.ingestor.ingest_scan(scan)
    }

    /// Handle for a scan driver task
    pub fn scan_ingestor(&self) -> ScanIngestor {
        self.ingestor.clone()
    }

    /// Slot receiving every grid published after this call
    pub fn occupancy_slot(&self) -> SensorSlot<LocalOccupancyGrid> {
        self.ingestor.grid.subscribe()
    }

    /// Receiver of the forward-obstruction flag
    pub fn subscribe_obstruction(&self) -> watch::Receiver<bool> {
        self.ingestor.obstruction.subscribe()
    }
}

impl LifecycleNode for PerceptionStack {
    fn on_configure(&mut self) -> Result<()> {
        info!("Configuring perception stack");
        self.base.configure()
    }

    fn on_activate(&mut self) -> Result<()> {
        info!("Activating perception stack");
        self.base.activate()?;
        self.ingestor.active.store(true, Ordering::Release);
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<()> {
        info!("Deactivating perception stack");
        self.base.deactivate()?;
        self.ingestor.active.store(false, Ordering::Release);
        Ok(())
    }

    fn on_cleanup(&mut self) -> Result<()> {
        info!("Cleaning up perception stack");
        self.base.cleanup()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
