//! Navigation node: the single task that owns tracking, panoramas and actuation
//!
//! Odometry, paths and panorama requests arrive as [`NodeEvent`]s on a
//! bounded queue and are handled one at a time, interleaved with the
//! periodic control tick. A change of the forward-obstruction flag is handled
//! as soon as it is published, without waiting for the next tick. Shutdown is
//! honoured between events and ticks.
//!
//! Every tick publishes one command. Without odometry or a path to follow
//! that command is a stop.

use crate::common::types::{ControlCommand, Point2D, VehiclePose};
use crate::config::{CoreConfig, NodeConfig};
use crate::control::governor::KinematicLimits;
use crate::control::ControlStack;
use crate::error::{CoreError, Result};
use crate::navigation::NavigationStack;
use crate::perception::localization::{yaw_from_quaternion, OdometryLocalizer};
use crate::perception::panorama::{PanoramicBundle, PanoramicObservationAssembler, PivotActuator};
use crate::CmnCore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Inputs of the navigation node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Raw odometry pose; the first one received becomes the origin
    Odometry(VehiclePose),
    /// Raw odometry as reported by the base: planar position and an
    /// `[x, y, z, w]` orientation quaternion
    OdometryQuaternion { x: f64, y: f64, orientation: [f64; 4] },
    /// Replacement path in the odometry frame
    Path(Vec<Point2D>),
    /// Stop and run one panoramic observation cycle
    RequestPanorama,
    /// Retune the path tracker; rejected parameter sets leave it unchanged
    TuneTracker(HashMap<String, f64>),
}

/// Velocity command output of the node
#[async_trait]
pub trait CommandSink: Send {
    async fn publish(&mut self, command: ControlCommand) -> Result<()>;
}

/// Cloneable handle for feeding and stopping a running node
#[derive(Debug, Clone)]
pub struct NodeHandle {
    events: mpsc::Sender<NodeEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl NodeHandle {
    /// Queue an event, waiting while the queue is full
    pub async fn send(&self, event: NodeEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| CoreError::ChannelClosed("node events"))
    }

    /// Queue an event without waiting. Returns `false` if the queue is full
    /// and the event was dropped.
    pub fn try_send(&self, event: NodeEvent) -> Result<bool> {
        match self.events.try_send(event) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(CoreError::ChannelClosed("node events"))
            }
        }
    }

    /// Ask the node to stop after the event or tick in progress
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Single-consumer control loop around the navigation and control stacks
pub struct NavigationNode {
    config: NodeConfig,
    core: CmnCore,
    localizer: OdometryLocalizer,
    assembler: PanoramicObservationAssembler,
    pivot: Box<dyn PivotActuator>,
    sink: Box<dyn CommandSink>,
    obstruction: watch::Receiver<bool>,
    events: mpsc::Receiver<NodeEvent>,
    bundles: mpsc::Sender<PanoramicBundle>,
    shutdown: watch::Receiver<bool>,
    obstructed: bool,
    last_command: ControlCommand,
    idle: bool,
}

impl NavigationNode {
    /// Build a node and the channels to talk to it.
    ///
    /// Completed panoramas are delivered on the returned receiver.
    pub fn new(
        config: &CoreConfig,
        assembler: PanoramicObservationAssembler,
        obstruction: watch::Receiver<bool>,
        pivot: Box<dyn PivotActuator>,
        sink: Box<dyn CommandSink>,
    ) -> Result<(Self, NodeHandle, mpsc::Receiver<PanoramicBundle>)> {
        config.validate()?;
        let limits = KinematicLimits::from(&config.limits);

        let mut core = CmnCore::new();
        core.register(NavigationStack::new(config.tracker.clone(), limits)?);
        core.register(ControlStack::new(limits));

        let (event_tx, event_rx) = mpsc::channel(config.node.event_capacity);
        let (bundle_tx, bundle_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = NavigationNode {
            config: config.node.clone(),
            core,
            localizer: OdometryLocalizer::new(),
            assembler,
            pivot,
            sink,
            obstruction,
            events: event_rx,
            bundles: bundle_tx,
            shutdown: shutdown_rx,
            obstructed: false,
            last_command: ControlCommand::zero(),
            idle: true,
        };
        let handle = NodeHandle {
            events: event_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        Ok((node, handle, bundle_rx))
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        self.core.init()?;
        info!(period = ?self.config.period(), "Navigation node running");

        let mut ticker = tokio::time::interval(self.config.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.obstructed = *self.obstruction.borrow_and_update();
        let mut obstruction_live = true;

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                changed = self.obstruction.changed(), if obstruction_live => {
                    match changed {
                        Ok(()) => {
                            let obstructed = *self.obstruction.borrow_and_update();
                            self.on_obstruction(obstructed).await;
                        }
                        Err(_) => {
                            warn!("Obstruction feed closed, keeping last state");
                            obstruction_live = false;
                        }
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("Navigation node stopping");
        self.actuate(ControlCommand::zero()).await;
        self.core.shutdown()
    }

    fn navigation(&mut self) -> Result<&mut NavigationStack> {
        self.core
            .component_mut::<NavigationStack>()
            .ok_or_else(|| not_registered("navigation_stack"))
    }

    fn control(&mut self) -> Result<&mut ControlStack> {
        self.core
            .component_mut::<ControlStack>()
            .ok_or_else(|| not_registered("control_stack"))
    }

    async fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Odometry(raw) => {
                self.localizer.update(raw);
            }
            NodeEvent::OdometryQuaternion { x, y, orientation } => {
                let [qx, qy, qz, qw] = orientation;
                let heading = yaw_from_quaternion(qx, qy, qz, qw);
                self.localizer.update(VehiclePose::new(x, y, heading));
            }
            NodeEvent::Path(path) => {
                if let Err(e) = self.navigation().map(|navigation| navigation.set_path(path)) {
                    error!("Dropping path: {}", e);
                    return;
                }
                self.idle = false;
            }
            NodeEvent::RequestPanorama => self.run_panorama().await,
            NodeEvent::TuneTracker(params) => {
                match self
                    .navigation()
                    .and_then(|navigation| navigation.configure_path_follower(&params))
                {
                    Ok(()) => info!("Tracker retuned with {} parameters", params.len()),
                    Err(e) => warn!("Rejected tracker parameters: {}", e),
                }
            }
        }
    }

    async fn on_obstruction(&mut self, obstructed: bool) {
        if obstructed == self.obstructed {
            return;
        }
        self.obstructed = obstructed;
        if obstructed && self.last_command.forward > 0.0 {
            warn!("Obstruction ahead, stopping forward motion");
            let command = ControlCommand {
                forward: 0.0,
                ..self.last_command
            };
            self.actuate(command).await;
        }
    }

    async fn tick(&mut self) {
        let Some(pose) = self.localizer.pose() else {
            debug!("No odometry yet, holding still");
            self.actuate(ControlCommand::zero()).await;
            return;
        };
        let navigation = match self.navigation() {
            Ok(navigation) => navigation,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };
        if navigation.remaining_path().is_empty() {
            if !self.idle {
                warn!("Path complete, stopping");
                self.idle = true;
            }
            self.actuate(ControlCommand::zero()).await;
            return;
        }

        let Some(governed) = navigation.compute_velocity_command(pose, Instant::now()) else {
            return;
        };
        let mut command = governed.command;
        if self.obstructed && command.forward > 0.0 {
            debug!("Forward motion suppressed by obstruction");
            command.forward = 0.0;
        }
        self.actuate(command).await;
    }

    async fn run_panorama(&mut self) {
        self.actuate(ControlCommand::zero()).await;
        let started = Instant::now();
        match self.assembler.assemble(self.pivot.as_mut()).await {
            Ok(bundle) => {
                info!(elapsed = ?started.elapsed(), "Panorama ready");
                if self.bundles.send(bundle).await.is_err() {
                    warn!("Nobody is listening for panoramas, dropping bundle");
                }
            }
            Err(e) => error!("Panoramic observation failed: {}", e),
        }
        // The PID clock kept running while the base was pivoting.
        if let Ok(navigation) = self.navigation() {
            navigation.reset_controller();
        }
    }

    async fn actuate(&mut self, command: ControlCommand) {
        let governed = match self.control() {
            Ok(control) => control.govern(command),
            Err(e) => {
                error!("{}", e);
                return;
            }
        };
        self.last_command = governed.command;
        if let Err(e) = self.sink.publish(governed.command).await {
            warn!("Failed to publish command: {}", e);
        }
    }
}

fn not_registered(component: &str) -> CoreError {
    CoreError::Lifecycle {
        component: component.to_string(),
        reason: "not registered".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::occupancy::LocalOccupancyGrid;
    use crate::perception::panorama::RgbFrame;
    use crate::perception::sensors::{sensor_slot, SensorFeed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    struct ChannelSink(UnboundedSender<ControlCommand>);

    #[async_trait]
    impl CommandSink for ChannelSink {
        async fn publish(&mut self, command: ControlCommand) -> Result<()> {
            self.0
                .send(command)
                .map_err(|_| CoreError::Actuation("test sink closed".into()))
        }
    }

    struct CountingPivot(Arc<AtomicUsize>);

    #[async_trait]
    impl PivotActuator for CountingPivot {
        async fn pivot_right(&mut self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }
    }

    struct Rig {
        handle: NodeHandle,
        bundles: mpsc::Receiver<PanoramicBundle>,
        commands: mpsc::UnboundedReceiver<ControlCommand>,
        obstruction: watch::Sender<bool>,
        pivots: Arc<AtomicUsize>,
        task: tokio::task::JoinHandle<Result<()>>,
        _sensors: tokio::task::JoinHandle<()>,
    }

    fn spawn_sensors(
        grid: SensorFeed<LocalOccupancyGrid>,
        rgb: SensorFeed<RgbFrame>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                grid.publish(LocalOccupancyGrid::new(16, 0.05));
                rgb.publish(RgbFrame::filled(4, 6, [10, 20, 30]));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    fn rig() -> Rig {
        let mut config = CoreConfig::default();
        config.node.dt = 0.01;
        config.panorama.poll_interval_ms = 5;
        config.panorama.capture_timeout_ms = 1000;

        let (grid_feed, grid_slot) = sensor_slot("occupancy");
        let (rgb_feed, rgb_slot) = sensor_slot("rgb");
        let assembler =
            PanoramicObservationAssembler::new(config.panorama.clone(), grid_slot, rgb_slot)
                .unwrap();
        let (obstruction, obstruction_rx) = watch::channel(false);
        let (command_tx, commands) = mpsc::unbounded_channel();
        let pivots = Arc::new(AtomicUsize::new(0));

        let (node, handle, bundles) = NavigationNode::new(
            &config,
            assembler,
            obstruction_rx,
            Box::new(CountingPivot(Arc::clone(&pivots))),
            Box::new(ChannelSink(command_tx)),
        )
        .unwrap();

        Rig {
            handle,
            bundles,
            commands,
            obstruction,
            pivots,
            task: tokio::spawn(node.run()),
            _sensors: spawn_sensors(grid_feed, rgb_feed),
        }
    }

    async fn next_moving(commands: &mut mpsc::UnboundedReceiver<ControlCommand>) -> ControlCommand {
        loop {
            let command = tokio::time::timeout(Duration::from_secs(1), commands.recv())
                .await
                .expect("command within a second")
                .expect("sink open");
            if command.forward > 0.0 {
                return command;
            }
        }
    }

    #[tokio::test]
    async fn tracks_path_after_odometry() {
        let mut rig = rig();
        rig.handle
            .send(NodeEvent::Odometry(VehiclePose::new(5.0, 5.0, 0.0)))
            .await
            .unwrap();
        rig.handle
            .send(NodeEvent::Path(vec![(1.0, 0.0), (2.0, 0.0)]))
            .await
            .unwrap();

        let command = next_moving(&mut rig.commands).await;
        assert!((command.forward - 0.03).abs() < 1e-9);
        assert!(command.angular.abs() < 1e-9);

        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn idle_ticks_hold_the_base_still() {
        let mut rig = rig();
        // No odometry yet, then odometry without a path.
        let first = tokio::time::timeout(Duration::from_secs(1), rig.commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, ControlCommand::zero());

        rig.handle
            .send(NodeEvent::Odometry(VehiclePose::default()))
            .await
            .unwrap();
        rig.handle.send(NodeEvent::Path(Vec::new())).await.unwrap();
        for _ in 0..3 {
            let command = tokio::time::timeout(Duration::from_secs(1), rig.commands.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(command, ControlCommand::zero());
        }

        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn quaternion_odometry_sets_heading() {
        let mut rig = rig();
        // Origin facing +y, then the base turns to face +x at the same spot.
        let half = std::f64::consts::FRAC_PI_4;
        rig.handle
            .send(NodeEvent::OdometryQuaternion {
                x: 2.0,
                y: 1.0,
                orientation: [0.0, 0.0, half.sin(), half.cos()],
            })
            .await
            .unwrap();
        rig.handle
            .send(NodeEvent::OdometryQuaternion {
                x: 2.0,
                y: 1.0,
                orientation: [0.0, 0.0, 0.0, 1.0],
            })
            .await
            .unwrap();
        // Relative heading is now -pi/2, so a path straight ahead of the
        // origin needs a left turn.
        rig.handle
            .send(NodeEvent::Path(vec![(1.0, 0.0), (2.0, 0.0)]))
            .await
            .unwrap();

        let command = next_moving(&mut rig.commands).await;
        assert!(command.angular > 0.0);

        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tracker_can_be_retuned_while_running() {
        let mut rig = rig();
        rig.handle
            .send(NodeEvent::TuneTracker(HashMap::from([("bogus".to_string(), 1.0)])))
            .await
            .unwrap();
        rig.handle
            .send(NodeEvent::TuneTracker(HashMap::from([(
                "base_speed".to_string(),
                0.07,
            )])))
            .await
            .unwrap();
        rig.handle
            .send(NodeEvent::Odometry(VehiclePose::default()))
            .await
            .unwrap();
        rig.handle
            .send(NodeEvent::Path(vec![(1.0, 0.0), (2.0, 0.0)]))
            .await
            .unwrap();

        // base_speed 0.07 plus the default min_speed 0.01
        let command = next_moving(&mut rig.commands).await;
        assert!((command.forward - 0.08).abs() < 1e-9);

        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn obstruction_zeroes_forward_velocity() {
        let mut rig = rig();
        rig.handle
            .send(NodeEvent::Odometry(VehiclePose::default()))
            .await
            .unwrap();
        rig.handle
            .send(NodeEvent::Path(vec![(1.0, 0.0), (2.0, 0.0)]))
            .await
            .unwrap();
        next_moving(&mut rig.commands).await;

        rig.obstruction.send_replace(true);
        let stop = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let command = rig.commands.recv().await.expect("sink open");
                if command.forward == 0.0 {
                    return command;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stop.forward, 0.0);

        // Every later tick keeps forward motion suppressed.
        for _ in 0..5 {
            let command = rig.commands.recv().await.unwrap();
            assert_eq!(command.forward, 0.0);
        }

        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn panorama_request_pivots_four_times() {
        let mut rig = rig();
        rig.handle.send(NodeEvent::RequestPanorama).await.unwrap();

        let bundle = tokio::time::timeout(Duration::from_secs(5), rig.bundles.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rig.pivots.load(Ordering::SeqCst), 4);
        assert_eq!(bundle.captures.len(), 4);
        assert_eq!(bundle.rgb_panorama.width(), 24);
        assert!(bundle.occupancy.occupied_cells().is_empty());

        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn try_send_reports_a_full_queue() {
        let mut config = CoreConfig::default();
        config.node.event_capacity = 2;
        let (_grid_feed, grid_slot) = sensor_slot("occupancy");
        let (_rgb_feed, rgb_slot) = sensor_slot("rgb");
        let assembler =
            PanoramicObservationAssembler::new(config.panorama.clone(), grid_slot, rgb_slot)
                .unwrap();
        let (_obstruction, obstruction_rx) = watch::channel(false);
        let (command_tx, _commands) = mpsc::unbounded_channel();
        let (node, handle, _bundles) = NavigationNode::new(
            &config,
            assembler,
            obstruction_rx,
            Box::new(CountingPivot(Arc::new(AtomicUsize::new(0)))),
            Box::new(ChannelSink(command_tx)),
        )
        .unwrap();

        let odometry = NodeEvent::Odometry(VehiclePose::default());
        assert!(handle.try_send(odometry.clone()).unwrap());
        assert!(handle.try_send(odometry.clone()).unwrap());
        assert!(!handle.try_send(odometry.clone()).unwrap());

        drop(node);
        assert!(matches!(
            handle.try_send(odometry),
            Err(CoreError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_the_base() {
        let mut rig = rig();
        rig.handle.shutdown();
        rig.task.await.unwrap().unwrap();

        let mut last = None;
        while let Ok(command) = rig.commands.try_recv() {
            last = Some(command);
        }
        assert_eq!(last, Some(ControlCommand::zero()));
    }
}
