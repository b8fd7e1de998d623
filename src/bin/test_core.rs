//! Drives the core against a simulated unicycle robot in a square room:
//! follows a short path, then runs one panoramic observation cycle.
//!
//! Usage: `test_core [config.toml]`

use anyhow::{Context, Result};
use async_trait::async_trait;
use cmn_core::common::types::{ControlCommand, Point2D, VehiclePose};
use cmn_core::common::wrap_angle;
use cmn_core::config::CoreConfig;
use cmn_core::error::Result as CoreResult;
use cmn_core::lifecycle::LifecycleNode;
use cmn_core::node::{CommandSink, NavigationNode, NodeEvent, NodeHandle};
use cmn_core::perception::panorama::{PanoramicObservationAssembler, PivotActuator, RgbFrame};
use cmn_core::perception::ray_caster::RangeScan;
use cmn_core::perception::sensors::{sensor_slot, SensorFeed};
use cmn_core::perception::{PerceptionStack, ScanIngestor};
use cmn_core::telemetry;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_3, PI, TAU};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

const STEP: Duration = Duration::from_millis(20);
/// Simulated seconds per wall-clock second
const SPEEDUP: f64 = 10.0;
const ROOM_HALF_WIDTH: f64 = 3.0;
const BEAMS: usize = 121;
/// Time the simulated base takes to settle after a quarter turn
const PIVOT_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
struct SimRobot {
    pose: VehiclePose,
    command: ControlCommand,
}

impl SimRobot {
    fn step(&mut self, dt: f64) {
        let heading = self.pose.heading;
        self.pose.x += self.command.forward * heading.cos() * dt;
        self.pose.y += self.command.forward * heading.sin() * dt;
        self.pose.heading = wrap_angle(heading + self.command.angular * dt);
    }

    fn scan(&self) -> RangeScan {
        let angle_increment = 2.0 * FRAC_PI_3 / (BEAMS - 1) as f64;
        let ranges = (0..BEAMS)
            .map(|i| {
                let angle = self.pose.heading - FRAC_PI_3 + i as f64 * angle_increment;
                wall_distance(self.pose.x, self.pose.y, angle)
            })
            .collect();
        RangeScan {
            angle_min: -FRAC_PI_3,
            angle_max: FRAC_PI_3,
            angle_increment,
            range_min: 0.05,
            range_max: 5.0,
            ranges,
        }
    }

    fn camera(&self) -> RgbFrame {
        let shade = ((self.pose.heading + PI) / TAU * 255.0) as u8;
        RgbFrame::filled(48, 64, [shade, 128, 255 - shade])
    }
}

/// Distance from (x, y) along `angle` to the walls of the room
fn wall_distance(x: f64, y: f64, angle: f64) -> f64 {
    let (sin, cos) = angle.sin_cos();
    let mut distance = f64::INFINITY;
    if cos > 0.0 {
        distance = distance.min((ROOM_HALF_WIDTH - x) / cos);
    } else if cos < 0.0 {
        distance = distance.min((-ROOM_HALF_WIDTH - x) / cos);
    }
    if sin > 0.0 {
        distance = distance.min((ROOM_HALF_WIDTH - y) / sin);
    } else if sin < 0.0 {
        distance = distance.min((-ROOM_HALF_WIDTH - y) / sin);
    }
    distance
}

struct SimSink {
    robot: Arc<Mutex<SimRobot>>,
}

#[async_trait]
impl CommandSink for SimSink {
    async fn publish(&mut self, command: ControlCommand) -> CoreResult<()> {
        self.robot.lock().await.command = command;
        Ok(())
    }
}

struct SimPivot {
    robot: Arc<Mutex<SimRobot>>,
}

#[async_trait]
impl PivotActuator for SimPivot {
    async fn pivot_right(&mut self) -> CoreResult<()> {
        // Turn first so the sensors publish the new view while settling.
        let heading = {
            let mut robot = self.robot.lock().await;
            robot.pose.heading = wrap_angle(robot.pose.heading - FRAC_PI_2);
            robot.pose.heading
        };
        tokio::time::sleep(PIVOT_SETTLE).await;
        info!(heading, "pivot complete");
        Ok(())
    }
}

/// Advance the simulation and feed odometry, scans and camera frames
async fn drive(
    robot: Arc<Mutex<SimRobot>>,
    scans: ScanIngestor,
    rgb: SensorFeed<RgbFrame>,
    node: NodeHandle,
) {
    let mut ticker = tokio::time::interval(STEP);
    loop {
        ticker.tick().await;
        let (pose, scan, frame) = {
            let mut robot = robot.lock().await;
            robot.step(STEP.as_secs_f64() * SPEEDUP);
            (robot.pose, robot.scan(), robot.camera())
        };
        scans.ingest_scan(&scan);
        rgb.publish(frame);
        // Odometry is dropped while the node is busy with a panorama.
        let half = pose.heading / 2.0;
        let odometry = NodeEvent::OdometryQuaternion {
            x: pose.x,
            y: pose.y,
            orientation: [0.0, 0.0, half.sin(), half.cos()],
        };
        if node.try_send(odometry).is_err() {
            break;
        }
    }
}

async fn wait_for_goal(robot: &Mutex<SimRobot>, goal: Point2D, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if robot.lock().await.pose.distance_to(goal) < 0.2 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    info!("Initializing core...");

    let config = match std::env::args().nth(1) {
        Some(path) => CoreConfig::load_from(Path::new(&path))?
            .with_context(|| format!("config file {} not found", path))?,
        None => CoreConfig::default(),
    };

    let mut perception = PerceptionStack::new(config.ray_caster.clone())?;
    perception.on_configure()?;
    perception.on_activate()?;

    let (rgb_feed, rgb_slot) = sensor_slot("rgb");
    let assembler = PanoramicObservationAssembler::new(
        config.panorama.clone(),
        perception.occupancy_slot(),
        rgb_slot,
    )?;

    let start = VehiclePose::new(-1.0, -1.0, 0.0);
    let robot = Arc::new(Mutex::new(SimRobot {
        pose: start,
        command: ControlCommand::zero(),
    }));

    let (node, handle, mut bundles) = NavigationNode::new(
        &config,
        assembler,
        perception.subscribe_obstruction(),
        Box::new(SimPivot {
            robot: Arc::clone(&robot),
        }),
        Box::new(SimSink {
            robot: Arc::clone(&robot),
        }),
    )?;
    let node_task = tokio::spawn(node.run());
    let driver = tokio::spawn(drive(
        Arc::clone(&robot),
        perception.scan_ingestor(),
        rgb_feed,
        handle.clone(),
    ));

    // Odometry origin is the start pose, facing +x, so the path is relative to it.
    let path = vec![(0.3, 0.0), (0.6, 0.2), (0.8, 0.5)];
    let goal = (start.x + 0.8, start.y + 0.5);
    handle.send(NodeEvent::Path(path)).await?;

    if wait_for_goal(&robot, goal, Duration::from_secs(30)).await {
        info!("Reached goal at ({:.2}, {:.2})", goal.0, goal.1);
    } else {
        warn!("Goal not reached in time, continuing");
    }

    handle.send(NodeEvent::RequestPanorama).await?;
    let bundle = tokio::time::timeout(Duration::from_secs(60), bundles.recv())
        .await
        .context("panorama timed out")?
        .context("node stopped before delivering a panorama")?;
    info!(
        occupied = bundle.occupancy.occupied_cells().len(),
        panorama_width = bundle.rgb_panorama.width(),
        panorama_height = bundle.rgb_panorama.height(),
        "Panoramic observation received"
    );

    handle.shutdown();
    node_task.await??;
    driver.abort();

    perception.on_deactivate()?;
    perception.on_cleanup()?;
    info!("Core shutdown successfully!");
    Ok(())
}
