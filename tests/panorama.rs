use async_trait::async_trait;
use cmn_core::config::PanoramaConfig;
use cmn_core::error::{CoreError, Result};
use cmn_core::perception::occupancy::LocalOccupancyGrid;
use cmn_core::perception::panorama::{
    PanoramicObservationAssembler, PivotActuator, RelativeHeading, RgbFrame,
};
use cmn_core::perception::sensors::{sensor_slot, SensorFeed};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SIZE: usize = 17;
const OBSTACLE_CELLS: usize = 4;
const COLORS: [[u8; 3]; 4] = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];

/// What the sensor head sees after `pivots` clockwise quarter turns, with a
/// single obstacle straight ahead of the starting heading.
fn view(pivots: usize) -> LocalOccupancyGrid {
    let c = SIZE / 2;
    let d = OBSTACLE_CELLS;
    // The obstacle drifts counter-clockwise in the sensor frame.
    let (row, col) = match pivots % 4 {
        0 => (c, c + d),
        1 => (c - d, c),
        2 => (c, c - d),
        _ => (c + d, c),
    };
    let mut grid = LocalOccupancyGrid::new(SIZE, 0.05);
    grid.set_occupied(row, col);
    grid
}

struct TurningHead {
    pivots: Arc<AtomicUsize>,
    rgb: SensorFeed<RgbFrame>,
}

#[async_trait]
impl PivotActuator for TurningHead {
    async fn pivot_right(&mut self) -> Result<()> {
        let done = self.pivots.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.rgb.publish(RgbFrame::filled(2, 3, COLORS[done % 4]));
        Ok(())
    }
}

fn config() -> PanoramaConfig {
    PanoramaConfig {
        poll_interval_ms: 5,
        capture_timeout_ms: 1000,
        ..PanoramaConfig::default()
    }
}

#[tokio::test]
async fn four_pivots_build_an_aligned_panorama() {
    let (grid_feed, grid_slot) = sensor_slot("occupancy");
    let (rgb_feed, rgb_slot) = sensor_slot("rgb");
    let pivots = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&pivots);
    let depth = tokio::spawn(async move {
        loop {
            grid_feed.publish(view(counter.load(Ordering::SeqCst)));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    rgb_feed.publish(RgbFrame::filled(2, 3, COLORS[0]));
    let mut head = TurningHead {
        pivots: Arc::clone(&pivots),
        rgb: rgb_feed,
    };
    let mut assembler = PanoramicObservationAssembler::new(config(), grid_slot, rgb_slot).unwrap();
    let bundle = assembler.assemble(&mut head).await.unwrap();
    depth.abort();

    assert_eq!(pivots.load(Ordering::SeqCst), 4);
    let headings: Vec<_> = bundle.captures.iter().map(|c| c.heading).collect();
    assert_eq!(headings, RelativeHeading::SEQUENCE.to_vec());

    // Every capture agrees: the obstacle is straight ahead, i.e. north.
    let c = SIZE / 2;
    assert_eq!(bundle.occupancy.occupied_cells(), vec![(c - OBSTACLE_CELLS, c)]);

    let panorama = &bundle.rgb_panorama;
    assert_eq!((panorama.height(), panorama.width()), (2, 12));
    for (i, color) in COLORS.iter().enumerate() {
        assert_eq!(panorama.pixel(1, i * 3), *color);
    }
}

#[tokio::test]
async fn missing_depth_times_out() {
    let (_grid_feed, grid_slot) = sensor_slot::<LocalOccupancyGrid>("occupancy");
    let (rgb_feed, rgb_slot) = sensor_slot("rgb");
    rgb_feed.publish(RgbFrame::filled(2, 3, COLORS[0]));
    let mut head = TurningHead {
        pivots: Arc::new(AtomicUsize::new(0)),
        rgb: rgb_feed,
    };
    let config = PanoramaConfig {
        capture_timeout_ms: 30,
        ..config()
    };
    let mut assembler = PanoramicObservationAssembler::new(config, grid_slot, rgb_slot).unwrap();
    let err = assembler.assemble(&mut head).await.unwrap_err();
    assert!(matches!(err, CoreError::CaptureTimeout { sensor: "occupancy", .. }));
    assert_eq!(head.pivots.load(Ordering::SeqCst), 0);
}
