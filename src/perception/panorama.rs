//! Panoramic observation assembly
//!
//! The sensor head only looks forward, so a 360 degree observation is built
//! by capturing, pivoting 90 degrees clockwise, and repeating until the robot
//! faces its starting heading again. The four occupancy captures are rotated
//! into a shared forward-is-north frame and merged; the four RGB captures are
//! stitched side by side.
//!
//! Pivots are open loop: a turn that stalls short of 90 degrees goes
//! unnoticed and the captures are still treated as exactly 90 degrees apart.

use super::occupancy::LocalOccupancyGrid;
use super::sensors::SensorSlot;
use crate::config::PanoramaConfig;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// In-place rotation interface of the mobile base
#[async_trait]
pub trait PivotActuator: Send {
    /// Rotate 90 degrees clockwise in place, completing once the turn is done
    async fn pivot_right(&mut self) -> Result<()>;
}

/// Interleaved 8-bit image, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<u8>,
}

impl RgbFrame {
    /// Build a frame from raw RGB or RGBA bytes
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        if channels != 3 && channels != 4 {
            return Err(CoreError::FrameShapeMismatch(format!(
                "expected 3 or 4 channels, got {}",
                channels
            )));
        }
        if height == 0 || width == 0 {
            return Err(CoreError::FrameShapeMismatch(format!(
                "{}x{} frame has no pixels",
                height, width
            )));
        }
        if data.len() != height * width * channels {
            return Err(CoreError::FrameShapeMismatch(format!(
                "{}x{}x{} frame needs {} bytes, got {}",
                height,
                width,
                channels,
                height * width * channels,
                data.len()
            )));
        }
        Ok(RgbFrame {
            height,
            width,
            channels,
            data,
        })
    }

    /// Frame filled with one colour
    pub fn filled(height: usize, width: usize, pixel: [u8; 3]) -> Self {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(height * width * 3)
            .collect();
        RgbFrame {
            height,
            width,
            channels: 3,
            data,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Colour channels of one pixel, alpha dropped
    pub fn pixel(&self, row: usize, col: usize) -> [u8; 3] {
        let base = (row * self.width + col) * self.channels;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }

    /// Nearest-neighbour resize. A frame without pixels resizes to black.
    pub fn resized(&self, height: usize, width: usize) -> Self {
        if height == self.height && width == self.width {
            return self.clone();
        }
        if self.height == 0 || self.width == 0 {
            return RgbFrame {
                height,
                width,
                channels: self.channels,
                data: vec![0; height * width * self.channels],
            };
        }
        let mut data = Vec::with_capacity(height * width * self.channels);
        for row in 0..height {
            let src_row = row * self.height / height;
            for col in 0..width {
                let src_col = col * self.width / width;
                let base = (src_row * self.width + src_col) * self.channels;
                data.extend_from_slice(&self.data[base..base + self.channels]);
            }
        }
        RgbFrame {
            height,
            width,
            channels: self.channels,
            data,
        }
    }
}

/// Heading of a capture relative to the heading at the start of the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeHeading {
    Front,
    Right,
    Back,
    Left,
}

impl RelativeHeading {
    /// Capture order of one observation cycle
    pub const SEQUENCE: [RelativeHeading; 4] = [
        RelativeHeading::Front,
        RelativeHeading::Right,
        RelativeHeading::Back,
        RelativeHeading::Left,
    ];

    /// Clockwise pivot angle at which this capture is taken
    pub fn degrees(self) -> u16 {
        match self {
            RelativeHeading::Front => 0,
            RelativeHeading::Right => 90,
            RelativeHeading::Back => 180,
            RelativeHeading::Left => 270,
        }
    }

    /// Counter-clockwise quarter turns taking an east-forward capture into
    /// the forward-is-north panorama frame.
    pub fn alignment_quarter_turns(self) -> i32 {
        match self {
            RelativeHeading::Front => 1,
            RelativeHeading::Right => 0,
            RelativeHeading::Back => -1,
            RelativeHeading::Left => 2,
        }
    }
}

/// One directional capture, still in its own sensor frame
#[derive(Debug, Clone)]
pub struct DirectionalCapture {
    pub heading: RelativeHeading,
    pub occupancy: LocalOccupancyGrid,
    pub rgb: RgbFrame,
}

/// Result of a full observation cycle
#[derive(Debug, Clone)]
pub struct PanoramicBundle {
    /// Captures in temporal order: front, right, back, left
    pub captures: Vec<DirectionalCapture>,
    /// Merged, corner-repaired grid in the forward-is-north frame
    pub occupancy: LocalOccupancyGrid,
    /// Front, right, back and left frames stitched horizontally
    pub rgb_panorama: RgbFrame,
}

/// Rotate a capture's grid into the panorama frame
pub fn align_capture(heading: RelativeHeading, grid: &LocalOccupancyGrid) -> LocalOccupancyGrid {
    grid.rotated_ccw(heading.alignment_quarter_turns())
}

/// Element-wise minimum of aligned grids
pub fn merge_aligned(grids: &[LocalOccupancyGrid]) -> Option<LocalOccupancyGrid> {
    let (first, rest) = grids.split_first()?;
    Some(rest.iter().fold(first.clone(), |acc, g| acc.merged_with(g)))
}

/// Fill each blind corner block whose occupied fraction exceeds `threshold`.
///
/// Returns how many corners were filled.
pub fn repair_corners(grid: &mut LocalOccupancyGrid, threshold: f64) -> usize {
    let n = grid.size();
    let near = n / 3;
    let far = 2 * n / 3;
    let blocks = [
        (0, near, 0, near),
        (0, near, far, n),
        (far, n, far, n),
        (far, n, 0, near),
    ];

    let mut filled = 0;
    for (r0, r1, c0, c1) in blocks {
        let occupied_fraction = 1.0 - grid.window_mean(r0, r1, c0, c1);
        if occupied_fraction > threshold {
            grid.fill_occupied(r0, r1, c0, c1);
            filled += 1;
        }
    }
    filled
}

/// Concatenate frames along the horizontal axis, dropping alpha
pub fn stitch_panorama(frames: &[RgbFrame]) -> Result<RgbFrame> {
    let height = match frames.first() {
        Some(frame) => frame.height,
        None => return Err(CoreError::FrameShapeMismatch("no frames to stitch".into())),
    };
    if let Some(bad) = frames.iter().find(|f| f.height != height) {
        return Err(CoreError::FrameShapeMismatch(format!(
            "frame height {} does not match {}",
            bad.height, height
        )));
    }

    let width: usize = frames.iter().map(|f| f.width).sum();
    let mut data = Vec::with_capacity(height * width * 3);
    for row in 0..height {
        for frame in frames {
            for col in 0..frame.width {
                data.extend_from_slice(&frame.pixel(row, col));
            }
        }
    }
    Ok(RgbFrame {
        height,
        width,
        channels: 3,
        data,
    })
}

/// Drives the four-pivot capture protocol and builds the panorama
#[derive(Debug)]
pub struct PanoramicObservationAssembler {
    config: PanoramaConfig,
    occupancy: SensorSlot<LocalOccupancyGrid>,
    rgb: SensorSlot<RgbFrame>,
}

impl PanoramicObservationAssembler {
    pub fn new(
        config: PanoramaConfig,
        occupancy: SensorSlot<LocalOccupancyGrid>,
        rgb: SensorSlot<RgbFrame>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(PanoramicObservationAssembler {
            config,
            occupancy,
            rgb,
        })
    }

    pub fn config(&self) -> &PanoramaConfig {
        &self.config
    }

    async fn capture(&mut self, heading: RelativeHeading) -> Result<DirectionalCapture> {
        let poll = self.config.poll_interval();
        let timeout = self.config.capture_timeout();

        let mut rgb = self.rgb.take(poll, timeout).await?;
        if let (Some(h), Some(w)) = (self.config.rgb_height, self.config.rgb_width) {
            rgb = rgb.resized(h, w);
        }

        // The grid must be built from a scan taken after the pivot settled.
        self.occupancy.discard();
        let occupancy = self.occupancy.take(poll, timeout).await?;

        debug!(degrees = heading.degrees(), "captured directional observation");
        Ok(DirectionalCapture {
            heading,
            occupancy,
            rgb,
        })
    }

    /// Run one observation cycle: four captures separated by four pivots
    pub async fn assemble<P>(&mut self, pivot: &mut P) -> Result<PanoramicBundle>
    where
        P: PivotActuator + ?Sized,
    {
        info!("Generating a panoramic observation by commanding four 90 degree pivots");

        let mut captures = Vec::with_capacity(4);
        for heading in RelativeHeading::SEQUENCE {
            captures.push(self.capture(heading).await?);
            pivot.pivot_right().await?;
        }

        let aligned: Vec<_> = captures
            .iter()
            .map(|c| align_capture(c.heading, &c.occupancy))
            .collect();
        let mut occupancy = match merge_aligned(&aligned) {
            Some(grid) => grid,
            None => return Err(CoreError::FrameShapeMismatch("no occupancy captures".into())),
        };
        let filled = repair_corners(&mut occupancy, self.config.corner_occupancy_threshold);

        let frames: Vec<_> = captures.iter().map(|c| c.rgb.clone()).collect();
        let rgb_panorama = stitch_panorama(&frames)?;

        info!(
            corners_filled = filled,
            panorama_width = rgb_panorama.width(),
            "panoramic observation complete"
        );
        Ok(PanoramicBundle {
            captures,
            occupancy,
            rgb_panorama,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_follows_pivot_direction() {
        // Something seen straight ahead of each capture.
        let mut ahead = LocalOccupancyGrid::new(5, 0.1);
        ahead.set_occupied(2, 4);

        let north = align_capture(RelativeHeading::Front, &ahead);
        assert_eq!(north.occupied_cells(), vec![(0, 2)]);
        let east = align_capture(RelativeHeading::Right, &ahead);
        assert_eq!(east.occupied_cells(), vec![(2, 4)]);
        let south = align_capture(RelativeHeading::Back, &ahead);
        assert_eq!(south.occupied_cells(), vec![(4, 2)]);
        let west = align_capture(RelativeHeading::Left, &ahead);
        assert_eq!(west.occupied_cells(), vec![(2, 0)]);
    }

    #[test]
    fn merge_of_nothing_is_none() {
        assert!(merge_aligned(&[]).is_none());
    }

    #[test]
    fn corner_repair_fills_only_blocks_over_threshold() {
        let mut grid = LocalOccupancyGrid::new(30, 0.1);
        // Top-left block: 20 of 100 cells occupied.
        grid.fill_occupied(0, 2, 0, 10);
        // Bottom-right block: 5 of 100 cells occupied.
        grid.fill_occupied(20, 21, 20, 25);

        let filled = repair_corners(&mut grid, 0.1);
        assert_eq!(filled, 1);
        assert_eq!(grid.window_mean(0, 10, 0, 10), 0.0);
        assert!((grid.window_mean(20, 30, 20, 30) - 0.95).abs() < 1e-12);
        assert_eq!(grid.window_mean(0, 10, 20, 30), 1.0);
    }

    #[test]
    fn stitch_drops_alpha_and_keeps_order() {
        let rgba = RgbFrame::new(1, 1, 4, vec![1, 2, 3, 255]).unwrap();
        let rgb = RgbFrame::filled(1, 2, [9, 9, 9]);
        let pano = stitch_panorama(&[rgba, rgb]).unwrap();
        assert_eq!(pano.width(), 3);
        assert_eq!(pano.channels(), 3);
        assert_eq!(pano.data(), &[1, 2, 3, 9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn stitch_rejects_mismatched_heights() {
        let a = RgbFrame::filled(2, 2, [0, 0, 0]);
        let b = RgbFrame::filled(3, 2, [0, 0, 0]);
        assert!(matches!(
            stitch_panorama(&[a, b]),
            Err(CoreError::FrameShapeMismatch(_))
        ));
    }

    #[test]
    fn frame_validation_and_resize() {
        assert!(RgbFrame::new(2, 2, 3, vec![0; 5]).is_err());
        assert!(RgbFrame::new(2, 2, 1, vec![0; 4]).is_err());

        let data: Vec<u8> = (0..12).collect();
        let frame = RgbFrame::new(2, 2, 3, data).unwrap();
        let big = frame.resized(4, 4);
        assert_eq!(big.height(), 4);
        assert_eq!(big.pixel(0, 0), frame.pixel(0, 0));
        assert_eq!(big.pixel(3, 3), frame.pixel(1, 1));
    }

    #[test]
    fn empty_frames_are_rejected_and_never_panic_on_resize() {
        assert!(matches!(
            RgbFrame::new(0, 4, 3, vec![]),
            Err(CoreError::FrameShapeMismatch(_))
        ));
        assert!(RgbFrame::new(4, 0, 3, vec![]).is_err());

        let black = RgbFrame::filled(0, 4, [9, 9, 9]).resized(2, 2);
        assert_eq!((black.height(), black.width()), (2, 2));
        assert_eq!(black.pixel(1, 1), [0, 0, 0]);
    }
}
