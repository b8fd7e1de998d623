//! Range scan to local occupancy grid conversion
//!
//! Every valid beam is traced from its hit cell out to the cell at maximum
//! sensor range, marking the shadow behind the hit as occupied. The robot
//! faces east on the grid (forward = +column), rows grow downward.

use super::occupancy::LocalOccupancyGrid;
use crate::config::RayCasterConfig;
use crate::error::{CoreError, Result};
use std::collections::HashMap;
use tracing::debug;

/// One sweep of a planar range sensor
#[derive(Debug, Clone, PartialEq)]
pub struct RangeScan {
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    pub range_min: f64,
    pub range_max: f64,
    pub ranges: Vec<f64>,
}

impl RangeScan {
    /// Angle of beam `index` in the sensor frame
    pub fn beam_angle(&self, index: usize) -> f64 {
        self.angle_min + index as f64 * self.angle_increment
    }

    /// Beams outside [range_min, range_max] (NaN included) carry no hit
    pub fn is_valid_range(&self, range: f64) -> bool {
        range >= self.range_min && range <= self.range_max
    }
}

/// Cells of a discrete line from `start` to `end`, both inclusive
#[derive(Debug, Clone)]
pub struct BresenhamLine {
    origin: (i64, i64),
    // Unit steps along the major and minor axes, as (row, col).
    major_step: (i64, i64),
    minor_step: (i64, i64),
    major_len: i64,
    minor_len: i64,
    decision: i64,
    minor: i64,
    index: i64,
}

impl BresenhamLine {
    pub fn new(start: (i64, i64), end: (i64, i64)) -> Self {
        let d_row = end.0 - start.0;
        let d_col = end.1 - start.1;
        let row_sign = if d_row > 0 { 1 } else { -1 };
        let col_sign = if d_col > 0 { 1 } else { -1 };
        let (abs_row, abs_col) = (d_row.abs(), d_col.abs());

        let (major_step, minor_step, major_len, minor_len) = if abs_row > abs_col {
            ((row_sign, 0), (0, col_sign), abs_row, abs_col)
        } else {
            ((0, col_sign), (row_sign, 0), abs_col, abs_row)
        };

        BresenhamLine {
            origin: start,
            major_step,
            minor_step,
            major_len,
            minor_len,
            decision: 2 * minor_len - major_len,
            minor: 0,
            index: 0,
        }
    }
}

impl Iterator for BresenhamLine {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index > self.major_len {
            return None;
        }
        let i = self.index;
        let cell = (
            self.origin.0 + i * self.major_step.0 + self.minor * self.minor_step.0,
            self.origin.1 + i * self.major_step.1 + self.minor * self.minor_step.1,
        );
        if self.decision >= 0 {
            self.minor += 1;
            self.decision -= 2 * self.major_len;
        }
        self.decision += 2 * self.minor_len;
        self.index += 1;
        Some(cell)
    }
}

/// Longest distance, in cells, a beam endpoint is placed from the center
const MAX_TRACE_CELLS: f64 = 1.0e9;

/// Builds a local occupancy grid from a single range scan
#[derive(Debug, Clone)]
pub struct OccupancyRayCaster {
    config: RayCasterConfig,
}

impl OccupancyRayCaster {
    pub fn new(config: RayCasterConfig) -> Result<Self> {
        config.validate()?;
        Ok(OccupancyRayCaster { config })
    }

    pub fn config(&self) -> &RayCasterConfig {
        &self.config
    }

    /// Configure the ray caster with named parameters
    pub fn configure(&mut self, params: &HashMap<String, f64>) -> Result<()> {
        let mut config = self.config.clone();
        if let Some(&grid_size) = params.get("grid_size") {
            if grid_size < 0.0 || grid_size.fract() != 0.0 {
                return Err(CoreError::invalid("grid_size", "must be a whole number"));
            }
            config.grid_size = grid_size as usize;
        }
        if let Some(&resolution) = params.get("resolution") {
            config.resolution = resolution;
        }
        if let Some(&mount_yaw) = params.get("mount_yaw") {
            config.mount_yaw = mount_yaw;
        }
        if let Some(&threshold) = params.get("obstruction_threshold") {
            config.obstruction_threshold = threshold;
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Grid cell (row, col) of a point `distance` meters away along `angle`
    fn polar_to_cell(&self, center: (i64, i64), distance: f64, angle: f64) -> (i64, i64) {
        // Far endpoints only set the trace direction; capping them keeps the
        // cell arithmetic inside i64.
        let dist_px = (distance / self.config.resolution).min(MAX_TRACE_CELLS);
        let (sin, cos) = angle.sin_cos();
        // `as` truncates toward zero.
        (
            center.0 - (dist_px * sin) as i64,
            center.1 + (dist_px * cos) as i64,
        )
    }

    /// Trace every valid beam of `scan` into a fresh all-free grid
    pub fn cast(&self, scan: &RangeScan) -> LocalOccupancyGrid {
        let mut grid = LocalOccupancyGrid::new(self.config.grid_size, self.config.resolution);
        let center = grid.center();
        let mut skipped = 0usize;

        for (index, &range) in scan.ranges.iter().enumerate() {
            if !scan.is_valid_range(range) {
                skipped += 1;
                continue;
            }
            let angle = scan.beam_angle(index) + self.config.mount_yaw;
            let hit = self.polar_to_cell(center, range, angle);
            let max_range = self.polar_to_cell(center, scan.range_max, angle);

            for (row, col) in BresenhamLine::new(hit, max_range) {
                if !grid.in_bounds(row, col) {
                    break;
                }
                grid.set_occupied(row as usize, col as usize);
            }
        }

        if skipped > 0 {
            debug!(skipped, total = scan.ranges.len(), "skipped out-of-range beams");
        }
        grid
    }

    /// True when the window straight ahead is mostly occupied
    pub fn is_forward_obstructed(&self, grid: &LocalOccupancyGrid) -> bool {
        grid.forward_window_mean() <= self.config.obstruction_threshold
    }
}
