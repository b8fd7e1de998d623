//! Robot-centred local occupancy grid
//!
//! The grid is square, stores one byte per cell and keeps the robot at the
//! centre cell. Cells hold [`cell_values::FREE`] or [`cell_values::OCCUPIED`],
//! so the mean over any window is the free fraction of that window.

use nalgebra::DMatrix;

/// Cell values stored in the grid
pub mod cell_values {
    pub const FREE: u8 = 1;
    pub const OCCUPIED: u8 = 0;
}

/// Square free/occupied grid centred on the sensor origin
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOccupancyGrid {
    cells: DMatrix<u8>,
    resolution: f64,
}

impl LocalOccupancyGrid {
    /// Create an all-free grid with `size` cells per side
    pub fn new(size: usize, resolution: f64) -> Self {
        LocalOccupancyGrid {
            cells: DMatrix::from_element(size, size, cell_values::FREE),
            resolution,
        }
    }

    /// Wrap an existing square matrix of cell values
    pub fn from_matrix(cells: DMatrix<u8>, resolution: f64) -> Self {
        debug_assert_eq!(cells.nrows(), cells.ncols(), "grid must be square");
        LocalOccupancyGrid { cells, resolution }
    }

    pub fn size(&self) -> usize {
        self.cells.nrows()
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Centre cell (row, col) where the robot sits
    pub fn center(&self) -> (i64, i64) {
        let half = (self.size() / 2) as i64;
        (half, half)
    }

    pub fn cells(&self) -> &DMatrix<u8> {
        &self.cells
    }

    pub fn in_bounds(&self, row: i64, col: i64) -> bool {
        let n = self.size() as i64;
        row >= 0 && col >= 0 && row < n && col < n
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[(row, col)]
    }

    pub fn is_occupied(&self, row: usize, col: usize) -> bool {
        self.cells[(row, col)] == cell_values::OCCUPIED
    }

    pub fn set_occupied(&mut self, row: usize, col: usize) {
        self.cells[(row, col)] = cell_values::OCCUPIED;
    }

    /// All occupied cells in row-major order
    pub fn occupied_cells(&self) -> Vec<(usize, usize)> {
        let n = self.size();
        let mut out = Vec::new();
        for row in 0..n {
            for col in 0..n {
                if self.is_occupied(row, col) {
                    out.push((row, col));
                }
            }
        }
        out
    }

    /// Mean cell value over rows `r0..r1` and columns `c0..c1`
    pub fn window_mean(&self, r0: usize, r1: usize, c0: usize, c1: usize) -> f64 {
        let view = self.cells.view((r0, c0), (r1 - r0, c1 - c0));
        if view.is_empty() {
            return cell_values::FREE as f64;
        }
        let sum: u64 = view.iter().map(|&v| v as u64).sum();
        sum as f64 / view.len() as f64
    }

    /// Force every cell in the window to occupied
    pub fn fill_occupied(&mut self, r0: usize, r1: usize, c0: usize, c1: usize) {
        self.cells
            .view_mut((r0, c0), (r1 - r0, c1 - c0))
            .fill(cell_values::OCCUPIED);
    }

    /// Mean over the window straight ahead of the robot: middle third of
    /// rows, last third of columns.
    pub fn forward_window_mean(&self) -> f64 {
        let n = self.size();
        self.window_mean(n / 3, 2 * n / 3, 2 * n / 3, n)
    }

    /// Rotate the grid counter-clockwise by `quarter_turns` x 90 degrees
    pub fn rotated_ccw(&self, quarter_turns: i32) -> Self {
        let n = self.size();
        let last = n - 1;
        let src = &self.cells;
        let cells = match quarter_turns.rem_euclid(4) {
            0 => src.clone(),
            1 => DMatrix::from_fn(n, n, |r, c| src[(c, last - r)]),
            2 => DMatrix::from_fn(n, n, |r, c| src[(last - r, last - c)]),
            _ => DMatrix::from_fn(n, n, |r, c| src[(last - c, r)]),
        };
        LocalOccupancyGrid {
            cells,
            resolution: self.resolution,
        }
    }

    /// Element-wise minimum: a cell is occupied if either grid has it occupied
    pub fn merged_with(&self, other: &LocalOccupancyGrid) -> Self {
        LocalOccupancyGrid {
            cells: self.cells.zip_map(&other.cells, |a, b| a.min(b)),
            resolution: self.resolution,
        }
    }
}
