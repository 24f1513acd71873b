//! OR-reduction of a lane result grid
//!
//! Each pass combines `factor × factor` cells into one by bitwise OR until
//! both sides are at most the final size. Dimensions that do not divide
//! evenly round up, so edge cells are never dropped. The host then scans
//! the small final grid for the first non-zero value.

use super::BatchShape;
use rayon::prelude::*;

/// Cells combined per axis in one pass
pub const REDUCE_FACTOR: u32 = 2;

/// Side length at which reduction stops
pub const REDUCED_SIZE: u32 = 64;

/// Reduction schedule for a lane grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducePlan {
    factor: u32,
    final_size: u32,
}

impl Default for ReducePlan {
    fn default() -> Self {
        Self {
            factor: REDUCE_FACTOR,
            final_size: REDUCED_SIZE,
        }
    }
}

impl ReducePlan {
    /// Create a plan. Factors below 2 and a zero final size are raised to
    /// the smallest workable value.
    pub fn new(factor: u32, final_size: u32) -> Self {
        Self {
            factor: factor.max(2),
            final_size: final_size.max(1),
        }
    }

    /// Per-axis factor for the next pass, 1 when the axis is already small
    fn step(&self, side: u32) -> u32 {
        if side > self.final_size {
            self.factor
        } else {
            1
        }
    }

    /// Grid sizes after each pass, starting from `shape`
    pub fn passes(&self, shape: BatchShape) -> Vec<(u32, u32)> {
        let (mut width, mut height) = (shape.width, shape.height);
        let mut sizes = Vec::new();
        while width > self.final_size || height > self.final_size {
            width = width.div_ceil(self.step(width));
            height = height.div_ceil(self.step(height));
            sizes.push((width, height));
        }
        sizes
    }

    /// Reduce a row-major grid and return its first non-zero cell
    pub fn reduce(&self, grid: Vec<u32>, shape: BatchShape) -> Option<u32> {
        let (mut width, mut height) = (shape.width, shape.height);
        let mut grid = grid;
        while width > self.final_size || height > self.final_size {
            let fx = self.step(width);
            let fy = self.step(height);
            grid = reduce_pass(&grid, width, height, fx, fy);
            width = width.div_ceil(fx);
            height = height.div_ceil(fy);
        }
        first_match(&grid)
    }
}

/// One reduction pass.
///
/// Output cell `(x, y)` is the OR of input cells
/// `[x*fx, (x+1)*fx) × [y*fy, (y+1)*fy)` clipped to the input grid.
pub fn reduce_pass(grid: &[u32], width: u32, height: u32, fx: u32, fy: u32) -> Vec<u32> {
    let (width, height) = (width as usize, height as usize);
    let (fx, fy) = (fx as usize, fy as usize);
    let out_width = width.div_ceil(fx);
    let out_height = height.div_ceil(fy);

    let mut out = vec![0u32; out_width * out_height];
    out.par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(oy, row)| {
            let rows = oy * fy..((oy + 1) * fy).min(height);
            for (ox, cell) in row.iter_mut().enumerate() {
                let cols = ox * fx..((ox + 1) * fx).min(width);
                *cell = rows
                    .clone()
                    .flat_map(|y| &grid[y * width + cols.start..y * width + cols.end])
                    .fold(0u32, |acc, &value| acc | value);
            }
        });
    out
}

/// First non-zero cell in row-major order
pub fn first_match(grid: &[u32]) -> Option<u32> {
    grid.iter().copied().find(|&value| value != 0)
}

/// Reduce with the default plan
pub fn reduce_grid(grid: Vec<u32>, shape: BatchShape) -> Option<u32> {
    ReducePlan::default().reduce(grid, shape)
}
