// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Uniform hash grid for fixed-radius neighbour queries over 3D points.
//!
//! Space is divided into cubic cells of side `cell_width`. A point's cell
//! coordinate `floor(p / cell_width)` is wrapped into the fixed grid
//! dimensions, so the grid covers an unbounded domain with a bounded
//! number of cells. Each update rebuilds from scratch: points are keyed by
//! `(cell, index)`, sorted, and every cell records the range of sorted
//! entries it owns.

use glam::Vec3;

use crate::error::{Error, Result};
use crate::surface::{Buffer, Surface};

/// Point bucket structure whose storage lives on an execution surface.
#[derive(Debug)]
pub struct HashGrid<S: Surface> {
    surface: S,
    dims: [u32; 3],
    cell_width: f32,
    num_points: usize,
    capacity: usize,
    points: Buffer<Vec3>,
    keys: Buffer<u64>,
    sorted: Buffer<u32>,
    cell_starts: Buffer<u32>,
    cell_ends: Buffer<u32>,
}

impl<S: Surface> HashGrid<S> {
    /// Create an empty grid with the given cell counts per axis.
    pub fn new(surface: &S, dims: [i32; 3]) -> Result<Self> {
        let invalid = || Error::invalid_argument(format!("grid dimensions {dims:?} must be positive"));
        let mut unsigned = [0_u32; 3];
        for (out, &d) in unsigned.iter_mut().zip(&dims) {
            *out = u32::try_from(d).ok().filter(|d| *d > 0).ok_or_else(invalid)?;
        }
        let num_cells = unsigned
            .iter()
            .try_fold(1_u32, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                Error::invalid_argument(format!("grid dimensions {dims:?} exceed the cell index range"))
            })? as usize;
        Ok(Self {
            surface: surface.clone(),
            dims: unsigned,
            cell_width: 0.0,
            num_points: 0,
            capacity: 0,
            points: surface.alloc(0)?,
            keys: surface.alloc(0)?,
            sorted: surface.alloc(0)?,
            cell_starts: surface.alloc(num_cells)?,
            cell_ends: surface.alloc(num_cells)?,
        })
    }

    /// Make room for at least `num_points` points. Never shrinks.
    ///
    /// Query results are unaffected; the current contents move to the new storage.
    pub fn reserve(&mut self, num_points: usize) -> Result<()> {
        self.grow(num_points, true)
    }

    fn grow(&mut self, num_points: usize, preserve: bool) -> Result<()> {
        if num_points <= self.capacity {
            return Ok(());
        }
        let points = self.surface.alloc(num_points)?;
        let keys = self.surface.alloc(num_points)?;
        let sorted = self.surface.alloc(num_points)?;
        if preserve && self.num_points > 0 {
            let n = self.num_points;
            let old = (self.points.clone(), self.keys.clone(), self.sorted.clone());
            let new = (points.clone(), keys.clone(), sorted.clone());
            self.surface.submit("hash grid grow", move |_| {
                new.0.write()[..n].copy_from_slice(&old.0.read()[..n]);
                new.1.write()[..n].copy_from_slice(&old.1.read()[..n]);
                new.2.write()[..n].copy_from_slice(&old.2.read()[..n]);
                Ok(())
            })?;
        }
        // Jobs still in flight keep the old storage alive through their clones.
        self.points = points;
        self.keys = keys;
        self.sorted = sorted;
        self.capacity = num_points;
        Ok(())
    }

    /// Rebuild from the first `num_points` entries of `positions`.
    ///
    /// Positions are copied; the slice is not retained.
    pub fn update(&mut self, cell_width: f32, positions: &[Vec3], num_points: usize) -> Result<()> {
        if !(cell_width > 0.0 && cell_width.is_finite()) {
            return Err(Error::invalid_argument(format!(
                "cell width {cell_width} must be positive and finite"
            )));
        }
        if positions.len() < num_points {
            return Err(Error::invalid_argument(format!(
                "{} positions supplied for {num_points} points",
                positions.len()
            )));
        }
        self.grow(num_points, false)?;
        log::trace!("hash grid update: {num_points} points, cell width {cell_width}");
        self.surface.upload(&self.points, 0, &positions[..num_points])?;

        let dims = self.dims;
        let n = num_points;
        let points = self.points.clone();
        let keys = self.keys.clone();
        let sorted = self.sorted.clone();
        let cell_starts = self.cell_starts.clone();
        let cell_ends = self.cell_ends.clone();
        self.surface.submit("hash grid build", move |launch| {
            let points = points.read();
            let mut keys = keys.write();
            let keys = &mut keys[..n];
            launch.launch(keys, |i| {
                (u64::from(hash_cell(cell_coord(points[i], cell_width), dims)) << 32) | i as u64
            });
            launch.sort_unstable(keys);
            let keys = &*keys;
            launch.launch(&mut sorted.write()[..n], |k| key_index(keys[k]));
            launch.launch(&mut cell_starts.write(), |c| {
                index_u32(keys.partition_point(|&k| key_cell(k) < index_u32(c)))
            });
            launch.launch(&mut cell_ends.write(), |c| {
                index_u32(keys.partition_point(|&k| key_cell(k) <= index_u32(c)))
            });
            Ok(())
        })?;
        self.cell_width = cell_width;
        self.num_points = n;
        Ok(())
    }

    /// Indices of points within `radius` of `point`, ascending.
    ///
    /// Only the 27 cells around `point` are scanned, so every neighbour is
    /// found as long as `radius <= cell_width`.
    pub fn query(&self, point: Vec3, radius: f32) -> Result<Vec<u32>> {
        if radius.is_nan() || radius < 0.0 {
            return Err(Error::invalid_argument(format!(
                "radius {radius} must be non-negative"
            )));
        }
        let radius_sq = radius * radius;
        self.scan(point, |p| p.distance_squared(point) <= radius_sq)
    }

    /// Every point bucketed in the 27 cells around `point`, ascending and unfiltered.
    pub fn candidates(&self, point: Vec3) -> Result<Vec<u32>> {
        self.scan(point, |_| true)
    }

    fn scan(&self, point: Vec3, accept: impl Fn(Vec3) -> bool) -> Result<Vec<u32>> {
        self.surface.synchronize()?;
        if self.num_points == 0 {
            return Ok(Vec::new());
        }
        let points = self.points.read();
        let sorted = self.sorted.read();
        let starts = self.cell_starts.read();
        let ends = self.cell_ends.read();

        // Offsets are applied after wrapping so saturated coordinates cannot overflow.
        let base = wrap_cell(cell_coord(point, self.cell_width), self.dims);
        let dims = self.dims;
        let mut cells = Vec::with_capacity(27);
        for dz in 0..3 {
            for dy in 0..3 {
                for dx in 0..3 {
                    let c = [
                        neighbour(base[0], dims[0], dx),
                        neighbour(base[1], dims[1], dy),
                        neighbour(base[2], dims[2], dz),
                    ];
                    cells.push(flatten_cell(c, dims));
                }
            }
        }
        // Small dimensions wrap several neighbours onto the same cell.
        cells.sort_unstable();
        cells.dedup();

        let mut out = Vec::new();
        for cell in cells {
            let range = starts[cell as usize] as usize..ends[cell as usize] as usize;
            out.extend(
                sorted[range]
                    .iter()
                    .copied()
                    .filter(|&i| accept(points[i as usize])),
            );
        }
        out.sort_unstable();
        Ok(out)
    }

    /// The `i`-th point in cell order.
    ///
    /// Iterating `point_id(0..num_points)` visits points cell by cell.
    pub fn point_id(&self, i: usize) -> Result<u32> {
        if i >= self.num_points {
            return Err(Error::invalid_argument(format!(
                "point {i} out of range for {} points",
                self.num_points
            )));
        }
        self.surface.synchronize()?;
        Ok(self.sorted.read()[i])
    }

    /// Hashed cell of `point` under the current cell width, or `None` before the first update.
    pub fn cell_of(&self, point: Vec3) -> Option<u32> {
        (self.cell_width > 0.0).then(|| hash_cell(cell_coord(point, self.cell_width), self.dims))
    }

    /// Cell counts per axis.
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Cell width of the last update, zero before the first.
    pub fn cell_width(&self) -> f32 {
        self.cell_width
    }

    /// Points in the last update.
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Points that fit without reallocating.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of hashed cells.
    pub fn num_cells(&self) -> usize {
        self.cell_starts.len()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Float to int casts saturate; wrapping happens in hash_cell."
)]
fn cell_coord(p: Vec3, cell_width: f32) -> [i64; 3] {
    let c = (p / cell_width).floor();
    [c.x as i64, c.y as i64, c.z as i64]
}

fn hash_cell(c: [i64; 3], dims: [u32; 3]) -> u32 {
    flatten_cell(wrap_cell(c, dims), dims)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "rem_euclid yields a value in [0, dim)."
)]
fn wrap_cell(c: [i64; 3], dims: [u32; 3]) -> [u32; 3] {
    [0_usize, 1, 2].map(|a| c[a].rem_euclid(i64::from(dims[a])) as u32)
}

/// Wrapped coordinate one step below (`step = 0`), at (`1`) or above (`2`) `c`.
#[allow(
    clippy::cast_possible_truncation,
    reason = "The result is reduced modulo a u32 dimension."
)]
fn neighbour(c: u32, dim: u32, step: u32) -> u32 {
    let dim = u64::from(dim);
    ((u64::from(c) + dim + u64::from(step) - 1) % dim) as u32
}

fn flatten_cell(c: [u32; 3], dims: [u32; 3]) -> u32 {
    c[0] + c[1] * dims[0] + c[2] * dims[0] * dims[1]
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Cell and point counts are bounded by u32."
)]
fn index_u32(i: usize) -> u32 {
    i as u32
}

#[allow(clippy::cast_possible_truncation, reason = "The cell lives in the high half.")]
fn key_cell(key: u64) -> u32 {
    (key >> 32) as u32
}

#[allow(clippy::cast_possible_truncation, reason = "The point index lives in the low half.")]
fn key_index(key: u64) -> u32 {
    key as u32
}
