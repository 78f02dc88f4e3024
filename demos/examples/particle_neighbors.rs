// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hash grid neighbour search over drifting particles.
//!
//! Each step rebuilds the grid and counts neighbours in cell order.
//!
//! Run:
//! - `cargo run -p canopy_demos --example particle_neighbors`

use canopy_spatial::{Device, DeviceConfig, DeviceContext, HashGrid};
use glam::Vec3;

fn main() -> Result<(), canopy_spatial::Error> {
    env_logger::init();
    let device = Device::new(DeviceContext::new(&DeviceConfig::default())?);
    let mut grid = HashGrid::new(&device, [32, 32, 32])?;

    let side = 12;
    let mut particles: Vec<Vec3> = (0..side * side * side)
        .map(|i| Vec3::new((i % side) as f32, (i / side % side) as f32, (i / (side * side)) as f32) * 0.5)
        .collect();
    grid.reserve(particles.len())?;

    let radius = 0.6;
    for step in 0..5 {
        grid.update(radius, &particles, particles.len())?;
        let mut pairs = 0;
        for k in 0..grid.num_points() {
            let i = grid.point_id(k)? as usize;
            pairs += grid.query(particles[i], radius)?.len() - 1;
        }
        log::info!("step {step}: {} particles, {pairs} neighbour pairs", particles.len());
        println!("step {step}: average {:.2} neighbours", pairs as f32 / particles.len() as f32);

        // Spread out so the neighbour count falls each step.
        for p in &mut particles {
            *p *= 1.05;
        }
    }
    Ok(())
}
