// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! BVH basics: build on both surfaces, move an item, refit, and query.
//!
//! Run:
//! - `RUST_LOG=debug cargo run -p canopy_demos --example bvh_refit`

use canopy_spatial::{Bounds3, DeviceConfig, Runtime};
use glam::Vec3;

fn main() -> Result<(), canopy_spatial::Error> {
    env_logger::init();
    let rt = Runtime::default();
    let ctx = rt.create_context(&DeviceConfig::default())?;

    let lowers = [Vec3::ZERO, Vec3::splat(2.0), Vec3::new(5.0, 0.0, 0.0)];
    let uppers = lowers.map(|l| l + Vec3::ONE);
    let host = rt.create_bvh_host(&lowers, &uppers)?;
    let device = rt.create_bvh_device(ctx, &lowers, &uppers)?;

    // Move item 2 up by ten units on both trees.
    let moved = [Bounds3::new(Vec3::new(5.0, 10.0, 0.0), Vec3::new(6.0, 11.0, 1.0))];
    rt.host().set_bvh_item_bounds(host, 2, &moved)?;
    rt.host().refit_bvh(host)?;
    rt.device().set_bvh_item_bounds(device, 2, &moved)?;
    rt.device().refit_bvh(device)?;
    rt.synchronize(ctx)?;

    let probe = Bounds3::new(Vec3::new(4.5, 9.5, 0.0), Vec3::new(5.5, 10.5, 0.5));
    let host_hits = rt.host().bvhs().with(host, |bvh| bvh.query_aabb(&probe))?;
    let device_hits = rt.device().bvhs().with(device, |bvh| bvh.query_aabb(&probe))?;
    println!("host hits: {host_hits:?}, device hits: {device_hits:?}");
    assert_eq!(host_hits, device_hits, "surfaces agree on the moved item");

    let root = rt.device().bvhs().with(device, |bvh| bvh.bounds())?;
    println!("device root: {:?} .. {:?}", root.lower, root.upper);

    rt.host().destroy_bvh(host)?;
    rt.device().destroy_bvh(device)?;
    rt.destroy_context(ctx)
}
