// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg(feature = "compare_rstar")]

use canopy_spatial::{Bounds3, Bvh, BvhConfig, Device, DeviceConfig, DeviceContext, Host, SplitHeuristic};
use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glam::Vec3;

use rstar::primitives::Rectangle;
use rstar::{AABB, RTree};

fn gen_lattice_boxes(n: usize, cell: f32) -> Vec<Bounds3> {
    let mut out = Vec::with_capacity(n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let lower = Vec3::new(x as f32, y as f32, z as f32) * cell;
                out.push(Bounds3::new(lower, lower + Vec3::splat(cell)));
            }
        }
    }
    out
}

fn to_rstar_boxes(v: &[Bounds3]) -> Vec<Rectangle<[f32; 3]>> {
    v.iter()
        .map(|b| Rectangle::from_corners(b.lower.to_array(), b.upper.to_array()))
        .collect()
}

fn bench_bvh_external_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("bvh_external_compare");
    let device = Device::new(DeviceContext::new(&DeviceConfig::default()).expect("device context"));
    for &n in &[16_usize, 32] {
        let boxes = gen_lattice_boxes(n, 10.0);
        let query = Bounds3::new(Vec3::splat(40.0), Vec3::splat(120.0));
        group.throughput(Throughput::Elements((n * n * n) as u64));

        group.bench_function(format!("canopy_host_sah_build_query_n{n}"), |b| {
            b.iter(|| {
                let config = BvhConfig {
                    split: SplitHeuristic::Sah,
                };
                let bvh = Bvh::from_bounds(&Host, &boxes, &config).unwrap();
                black_box(bvh.query_aabb(&query).unwrap().len());
            });
        });

        group.bench_function(format!("canopy_device_lbvh_build_query_n{n}"), |b| {
            b.iter(|| {
                let bvh = Bvh::from_bounds(&device, &boxes, &BvhConfig::default()).unwrap();
                black_box(bvh.query_aabb(&query).unwrap().len());
            });
        });

        group.bench_function(format!("rstar_build_query_bulk_n{n}"), |b| {
            b.iter_batched(
                || to_rstar_boxes(&boxes),
                |rectangles| {
                    let tree = RTree::bulk_load(rectangles);
                    let aabb = AABB::from_corners(query.lower.to_array(), query.upper.to_array());
                    let hits = tree.locate_in_envelope_intersecting(&aabb).count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bvh_external_compare);
criterion_main!(benches);
