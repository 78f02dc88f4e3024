// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::f32::consts::{PI, TAU};

use canopy_spatial::{
    Bounds3, Bvh, BvhConfig, Config, Device, DeviceConfig, DeviceContext, ExternalSlice, HashGrid,
    Host, Mesh, SplitHeuristic, Surface,
};
use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glam::Vec3;

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f32(&mut self) -> f32 {
        let v = self.next_u64() >> 40;
        (v as f32) / ((1u64 << 24) as f32)
    }
    fn vec3(&mut self, scale: f32) -> Vec3 {
        Vec3::new(self.next_f32(), self.next_f32(), self.next_f32()) * scale
    }
}

fn gen_random_boxes(count: usize, extent: f32, size: f32) -> Vec<Bounds3> {
    let mut rng = Rng::new(0xCAFE_F00D_DEAD_BEEF);
    (0..count)
        .map(|_| {
            let lower = rng.vec3(extent);
            Bounds3::new(lower, lower + Vec3::splat(size))
        })
        .collect()
}

fn gen_points(count: usize, extent: f32) -> Vec<Vec3> {
    let mut rng = Rng::new(0xFACE_FEED_CAFE_BABE);
    (0..count).map(|_| rng.vec3(extent)).collect()
}

/// Closed UV sphere, outward facing.
fn gen_sphere(rings: u32, segments: u32) -> (Vec<Vec3>, Vec<u32>) {
    let mut points = vec![Vec3::Y];
    for r in 1..rings {
        let theta = PI * r as f32 / rings as f32;
        for s in 0..segments {
            let phi = TAU * s as f32 / segments as f32;
            points.push(Vec3::new(
                theta.sin() * phi.cos(),
                theta.cos(),
                theta.sin() * phi.sin(),
            ));
        }
    }
    points.push(-Vec3::Y);
    let south = points.len() as u32 - 1;
    let ring = |r: u32, s: u32| 1 + r * segments + s % segments;

    let mut tris = Vec::new();
    for s in 0..segments {
        tris.extend([0, ring(0, s + 1), ring(0, s)]);
        tris.extend([south, ring(rings - 2, s), ring(rings - 2, s + 1)]);
    }
    for r in 0..rings - 2 {
        for s in 0..segments {
            let (a, b) = (ring(r, s), ring(r, s + 1));
            let (c, d) = (ring(r + 1, s), ring(r + 1, s + 1));
            tris.extend([a, b, d, a, d, c]);
        }
    }
    (points, tris)
}

fn device() -> Device {
    Device::new(DeviceContext::new(&DeviceConfig::default()).expect("device context"))
}

fn bench_bvh_build_on<S: Surface>(c: &mut Criterion, name: &str, surface: &S, split: SplitHeuristic) {
    let mut group = c.benchmark_group(format!("bvh_build_{name}"));
    for &n in &[1_000_usize, 10_000, 100_000] {
        let boxes = gen_random_boxes(n, 1000.0, 4.0);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("n{n}"), |b| {
            b.iter(|| {
                let bvh = Bvh::from_bounds(surface, &boxes, &BvhConfig { split }).unwrap();
                black_box(bvh.bounds().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_bvh_build(c: &mut Criterion) {
    bench_bvh_build_on(c, "host_median", &Host, SplitHeuristic::Median);
    bench_bvh_build_on(c, "host_sah", &Host, SplitHeuristic::Sah);
    bench_bvh_build_on(c, "device_lbvh", &device(), SplitHeuristic::Median);
}

fn bench_bvh_refit_and_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("bvh_refit_query");
    let n = 50_000;
    let boxes = gen_random_boxes(n, 1000.0, 4.0);
    let query = Bounds3::new(Vec3::splat(400.0), Vec3::splat(600.0));
    let dev = device();
    let host_bvh = Bvh::from_bounds(&Host, &boxes, &BvhConfig::default()).unwrap();
    let dev_bvh = Bvh::from_bounds(&dev, &boxes, &BvhConfig::default()).unwrap();
    group.throughput(Throughput::Elements(n as u64));

    group.bench_function("host_refit", |b| {
        b.iter(|| host_bvh.refit().unwrap());
    });
    group.bench_function("device_refit_sync", |b| {
        b.iter(|| {
            dev_bvh.refit().unwrap();
            dev.synchronize().unwrap();
        });
    });
    group.bench_function("host_query_aabb", |b| {
        b.iter(|| black_box(host_bvh.query_aabb(&query).unwrap().len()));
    });
    group.bench_function("device_query_aabb", |b| {
        b.iter(|| black_box(dev_bvh.query_aabb(&query).unwrap().len()));
    });
    group.finish();
}

fn bench_hash_grid<S: Surface>(c: &mut Criterion, name: &str, surface: &S) {
    let mut group = c.benchmark_group(format!("hash_grid_{name}"));
    for &n in &[10_000_usize, 100_000] {
        let points = gen_points(n, 100.0);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("update_n{n}"), |b| {
            b.iter_batched(
                || HashGrid::new(surface, [128, 128, 128]).unwrap(),
                |mut grid| {
                    grid.update(1.0, &points, n).unwrap();
                    black_box(grid.point_id(0).unwrap());
                },
                BatchSize::SmallInput,
            );
        });

        let mut grid = HashGrid::new(surface, [128, 128, 128]).unwrap();
        grid.update(1.0, &points, n).unwrap();
        group.bench_function(format!("query_1k_n{n}"), |b| {
            b.iter(|| {
                let mut hits = 0;
                for p in &points[..1000] {
                    hits += grid.query(*p, 1.0).unwrap().len();
                }
                black_box(hits);
            });
        });
    }
    group.finish();
}

fn bench_hash_grids(c: &mut Criterion) {
    bench_hash_grid(c, "host", &Host);
    bench_hash_grid(c, "device", &device());
}

fn bench_mesh<S: Surface>(c: &mut Criterion, name: &str, surface: &S) {
    let mut group = c.benchmark_group(format!("mesh_{name}"));
    let (points, tris) = gen_sphere(128, 256);
    let num_tris = tris.len() / 3;
    let points: &'static [Vec3] = points.leak();
    let tris: &'static [u32] = tris.leak();
    let mesh = Mesh::new(
        surface,
        ExternalSlice::from_static(points),
        None,
        ExternalSlice::from_static(tris),
        points.len(),
        num_tris,
        true,
        &Config::default(),
    )
    .unwrap();
    let probes = gen_points(1000, 3.0)
        .into_iter()
        .map(|p| p - Vec3::splat(1.5))
        .collect::<Vec<_>>();
    group.throughput(Throughput::Elements(probes.len() as u64));

    group.bench_function("refit", |b| {
        b.iter(|| {
            mesh.refit().unwrap();
            surface.synchronize().unwrap();
        });
    });
    group.bench_function("closest_point", |b| {
        b.iter(|| {
            for p in &probes {
                black_box(mesh.query_point(*p, f32::INFINITY).unwrap());
            }
        });
    });
    group.bench_function("is_inside", |b| {
        b.iter(|| {
            let inside = probes.iter().filter(|p| mesh.is_inside(**p).unwrap()).count();
            black_box(inside);
        });
    });
    group.finish();
}

fn bench_meshes(c: &mut Criterion) {
    bench_mesh(c, "host", &Host);
    bench_mesh(c, "device", &device());
}

criterion_group!(
    benches,
    bench_bvh_build,
    bench_bvh_refit_and_query,
    bench_hash_grids,
    bench_meshes,
);
criterion_main!(benches);
