// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binary bounding volume hierarchy over axis-aligned boxes.
//!
//! A tree over `n` items always has exactly `2n - 1` nodes with the root at
//! index 0. The topology is fixed when the tree is built; [`Bvh::refit`]
//! only recomputes boxes bottom-up from the current item boxes.
//!
//! The host surface builds top-down by recursive partition (see
//! [`SplitHeuristic`]). The device surface builds a linear BVH: items are
//! sorted by the Morton code of their centroid and a radix tree over the
//! sorted codes is emitted with one independent launch lane per internal
//! node. Either way, refit walks the tree one height level at a time so
//! that every level is a single parallel launch.

use glam::Vec3;

use crate::config::{BvhConfig, SplitHeuristic};
use crate::error::{Error, Result};
use crate::surface::{Buffer, Launcher, Surface, SurfaceKind};
use crate::types::Bounds3;

/// Leaf or internal node payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// References one item.
    Leaf {
        /// Item index in `[0, num_items)`.
        item: u32,
    },
    /// Two child node indices.
    Internal {
        /// Left child.
        left: u32,
        /// Right child.
        right: u32,
    },
}

/// A node and the box enclosing everything below it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BvhNode {
    /// Enclosing box.
    pub bounds: Bounds3,
    /// Payload.
    pub kind: NodeKind,
}

impl Default for BvhNode {
    fn default() -> Self {
        Self {
            bounds: Bounds3::EMPTY,
            kind: NodeKind::Leaf { item: 0 },
        }
    }
}

/// Bounding volume hierarchy whose storage lives on an execution surface.
#[derive(Debug)]
pub struct Bvh<S: Surface> {
    surface: S,
    num_items: usize,
    nodes: Buffer<BvhNode>,
    item_bounds: Buffer<Bounds3>,
    /// Node ids ordered by height, leaves first.
    schedule: Buffer<u32>,
    /// Exclusive end of each height level in `schedule`.
    level_ends: Buffer<u32>,
}

impl<S: Surface> Bvh<S> {
    /// Build from per-item lower and upper corners.
    pub fn new(surface: &S, lowers: &[Vec3], uppers: &[Vec3], config: &BvhConfig) -> Result<Self> {
        if lowers.len() != uppers.len() {
            return Err(Error::invalid_argument(format!(
                "{} lower corners but {} upper corners",
                lowers.len(),
                uppers.len()
            )));
        }
        let bounds: Vec<Bounds3> = lowers
            .iter()
            .zip(uppers)
            .map(|(&lower, &upper)| Bounds3::new(lower, upper))
            .collect();
        Self::from_bounds(surface, &bounds, config)
    }

    /// Build from item boxes.
    pub fn from_bounds(surface: &S, bounds: &[Bounds3], config: &BvhConfig) -> Result<Self> {
        validate_item_count(bounds.len())?;
        validate_boxes(0, bounds)?;
        let bvh = Self::allocate(surface, bounds.len())?;
        surface.upload(&bvh.item_bounds, 0, bounds)?;
        bvh.build(config.split)?;
        bvh.refit()?;
        Ok(bvh)
    }

    /// Allocate storage and build over boxes a later job writes into
    /// [`Self::item_bounds_buffer`].
    pub(crate) fn with_pending_bounds(
        surface: &S,
        num_items: usize,
        config: &BvhConfig,
        fill: impl FnOnce(&Launcher, &mut [Bounds3]) -> Result<()> + Send + 'static,
    ) -> Result<Self> {
        validate_item_count(num_items)?;
        let bvh = Self::allocate(surface, num_items)?;
        let item_bounds = bvh.item_bounds.clone();
        surface.submit("bvh item bounds", move |launch| fill(launch, &mut item_bounds.write()))?;
        bvh.build(config.split)?;
        bvh.refit()?;
        Ok(bvh)
    }

    fn allocate(surface: &S, num_items: usize) -> Result<Self> {
        let num_nodes = 2 * num_items - 1;
        Ok(Self {
            surface: surface.clone(),
            num_items,
            nodes: surface.alloc(num_nodes)?,
            item_bounds: surface.alloc(num_items)?,
            schedule: surface.alloc(num_nodes)?,
            level_ends: surface.alloc(num_items)?,
        })
    }

    fn build(&self, split: SplitHeuristic) -> Result<()> {
        let kind = self.surface.kind();
        let nodes = self.nodes.clone();
        let item_bounds = self.item_bounds.clone();
        let schedule = self.schedule.clone();
        let level_ends = self.level_ends.clone();
        self.surface.submit("bvh build", move |launch| {
            let mut nodes = nodes.write();
            {
                let item_bounds = item_bounds.read();
                match kind {
                    SurfaceKind::Host => build_top_down(&item_bounds, split, &mut nodes),
                    SurfaceKind::Device => build_linear(launch, &item_bounds, &mut nodes),
                }
            }
            plan_levels(&nodes, &mut schedule.write(), &mut level_ends.write());
            Ok(())
        })
    }

    /// Recompute every internal box from the current item boxes.
    pub fn refit(&self) -> Result<()> {
        log::trace!("bvh refit over {} items", self.num_items);
        let nodes = self.nodes.clone();
        let item_bounds = self.item_bounds.clone();
        let schedule = self.schedule.clone();
        let level_ends = self.level_ends.clone();
        self.surface.submit("bvh refit", move |launch| {
            let mut nodes = nodes.write();
            let item_bounds = item_bounds.read();
            let mut boxes = vec![Bounds3::EMPTY; nodes.len()];
            reduce_levels(
                launch,
                &nodes,
                &schedule.read(),
                &level_ends.read(),
                &mut boxes,
                |item| item_bounds[item as usize],
                |a, b| a.union(&b),
            );
            for (node, bounds) in nodes.iter_mut().zip(boxes) {
                node.bounds = bounds;
            }
            Ok(())
        })
    }

    /// Overwrite item boxes starting at `first`. Call [`Self::refit`] afterwards.
    pub fn write_item_bounds(&self, first: usize, bounds: &[Bounds3]) -> Result<()> {
        validate_boxes(first, bounds)?;
        self.surface.upload(&self.item_bounds, first, bounds)
    }

    /// Items whose boxes overlap `query`, ascending.
    pub fn query_aabb(&self, query: &Bounds3) -> Result<Vec<u32>> {
        self.surface.synchronize()?;
        let mut hits = self.collect_leaves(|bounds| bounds.overlaps(query));
        hits.sort_unstable();
        Ok(hits)
    }

    /// Items whose boxes the ray `origin + t * dir, t in [0, max_t]` passes through, ascending.
    pub fn query_ray(&self, origin: Vec3, dir: Vec3, max_t: f32) -> Result<Vec<u32>> {
        self.surface.synchronize()?;
        let inv_dir = dir.recip();
        let mut hits =
            self.collect_leaves(|bounds| bounds.intersect_ray(origin, inv_dir, max_t).is_some());
        hits.sort_unstable();
        Ok(hits)
    }

    fn collect_leaves(&self, accept: impl Fn(&Bounds3) -> bool) -> Vec<u32> {
        let nodes = self.nodes.read();
        let mut out = Vec::new();
        let mut stack = vec![0_u32];
        while let Some(i) = stack.pop() {
            let node = &nodes[i as usize];
            if !accept(&node.bounds) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { item } => out.push(item),
                NodeKind::Internal { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        out
    }

    /// Root box.
    pub fn bounds(&self) -> Result<Bounds3> {
        self.surface.synchronize()?;
        Ok(self.nodes.read()[0].bounds)
    }

    /// Copy of every node, root first.
    pub fn nodes(&self) -> Result<Vec<BvhNode>> {
        self.surface.download(&self.nodes)
    }

    /// Copy of the item boxes.
    pub fn item_bounds(&self) -> Result<Vec<Bounds3>> {
        self.surface.download(&self.item_bounds)
    }

    /// Number of items (leaves).
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Number of nodes, always `2 * num_items - 1`.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The surface this tree lives on.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub(crate) fn node_buffer(&self) -> &Buffer<BvhNode> {
        &self.nodes
    }

    pub(crate) fn item_bounds_buffer(&self) -> &Buffer<Bounds3> {
        &self.item_bounds
    }

    pub(crate) fn level_buffers(&self) -> (&Buffer<u32>, &Buffer<u32>) {
        (&self.schedule, &self.level_ends)
    }
}

fn validate_item_count(n: usize) -> Result<()> {
    if n == 0 {
        return Err(Error::invalid_argument("a BVH needs at least one item"));
    }
    if n > (u32::MAX / 2) as usize {
        return Err(Error::invalid_argument(format!("{n} items exceed the node index range")));
    }
    Ok(())
}

fn validate_boxes(first: usize, bounds: &[Bounds3]) -> Result<()> {
    match bounds.iter().position(|b| !b.is_valid()) {
        Some(i) => Err(Error::invalid_argument(format!(
            "item {} has lower {} above upper {}",
            first + i,
            bounds[i].lower,
            bounds[i].upper
        ))),
        None => Ok(()),
    }
}

/// Evaluate a bottom-up reduction over the tree, one height level per launch.
///
/// `out[node]` receives `leaf(item)` for leaves and `merge(out[left], out[right])`
/// for internal nodes.
pub(crate) fn reduce_levels<T, L, M>(
    launch: &Launcher,
    nodes: &[BvhNode],
    schedule: &[u32],
    level_ends: &[u32],
    out: &mut [T],
    leaf: L,
    merge: M,
) where
    T: Copy + Default + Send + Sync,
    L: Fn(u32) -> T + Sync + Send,
    M: Fn(T, T) -> T + Sync + Send,
{
    let total = nodes.len();
    let mut start = 0;
    for &end in level_ends {
        let end = end as usize;
        let level = &schedule[start..end];
        let mut values = vec![T::default(); level.len()];
        {
            let done: &[T] = out;
            launch.launch(&mut values, |k| match nodes[level[k] as usize].kind {
                NodeKind::Leaf { item } => leaf(item),
                NodeKind::Internal { left, right } => {
                    merge(done[left as usize], done[right as usize])
                }
            });
        }
        for (&node, value) in level.iter().zip(values) {
            out[node as usize] = value;
        }
        if end == total {
            break;
        }
        start = end;
    }
}

/// Group nodes by height so each level only depends on the ones before it.
#[allow(
    clippy::cast_possible_truncation,
    reason = "Node indices fit in u32 after validation."
)]
fn plan_levels(nodes: &[BvhNode], schedule: &mut [u32], level_ends: &mut [u32]) {
    let total = nodes.len();
    let mut preorder = Vec::with_capacity(total);
    let mut stack = vec![0_u32];
    while let Some(i) = stack.pop() {
        preorder.push(i);
        if let NodeKind::Internal { left, right } = nodes[i as usize].kind {
            stack.push(left);
            stack.push(right);
        }
    }
    let mut height = vec![0_u32; total];
    for &i in preorder.iter().rev() {
        if let NodeKind::Internal { left, right } = nodes[i as usize].kind {
            height[i as usize] = 1 + height[left as usize].max(height[right as usize]);
        }
    }

    // Counting sort by height.
    let levels = height[0] as usize + 1;
    let mut counts = vec![0_u32; levels];
    for &h in &height {
        counts[h as usize] += 1;
    }
    let mut cursor = vec![0_u32; levels];
    let mut end = 0;
    for (h, count) in counts.iter().enumerate() {
        cursor[h] = end;
        end += count;
        level_ends[h] = end;
    }
    level_ends[levels..].fill(end);
    for (node, &h) in height.iter().enumerate() {
        let slot = &mut cursor[h as usize];
        schedule[*slot as usize] = node as u32;
        *slot += 1;
    }
}

/// Top-down partition. Children are always stored after their parent.
#[allow(
    clippy::cast_possible_truncation,
    reason = "Item indices fit in u32 after validation."
)]
fn build_top_down(bounds: &[Bounds3], split: SplitHeuristic, nodes: &mut [BvhNode]) {
    let n = bounds.len();
    let mut items: Vec<u32> = (0..n as u32).collect();
    let mut next = 1_u32;
    let mut stack = vec![(0_u32, 0_usize, n)];
    while let Some((node, start, end)) = stack.pop() {
        let range = &mut items[start..end];
        if range.len() == 1 {
            nodes[node as usize] = BvhNode {
                bounds: Bounds3::EMPTY,
                kind: NodeKind::Leaf { item: range[0] },
            };
            continue;
        }
        let mid = start
            + match split {
                SplitHeuristic::Median => split_median(range, bounds),
                SplitHeuristic::Sah => split_sah(range, bounds),
            };
        let (left, right) = (next, next + 1);
        next += 2;
        nodes[node as usize] = BvhNode {
            bounds: Bounds3::EMPTY,
            kind: NodeKind::Internal { left, right },
        };
        stack.push((right, mid, end));
        stack.push((left, start, mid));
    }
    debug_assert_eq!(next as usize, nodes.len(), "every node slot is filled");
}

fn centroid_axis(bounds: &[Bounds3], item: u32, axis: usize) -> f32 {
    bounds[item as usize].center()[axis]
}

/// Split the longest centroid axis at the median. Returns the left size.
fn split_median(range: &mut [u32], bounds: &[Bounds3]) -> usize {
    let mut centroids = Bounds3::EMPTY;
    for &i in range.iter() {
        centroids.grow(bounds[i as usize].center());
    }
    let axis = centroids.longest_axis();
    let mid = range.len() / 2;
    range.select_nth_unstable_by(mid, |&a, &b| {
        centroid_axis(bounds, a, axis).total_cmp(&centroid_axis(bounds, b, axis))
    });
    mid
}

/// Sort along each axis, precompute prefix/suffix boxes, and choose `k`
/// minimizing `area(LB_k) * k + area(RB_k) * (n - k)`. Returns the left size.
fn split_sah(range: &mut [u32], bounds: &[Bounds3]) -> usize {
    let n = range.len();
    // (cost, imbalance, axis, k)
    let mut best: Option<(f64, usize, usize, usize)> = None;
    let mut suffix = vec![Bounds3::EMPTY; n];
    for axis in 0..3 {
        range.sort_unstable_by(|&a, &b| {
            centroid_axis(bounds, a, axis).total_cmp(&centroid_axis(bounds, b, axis))
        });
        let mut acc = Bounds3::EMPTY;
        for (slot, &i) in suffix.iter_mut().zip(range.iter()).rev() {
            acc = acc.union(&bounds[i as usize]);
            *slot = acc;
        }
        let mut prefix = Bounds3::EMPTY;
        for k in 1..n {
            prefix = prefix.union(&bounds[range[k - 1] as usize]);
            let cost = prefix.surface_area() * k as f64 + suffix[k].surface_area() * (n - k) as f64;
            let imbalance = (2 * k).abs_diff(n);
            if best.is_none_or(|(c, im, _, _)| cost < c || (cost == c && imbalance < im)) {
                best = Some((cost, imbalance, axis, k));
            }
        }
    }
    let (_, _, axis, k) = best.unwrap_or((0.0, 0, 2, n / 2));
    if axis != 2 {
        range.sort_unstable_by(|&a, &b| {
            centroid_axis(bounds, a, axis).total_cmp(&centroid_axis(bounds, b, axis))
        });
    }
    k
}

/// Spread the low 10 bits of `v` so there are two zero bits between each.
fn expand_bits(v: u32) -> u32 {
    let mut v = v & 0x3ff;
    v = (v | (v << 16)) & 0x0300_00ff;
    v = (v | (v << 8)) & 0x0300_f00f;
    v = (v | (v << 4)) & 0x030c_30c3;
    v = (v | (v << 2)) & 0x0924_9249;
    v
}

/// 30-bit Morton code of a point normalized to the unit cube.
#[allow(
    clippy::cast_possible_truncation,
    reason = "Coordinates are clamped to [0, 1023] before conversion."
)]
fn morton3(unit: Vec3) -> u32 {
    let q = (unit * 1024.0).clamp(Vec3::ZERO, Vec3::splat(1023.0));
    (expand_bits(q.x as u32) << 2) | (expand_bits(q.y as u32) << 1) | expand_bits(q.z as u32)
}

/// Linear BVH: internal node `i` at index `i`, leaf `j` at `n - 1 + j`.
#[allow(
    clippy::cast_possible_truncation,
    reason = "Node and item indices fit in u32 after validation."
)]
fn build_linear(launch: &Launcher, bounds: &[Bounds3], nodes: &mut [BvhNode]) {
    let n = bounds.len();
    let scene = launch.map_reduce(
        n,
        Bounds3::EMPTY,
        |i| Bounds3::from_point(bounds[i].center()),
        |a, b| a.union(&b),
    );
    let extent = scene.extents();
    let scale = Vec3::select(extent.cmpgt(Vec3::ZERO), extent.recip(), Vec3::ZERO);

    let mut keys = vec![0_u64; n];
    launch.launch(&mut keys, |i| {
        let code = morton3((bounds[i].center() - scene.lower) * scale);
        (u64::from(code) << 32) | i as u64
    });
    launch.sort_unstable(&mut keys);

    let (internal, leaves) = nodes.split_at_mut(n - 1);
    launch.launch(leaves, |j| BvhNode {
        bounds: Bounds3::EMPTY,
        kind: NodeKind::Leaf {
            item: keys[j] as u32,
        },
    });
    let keys = &keys;
    launch.launch(internal, |i| radix_node(keys, i));
}

/// Children of internal node `i` of the radix tree over unique sorted keys.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    reason = "Key indices are bounded by the validated item count."
)]
fn radix_node(keys: &[u64], i: usize) -> BvhNode {
    let n = keys.len() as i64;
    let i = i as i64;
    let delta = |a: i64, b: i64| -> i32 {
        if (0..n).contains(&b) {
            (keys[a as usize] ^ keys[b as usize]).leading_zeros() as i32
        } else {
            -1
        }
    };

    let d: i64 = if delta(i, i + 1) > delta(i, i - 1) { 1 } else { -1 };
    let delta_min = delta(i, i - d);
    let mut max_len = 2;
    while delta(i, i + max_len * d) > delta_min {
        max_len *= 2;
    }
    let mut len = 0;
    let mut t = max_len / 2;
    while t >= 1 {
        if delta(i, i + (len + t) * d) > delta_min {
            len += t;
        }
        t /= 2;
    }
    let j = i + len * d;

    let delta_node = delta(i, j);
    let mut split = 0;
    let mut t = len;
    loop {
        t = (t + 1) / 2;
        if delta(i, i + (split + t) * d) > delta_node {
            split += t;
        }
        if t == 1 {
            break;
        }
    }
    let gamma = i + split * d + d.min(0);

    let leaf_base = n - 1;
    let left = if i.min(j) == gamma { leaf_base + gamma } else { gamma };
    let right = if i.max(j) == gamma + 1 {
        leaf_base + gamma + 1
    } else {
        gamma + 1
    };
    BvhNode {
        bounds: Bounds3::EMPTY,
        kind: NodeKind::Internal {
            left: left as u32,
            right: right as u32,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::DeviceContext;
    use crate::surface::{Device, Host};

    pub(crate) fn device() -> Device {
        Device::new(
            DeviceContext::new(&DeviceConfig {
                memory_budget: None,
                worker_threads: Some(4),
            })
            .unwrap(),
        )
    }

    /// Deterministic pseudo-random floats in `[0, 1)`.
    pub(crate) struct Lcg(pub(crate) u64);

    impl Lcg {
        pub(crate) fn next(&mut self) -> f32 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (self.0 >> 40) as f32 / (1_u64 << 24) as f32
        }

        pub(crate) fn vec3(&mut self, scale: f32) -> Vec3 {
            Vec3::new(self.next(), self.next(), self.next()) * scale
        }
    }

    fn random_boxes(n: usize, seed: u64) -> Vec<Bounds3> {
        let mut rng = Lcg(seed);
        (0..n)
            .map(|_| {
                let lower = rng.vec3(100.0);
                Bounds3::new(lower, lower + rng.vec3(5.0))
            })
            .collect()
    }

    /// Every item appears in exactly one leaf with its own box, and every
    /// internal box is exactly the union of its children.
    fn assert_valid_tree(nodes: &[BvhNode], items: &[Bounds3]) {
        assert_eq!(nodes.len(), 2 * items.len() - 1, "node count is 2n - 1");
        let mut seen = vec![false; items.len()];
        let mut stack = vec![0_u32];
        let mut visited = 0;
        while let Some(i) = stack.pop() {
            visited += 1;
            let node = nodes[i as usize];
            match node.kind {
                NodeKind::Leaf { item } => {
                    assert!(!seen[item as usize], "item {item} appears twice");
                    seen[item as usize] = true;
                    assert_eq!(node.bounds, items[item as usize], "leaf box equals item box");
                }
                NodeKind::Internal { left, right } => {
                    let merged = nodes[left as usize].bounds.union(&nodes[right as usize].bounds);
                    assert_eq!(node.bounds, merged, "internal box is the union of children");
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        assert_eq!(visited, nodes.len(), "every node is reachable from the root");
        assert!(seen.iter().all(|s| *s), "every item has a leaf");
    }

    fn brute_overlaps(items: &[Bounds3], query: &Bounds3) -> Vec<u32> {
        (0..items.len() as u32)
            .filter(|&i| items[i as usize].overlaps(query))
            .collect()
    }

    #[test]
    fn two_boxes_root_encloses_both() {
        let lowers = [Vec3::ZERO, Vec3::splat(2.0)];
        let uppers = [Vec3::ONE, Vec3::splat(3.0)];
        let expected = Bounds3::new(Vec3::ZERO, Vec3::splat(3.0));

        let host = Bvh::new(&Host, &lowers, &uppers, &BvhConfig::default()).unwrap();
        assert_eq!(host.num_nodes(), 3);
        assert_eq!(host.bounds().unwrap(), expected);

        let dev = Bvh::new(&device(), &lowers, &uppers, &BvhConfig::default()).unwrap();
        assert_eq!(dev.num_nodes(), 3);
        assert_eq!(dev.bounds().unwrap(), expected);
    }

    #[test]
    fn single_item_is_a_leaf_root() {
        let b = Bounds3::new(Vec3::ZERO, Vec3::ONE);
        for tree in [
            Bvh::from_bounds(&Host, &[b], &BvhConfig::default()).unwrap().nodes().unwrap(),
            Bvh::from_bounds(&device(), &[b], &BvhConfig::default()).unwrap().nodes().unwrap(),
        ] {
            assert_eq!(tree, vec![BvhNode { bounds: b, kind: NodeKind::Leaf { item: 0 } }]);
        }
    }

    #[test]
    fn every_builder_produces_a_valid_tree() {
        let items = random_boxes(257, 7);
        let sah = BvhConfig {
            split: SplitHeuristic::Sah,
        };
        let median = Bvh::from_bounds(&Host, &items, &BvhConfig::default()).unwrap();
        let sah = Bvh::from_bounds(&Host, &items, &sah).unwrap();
        let linear = Bvh::from_bounds(&device(), &items, &BvhConfig::default()).unwrap();

        assert_valid_tree(&median.nodes().unwrap(), &items);
        assert_valid_tree(&sah.nodes().unwrap(), &items);
        assert_valid_tree(&linear.nodes().unwrap(), &items);
        assert_eq!(median.bounds().unwrap(), linear.bounds().unwrap());
        assert_eq!(sah.bounds().unwrap(), linear.bounds().unwrap());
    }

    #[test]
    fn duplicate_centroids_still_build() {
        let items = vec![Bounds3::new(Vec3::ZERO, Vec3::ONE); 33];
        for split in [SplitHeuristic::Median, SplitHeuristic::Sah] {
            let bvh = Bvh::from_bounds(&Host, &items, &BvhConfig { split }).unwrap();
            assert_valid_tree(&bvh.nodes().unwrap(), &items);
        }
        let bvh = Bvh::from_bounds(&device(), &items, &BvhConfig::default()).unwrap();
        assert_valid_tree(&bvh.nodes().unwrap(), &items);
    }

    #[test]
    fn queries_match_brute_force_on_both_surfaces() {
        let items = random_boxes(300, 99);
        let host = Bvh::from_bounds(&Host, &items, &BvhConfig::default()).unwrap();
        let dev = Bvh::from_bounds(&device(), &items, &BvhConfig::default()).unwrap();
        let mut rng = Lcg(5);
        for _ in 0..50 {
            let lower = rng.vec3(100.0);
            let query = Bounds3::new(lower, lower + rng.vec3(20.0));
            let expected = brute_overlaps(&items, &query);
            assert_eq!(host.query_aabb(&query).unwrap(), expected);
            assert_eq!(dev.query_aabb(&query).unwrap(), expected);
        }
    }

    #[test]
    fn ray_query_finds_boxes_along_the_ray() {
        let items: Vec<_> = (0..10)
            .map(|i| {
                let x = i as f32 * 3.0;
                Bounds3::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
            })
            .collect();
        let bvh = Bvh::from_bounds(&Host, &items, &BvhConfig::default()).unwrap();
        let origin = Vec3::new(-1.0, 0.5, 0.5);
        assert_eq!(bvh.query_ray(origin, Vec3::X, f32::INFINITY).unwrap(), (0..10).collect::<Vec<_>>());
        assert_eq!(bvh.query_ray(origin, Vec3::X, 5.0).unwrap(), vec![0, 1]);
        assert!(bvh.query_ray(origin, Vec3::Y, f32::INFINITY).unwrap().is_empty());
    }

    #[test]
    fn refit_tracks_moved_items_without_changing_topology() {
        let mut items = random_boxes(64, 3);
        let host = Bvh::from_bounds(&Host, &items, &BvhConfig::default()).unwrap();
        let dev = Bvh::from_bounds(&device(), &items, &BvhConfig::default()).unwrap();
        let kinds = |nodes: Vec<BvhNode>| nodes.into_iter().map(|n| n.kind).collect::<Vec<_>>();
        let host_before = kinds(host.nodes().unwrap());
        let dev_before = kinds(dev.nodes().unwrap());

        let moved = [
            Bounds3::new(Vec3::splat(500.0), Vec3::splat(501.0)),
            Bounds3::new(Vec3::splat(-50.0), Vec3::splat(-49.0)),
        ];
        items[10] = moved[0];
        items[11] = moved[1];
        host.write_item_bounds(10, &moved).unwrap();
        host.refit().unwrap();
        dev.write_item_bounds(10, &moved).unwrap();
        dev.refit().unwrap();

        assert_valid_tree(&host.nodes().unwrap(), &items);
        assert_valid_tree(&dev.nodes().unwrap(), &items);
        assert_eq!(kinds(host.nodes().unwrap()), host_before);
        assert_eq!(kinds(dev.nodes().unwrap()), dev_before);
        let root = Bounds3::new(Vec3::splat(-50.0), Vec3::splat(501.0));
        assert_eq!(host.bounds().unwrap(), root);
        assert_eq!(dev.bounds().unwrap(), root);
    }

    #[test]
    fn refit_without_changes_is_idempotent() {
        let items = random_boxes(50, 11);
        let bvh = Bvh::from_bounds(&device(), &items, &BvhConfig::default()).unwrap();
        let before = bvh.nodes().unwrap();
        bvh.refit().unwrap();
        assert_eq!(bvh.nodes().unwrap(), before);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let cfg = BvhConfig::default();
        assert!(matches!(
            Bvh::from_bounds(&Host, &[], &cfg),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Bvh::new(&Host, &[Vec3::ZERO], &[], &cfg),
            Err(Error::InvalidArgument(_))
        ));
        let inverted = Bounds3::new(Vec3::ONE, Vec3::ZERO);
        assert!(matches!(
            Bvh::from_bounds(&device(), &[inverted], &cfg),
            Err(Error::InvalidArgument(_))
        ));
        let nan = Bounds3::new(Vec3::NAN, Vec3::ONE);
        assert!(matches!(
            Bvh::from_bounds(&Host, &[nan], &cfg),
            Err(Error::InvalidArgument(_))
        ));
        let bvh = Bvh::from_bounds(&Host, &[Bounds3::new(Vec3::ZERO, Vec3::ONE)], &cfg).unwrap();
        assert!(bvh.write_item_bounds(1, &[Bounds3::new(Vec3::ZERO, Vec3::ONE)]).is_err());
        assert!(bvh.write_item_bounds(0, &[inverted]).is_err());
    }

    #[test]
    fn morton_codes_interleave_axes() {
        assert_eq!(morton3(Vec3::ZERO), 0);
        assert_eq!(morton3(Vec3::ONE), (1 << 30) - 1);
        assert!(morton3(Vec3::new(0.9, 0.0, 0.0)) > morton3(Vec3::new(0.0, 0.9, 0.0)));
    }
}
