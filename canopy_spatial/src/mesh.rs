// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Triangle mesh queries over caller-owned vertex and index buffers.
//!
//! A [`Mesh`] never copies vertex data. It holds [`ExternalSlice`] views of
//! the caller's points, optional velocities and triangle indices, and owns
//! only derived data: a BVH over triangle boxes and, when requested,
//! per-node [`WindingNode`] aggregates. [`Mesh::refit`] re-reads the
//! current buffer contents, so callers may move vertices in place between
//! refits.

use glam::Vec3;

use crate::bvh::{Bvh, NodeKind, reduce_levels};
use crate::config::Config;
use crate::config::WindingConfig;
use crate::error::{Error, Result};
use crate::external::ExternalSlice;
use crate::geometry::{closest_point_on_triangle, intersect_ray_triangle};
use crate::surface::{Buffer, Surface};
use crate::types::Bounds3;
use crate::winding::{WindingNode, winding_number};

/// Closest point on a mesh.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeshPoint {
    /// Triangle index.
    pub face: u32,
    /// Barycentric weight of the triangle's first vertex.
    pub u: f32,
    /// Barycentric weight of the triangle's second vertex.
    pub v: f32,
    /// The closest point, `u * a + v * b + (1 - u - v) * c`.
    pub point: Vec3,
    /// Distance from the query point.
    pub distance: f32,
    /// `-1` inside, `+1` outside, `0` when no sign was requested.
    pub sign: f32,
}

/// Nearest ray hit on a mesh.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeshRayHit {
    /// Triangle index.
    pub face: u32,
    /// Distance along the ray direction.
    pub t: f32,
    /// Barycentric weight of the triangle's first vertex.
    pub u: f32,
    /// Barycentric weight of the triangle's second vertex.
    pub v: f32,
    /// `+1` for a front-face hit, `-1` for a back-face hit.
    pub sign: f32,
    /// Unit face normal.
    pub normal: Vec3,
}

/// The caller-owned buffers, copied into every job that reads them.
#[derive(Copy, Clone, Debug)]
struct MeshView {
    points: ExternalSlice<Vec3>,
    velocities: Option<ExternalSlice<Vec3>>,
    indices: ExternalSlice<u32>,
    num_points: usize,
}

impl MeshView {
    fn vertex_ids(&self, face: usize) -> Result<[usize; 3]> {
        let indices = self.indices.as_slice();
        let mut ids = [0; 3];
        for (k, id) in ids.iter_mut().enumerate() {
            *id = indices[3 * face + k] as usize;
            if *id >= self.num_points {
                return Err(Error::invalid_argument(format!(
                    "triangle {face} references vertex {id} of {}",
                    self.num_points
                )));
            }
        }
        Ok(ids)
    }

    fn triangle(&self, face: usize) -> Result<[Vec3; 3]> {
        let points = self.points.as_slice();
        Ok(self.vertex_ids(face)?.map(|i| points[i]))
    }
}

/// Triangle mesh with a BVH and optional winding number support.
#[derive(Debug)]
pub struct Mesh<S: Surface> {
    view: MeshView,
    num_tris: usize,
    bvh: Bvh<S>,
    winding: Option<Buffer<WindingNode>>,
    winding_config: WindingConfig,
}

impl<S: Surface> Mesh<S> {
    /// Build over `num_tris` triangles (three indices each) into `num_points` points.
    ///
    /// Every index is checked against `num_points` here; later refits read
    /// the indices again without a full revalidation pass.
    pub fn new(
        surface: &S,
        points: ExternalSlice<Vec3>,
        velocities: Option<ExternalSlice<Vec3>>,
        indices: ExternalSlice<u32>,
        num_points: usize,
        num_tris: usize,
        support_winding_number: bool,
        config: &Config,
    ) -> Result<Self> {
        if num_points == 0 || num_tris == 0 {
            return Err(Error::invalid_argument(format!(
                "a mesh needs points and triangles, got {num_points} points and {num_tris} triangles"
            )));
        }
        if num_points > u32::MAX as usize {
            return Err(Error::invalid_argument(format!("{num_points} points exceed the index range")));
        }
        let index_count = num_tris
            .checked_mul(3)
            .ok_or_else(|| Error::invalid_argument(format!("{num_tris} triangles overflow")))?;
        if points.len() < num_points
            || indices.len() < index_count
            || velocities.is_some_and(|v| v.len() < num_points)
        {
            return Err(Error::invalid_argument(format!(
                "buffers too short for {num_points} points and {num_tris} triangles"
            )));
        }
        if let Some((slot, &id)) = indices.as_slice()[..index_count]
            .iter()
            .enumerate()
            .find(|(_, id)| **id as usize >= num_points)
        {
            return Err(Error::invalid_argument(format!(
                "triangle {} references vertex {id} of {num_points}",
                slot / 3
            )));
        }

        let view = MeshView {
            points,
            velocities,
            indices,
            num_points,
        };
        let bvh = Bvh::with_pending_bounds(surface, num_tris, &config.bvh, move |launch, out| {
            launch.try_launch(out, |face| triangle_bounds(&view, face))
        })?;
        let winding = if support_winding_number {
            Some(surface.alloc(bvh.num_nodes())?)
        } else {
            None
        };
        let mesh = Self {
            view,
            num_tris,
            bvh,
            winding,
            winding_config: config.winding,
        };
        mesh.update_winding()?;
        Ok(mesh)
    }

    /// Recompute triangle boxes, BVH boxes and winding data from the current buffers.
    pub fn refit(&self) -> Result<()> {
        log::trace!("mesh refit over {} triangles", self.num_tris);
        let view = self.view;
        let item_bounds = self.bvh.item_bounds_buffer().clone();
        self.bvh.surface().submit("mesh triangle bounds", move |launch| {
            launch.try_launch(&mut item_bounds.write(), |face| triangle_bounds(&view, face))
        })?;
        self.bvh.refit()?;
        self.update_winding()
    }

    fn update_winding(&self) -> Result<()> {
        let Some(winding) = self.winding.clone() else {
            return Ok(());
        };
        let view = self.view;
        let nodes = self.bvh.node_buffer().clone();
        let (schedule, level_ends) = self.bvh.level_buffers();
        let (schedule, level_ends) = (schedule.clone(), level_ends.clone());
        let num_tris = self.num_tris;
        self.bvh.surface().submit("mesh winding", move |launch| {
            let mut leaves = vec![WindingNode::default(); num_tris];
            launch.try_launch(&mut leaves, |face| {
                let [a, b, c] = view.triangle(face)?;
                Ok(WindingNode::from_triangle(a, b, c))
            })?;
            let nodes = nodes.read();
            reduce_levels(
                launch,
                &nodes,
                &schedule.read(),
                &level_ends.read(),
                &mut winding.write(),
                |face| leaves[face as usize],
                WindingNode::merge,
            );
            Ok(())
        })
    }

    /// Closest point within `max_dist` of `p`, if any.
    ///
    /// Equidistant triangles resolve to the lowest face index. The result's
    /// `sign` is zero.
    pub fn query_point(&self, p: Vec3, max_dist: f32) -> Result<Option<MeshPoint>> {
        if max_dist.is_nan() || max_dist < 0.0 {
            return Err(Error::invalid_argument(format!(
                "max distance {max_dist} must be non-negative"
            )));
        }
        self.bvh.surface().synchronize()?;
        let nodes = self.bvh.node_buffer().read();
        let mut limit = max_dist * max_dist;
        let mut best: Option<(f32, MeshPoint)> = None;
        let mut stack = vec![0_u32];
        while let Some(i) = stack.pop() {
            let node = &nodes[i as usize];
            if node.bounds.distance_squared(p) > limit {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { item } => {
                    let [a, b, c] = self.view.triangle(item as usize)?;
                    let (point, w) = closest_point_on_triangle(p, a, b, c);
                    let d2 = point.distance_squared(p);
                    let better = match &best {
                        None => d2 <= limit,
                        Some((best_d2, hit)) => d2 < *best_d2 || (d2 == *best_d2 && item < hit.face),
                    };
                    if better {
                        limit = d2;
                        best = Some((
                            d2,
                            MeshPoint {
                                face: item,
                                u: w[0],
                                v: w[1],
                                point,
                                distance: d2.sqrt(),
                                sign: 0.0,
                            },
                        ));
                    }
                }
                NodeKind::Internal { left, right } => {
                    // Visit the nearer child first.
                    let dl = nodes[left as usize].bounds.distance_squared(p);
                    let dr = nodes[right as usize].bounds.distance_squared(p);
                    if dl <= dr {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        Ok(best.map(|(_, hit)| hit))
    }

    /// Closest point, signed by the face normal at the closest point.
    pub fn query_point_sign_normal(&self, p: Vec3, max_dist: f32) -> Result<Option<MeshPoint>> {
        let Some(mut hit) = self.query_point(p, max_dist)? else {
            return Ok(None);
        };
        let [a, b, c] = self.view.triangle(hit.face as usize)?;
        let normal = (b - a).cross(c - a);
        hit.sign = if (p - hit.point).dot(normal) < 0.0 { -1.0 } else { 1.0 };
        Ok(Some(hit))
    }

    /// Closest point, signed by the winding number at `p`.
    pub fn query_point_sign_winding(&self, p: Vec3, max_dist: f32) -> Result<Option<MeshPoint>> {
        let inside = self.is_inside(p)?;
        Ok(self.query_point(p, max_dist)?.map(|hit| MeshPoint {
            sign: if inside { -1.0 } else { 1.0 },
            ..hit
        }))
    }

    /// Generalized winding number at `p`: about 1 inside, about 0 outside.
    pub fn winding_number(&self, p: Vec3) -> Result<f32> {
        let winding = self.winding.as_ref().ok_or_else(|| {
            Error::invalid_argument("mesh was created without winding number support")
        })?;
        self.bvh.surface().synchronize()?;
        let nodes = self.bvh.node_buffer().read();
        let winding = winding.read();
        winding_number(p, &nodes, &winding, self.winding_config.accuracy, |face| {
            self.view.triangle(face as usize)
        })
    }

    /// Whether the winding number at `p` exceeds the configured threshold.
    pub fn is_inside(&self, p: Vec3) -> Result<bool> {
        Ok(self.winding_number(p)? > self.winding_config.threshold)
    }

    /// Nearest triangle hit by `origin + t * dir` with `t` in `[0, max_t]`.
    pub fn query_ray(&self, origin: Vec3, dir: Vec3, max_t: f32) -> Result<Option<MeshRayHit>> {
        self.bvh.surface().synchronize()?;
        let nodes = self.bvh.node_buffer().read();
        let inv_dir = dir.recip();
        let mut limit = max_t;
        let mut best: Option<MeshRayHit> = None;
        let mut stack = vec![0_u32];
        while let Some(i) = stack.pop() {
            let node = &nodes[i as usize];
            if node.bounds.intersect_ray(origin, inv_dir, limit).is_none() {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { item } => {
                    let [a, b, c] = self.view.triangle(item as usize)?;
                    let Some(hit) = intersect_ray_triangle(origin, dir, a, b, c, limit) else {
                        continue;
                    };
                    let better = match &best {
                        None => true,
                        Some(prev) => hit.t < prev.t || (hit.t == prev.t && item < prev.face),
                    };
                    if better {
                        limit = hit.t;
                        best = Some(MeshRayHit {
                            face: item,
                            t: hit.t,
                            u: hit.u,
                            v: hit.v,
                            sign: hit.sign,
                            normal: hit.normal,
                        });
                    }
                }
                NodeKind::Internal { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        Ok(best)
    }

    /// Triangles whose boxes overlap `query`, ascending.
    pub fn query_aabb(&self, query: &Bounds3) -> Result<Vec<u32>> {
        self.bvh.query_aabb(query)
    }

    /// Position at barycentric `(u, v)` on `face`.
    pub fn point_at(&self, face: u32, u: f32, v: f32) -> Result<Vec3> {
        let [a, b, c] = self.view.triangle(self.check_face(face)?)?;
        Ok(u * a + v * b + (1.0 - u - v) * c)
    }

    /// Velocity interpolated at barycentric `(u, v)` on `face`; zero without a velocity buffer.
    pub fn velocity_at(&self, face: u32, u: f32, v: f32) -> Result<Vec3> {
        let ids = self.view.vertex_ids(self.check_face(face)?)?;
        let Some(velocities) = self.view.velocities else {
            return Ok(Vec3::ZERO);
        };
        let [a, b, c] = ids.map(|i| velocities.as_slice()[i]);
        Ok(u * a + v * b + (1.0 - u - v) * c)
    }

    fn check_face(&self, face: u32) -> Result<usize> {
        let face = face as usize;
        if face >= self.num_tris {
            return Err(Error::invalid_argument(format!(
                "face {face} out of range for {} triangles",
                self.num_tris
            )));
        }
        Ok(face)
    }

    /// Box around every triangle.
    pub fn bounds(&self) -> Result<Bounds3> {
        self.bvh.bounds()
    }

    /// Copy of the per-node winding aggregates, if enabled.
    pub fn winding_nodes(&self) -> Result<Option<Vec<WindingNode>>> {
        self.winding
            .as_ref()
            .map(|w| self.bvh.surface().download(w))
            .transpose()
    }

    /// The triangle BVH.
    pub fn bvh(&self) -> &Bvh<S> {
        &self.bvh
    }

    /// Number of points.
    pub fn num_points(&self) -> usize {
        self.view.num_points
    }

    /// Number of triangles.
    pub fn num_tris(&self) -> usize {
        self.num_tris
    }

    /// Whether winding number queries are available.
    pub fn supports_winding_number(&self) -> bool {
        self.winding.is_some()
    }
}

fn triangle_bounds(view: &MeshView, face: usize) -> Result<Bounds3> {
    let [a, b, c] = view.triangle(face)?;
    Ok(Bounds3::from_triangle(a, b, c))
}
