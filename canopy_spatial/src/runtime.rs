// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Handle-based front end over every structure type.
//!
//! A [`Runtime`] owns one registry per structure type and execution
//! surface, plus a registry of device contexts. Device structures are
//! created against an explicit context handle; host structures need none.

use glam::Vec3;

use crate::bvh::Bvh;
use crate::config::{Config, DeviceConfig};
use crate::device::DeviceContext;
use crate::error::Result;
use crate::external::ExternalSlice;
use crate::hash_grid::HashGrid;
use crate::mesh::{Mesh, MeshPoint};
use crate::registry::{Handle, Registry};
use crate::surface::{Device, Host, Surface};
use crate::types::Bounds3;

/// Registries of the structures built on one execution surface.
#[derive(Debug)]
pub struct Structures<S: Surface> {
    config: Config,
    bvhs: Registry<Bvh<S>>,
    grids: Registry<HashGrid<S>>,
    meshes: Registry<Mesh<S>>,
}

impl<S: Surface> Structures<S> {
    fn new(config: Config, bvh: &'static str, grid: &'static str, mesh: &'static str) -> Self {
        Self {
            config,
            bvhs: Registry::new(bvh),
            grids: Registry::new(grid),
            meshes: Registry::new(mesh),
        }
    }

    /// Build a BVH over `lowers[i]..uppers[i]`.
    pub fn create_bvh(&self, surface: &S, lowers: &[Vec3], uppers: &[Vec3]) -> Result<Handle> {
        self.bvhs
            .create(|| Bvh::new(surface, lowers, uppers, &self.config.bvh))
    }

    /// Overwrite item boxes `first..first + bounds.len()` ahead of a refit.
    pub fn set_bvh_item_bounds(&self, bvh: Handle, first: usize, bounds: &[Bounds3]) -> Result<()> {
        self.bvhs.with(bvh, |b| b.write_item_bounds(first, bounds))
    }

    /// Recompute internal boxes of a BVH.
    pub fn refit_bvh(&self, bvh: Handle) -> Result<()> {
        self.bvhs.with(bvh, |b| b.refit())
    }

    /// Release a BVH.
    pub fn destroy_bvh(&self, bvh: Handle) -> Result<()> {
        self.bvhs.destroy(bvh)
    }

    /// Create an empty hash grid.
    pub fn create_hash_grid(&self, surface: &S, dims: [i32; 3]) -> Result<Handle> {
        self.grids.create(|| HashGrid::new(surface, dims))
    }

    /// Grow a grid's point capacity.
    pub fn reserve_hash_grid(&self, grid: Handle, num_points: usize) -> Result<()> {
        self.grids.with(grid, |g| g.reserve(num_points))
    }

    /// Rebuild a grid from the first `num_points` positions.
    pub fn update_hash_grid(
        &self,
        grid: Handle,
        cell_width: f32,
        positions: &[Vec3],
        num_points: usize,
    ) -> Result<()> {
        self.grids
            .with(grid, |g| g.update(cell_width, positions, num_points))
    }

    /// Points within `radius` of `point`, ascending.
    pub fn query_hash_grid(&self, grid: Handle, point: Vec3, radius: f32) -> Result<Vec<u32>> {
        self.grids.with(grid, |g| g.query(point, radius))
    }

    /// Release a hash grid.
    pub fn destroy_hash_grid(&self, grid: Handle) -> Result<()> {
        self.grids.destroy(grid)
    }

    /// Build a mesh over caller-owned buffers.
    pub fn create_mesh(
        &self,
        surface: &S,
        points: ExternalSlice<Vec3>,
        velocities: Option<ExternalSlice<Vec3>>,
        indices: ExternalSlice<u32>,
        num_points: usize,
        num_tris: usize,
        support_winding_number: bool,
    ) -> Result<Handle> {
        self.meshes.create(|| {
            Mesh::new(
                surface,
                points,
                velocities,
                indices,
                num_points,
                num_tris,
                support_winding_number,
                &self.config,
            )
        })
    }

    /// Re-read a mesh's buffers and update its derived data.
    pub fn refit_mesh(&self, mesh: Handle) -> Result<()> {
        self.meshes.with(mesh, |m| m.refit())
    }

    /// Closest point on a mesh within `max_dist`.
    pub fn query_mesh_point(&self, mesh: Handle, p: Vec3, max_dist: f32) -> Result<Option<MeshPoint>> {
        self.meshes.with(mesh, |m| m.query_point(p, max_dist))
    }

    /// Inside test by winding number.
    pub fn mesh_is_inside(&self, mesh: Handle, p: Vec3) -> Result<bool> {
        self.meshes.with(mesh, |m| m.is_inside(p))
    }

    /// Release a mesh's derived data. Its buffers stay with the caller.
    pub fn destroy_mesh(&self, mesh: Handle) -> Result<()> {
        self.meshes.destroy(mesh)
    }

    /// Live BVHs.
    pub fn bvhs(&self) -> &Registry<Bvh<S>> {
        &self.bvhs
    }

    /// Live hash grids.
    pub fn hash_grids(&self) -> &Registry<HashGrid<S>> {
        &self.grids
    }

    /// Live meshes.
    pub fn meshes(&self) -> &Registry<Mesh<S>> {
        &self.meshes
    }
}

/// Every live structure and device context.
///
/// Structures keep their device alive: destroying a context handle only
/// retires the handle, and the context shuts down once the last structure
/// built on it is destroyed.
#[derive(Debug)]
pub struct Runtime {
    config: Config,
    contexts: Registry<Device>,
    host: Structures<Host>,
    device: Structures<Device>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Runtime {
    /// An empty runtime building every structure with `config`.
    pub fn new(config: Config) -> Self {
        Self {
            contexts: Registry::new("device context"),
            host: Structures::new(config.clone(), "host bvh", "host hash grid", "host mesh"),
            device: Structures::new(
                config.clone(),
                "device bvh",
                "device hash grid",
                "device mesh",
            ),
            config,
        }
    }

    /// Structure configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host structures.
    pub fn host(&self) -> &Structures<Host> {
        &self.host
    }

    /// Device structures.
    pub fn device(&self) -> &Structures<Device> {
        &self.device
    }

    /// Start a device context.
    pub fn create_context(&self, config: &DeviceConfig) -> Result<Handle> {
        self.contexts
            .create(|| DeviceContext::new(config).map(Device::new))
    }

    /// The execution surface of a live context.
    pub fn device_surface(&self, context: Handle) -> Result<Device> {
        self.contexts.with(context, |device| Ok(device.clone()))
    }

    /// Wait for the context's stream and report deferred failures.
    pub fn synchronize(&self, context: Handle) -> Result<()> {
        self.device_surface(context)?.synchronize()
    }

    /// Retire a context handle.
    pub fn destroy_context(&self, context: Handle) -> Result<()> {
        self.contexts.destroy(context)
    }

    /// Build a BVH on the host.
    pub fn create_bvh_host(&self, lowers: &[Vec3], uppers: &[Vec3]) -> Result<Handle> {
        self.host.create_bvh(&Host, lowers, uppers)
    }

    /// Build a BVH on a device.
    pub fn create_bvh_device(
        &self,
        context: Handle,
        lowers: &[Vec3],
        uppers: &[Vec3],
    ) -> Result<Handle> {
        self.device
            .create_bvh(&self.device_surface(context)?, lowers, uppers)
    }

    /// Create a host hash grid.
    pub fn create_hash_grid_host(&self, dims: [i32; 3]) -> Result<Handle> {
        self.host.create_hash_grid(&Host, dims)
    }

    /// Create a device hash grid.
    pub fn create_hash_grid_device(&self, context: Handle, dims: [i32; 3]) -> Result<Handle> {
        self.device
            .create_hash_grid(&self.device_surface(context)?, dims)
    }

    /// Build a host mesh over caller-owned buffers.
    pub fn create_mesh_host(
        &self,
        points: ExternalSlice<Vec3>,
        velocities: Option<ExternalSlice<Vec3>>,
        indices: ExternalSlice<u32>,
        num_points: usize,
        num_tris: usize,
        support_winding_number: bool,
    ) -> Result<Handle> {
        self.host.create_mesh(
            &Host,
            points,
            velocities,
            indices,
            num_points,
            num_tris,
            support_winding_number,
        )
    }

    /// Build a device mesh over caller-owned buffers.
    pub fn create_mesh_device(
        &self,
        context: Handle,
        points: ExternalSlice<Vec3>,
        velocities: Option<ExternalSlice<Vec3>>,
        indices: ExternalSlice<u32>,
        num_points: usize,
        num_tris: usize,
        support_winding_number: bool,
    ) -> Result<Handle> {
        self.device.create_mesh(
            &self.device_surface(context)?,
            points,
            velocities,
            indices,
            num_points,
            num_tris,
            support_winding_number,
        )
    }
}
