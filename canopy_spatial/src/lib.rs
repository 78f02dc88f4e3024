// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Canopy Spatial: 3D spatial acceleration structures behind opaque handles.
//!
//! The crate provides three structures, each buildable on two execution surfaces:
//!
//! - [`Bvh`]: a bounding volume hierarchy over axis-aligned boxes, with
//!   topology-preserving [`Bvh::refit`] and box and ray queries.
//! - [`HashGrid`]: a uniform grid over points, hashed into fixed dimensions
//!   so unbounded domains work, rebuilt on every [`HashGrid::update`].
//! - [`Mesh`]: a triangle mesh over caller-owned buffers with closest-point,
//!   ray and generalized winding number queries.
//!
//! [`Host`] runs every operation on the calling thread. [`Device`] runs them
//! on a [`DeviceContext`]: work is enqueued on an in-order stream, memory is
//! charged against a budget, and job failures are reported by the next
//! synchronization. Queries synchronize first, so they always observe
//! completed builds.
//!
//! [`Runtime`] owns [`Registry`] instances that map 64-bit [`Handle`]s to
//! live structures. The `canopy_capi` crate exposes it through a C ABI.
//!
//! # Example
//!
//! ```rust
//! use canopy_spatial::{Bounds3, Bvh, BvhConfig, Host};
//! use glam::Vec3;
//!
//! let boxes = [
//!     Bounds3::new(Vec3::ZERO, Vec3::ONE),
//!     Bounds3::new(Vec3::splat(2.0), Vec3::splat(3.0)),
//! ];
//! let bvh = Bvh::from_bounds(&Host, &boxes, &BvhConfig::default())?;
//! assert_eq!(bvh.bounds()?, Bounds3::new(Vec3::ZERO, Vec3::splat(3.0)));
//!
//! let probe = Bounds3::new(Vec3::splat(2.5), Vec3::splat(2.6));
//! assert_eq!(bvh.query_aabb(&probe)?, vec![1]);
//! # Ok::<(), canopy_spatial::Error>(())
//! ```
//!
//! Device structures take a context:
//!
//! ```rust
//! use canopy_spatial::{Device, DeviceConfig, DeviceContext, HashGrid};
//! use glam::Vec3;
//!
//! let device = Device::new(DeviceContext::new(&DeviceConfig::default())?);
//! let mut grid = HashGrid::new(&device, [16, 16, 16])?;
//! let points = [Vec3::ZERO, Vec3::new(0.25, 0.0, 0.0), Vec3::splat(4.0)];
//! grid.update(0.5, &points, points.len())?;
//! assert_eq!(grid.query(Vec3::ZERO, 0.5)?, vec![0, 1]);
//! # Ok::<(), canopy_spatial::Error>(())
//! ```

pub mod bvh;
pub mod config;
pub mod device;
pub mod error;
pub mod external;
pub mod geometry;
pub mod hash_grid;
pub mod mesh;
pub mod registry;
pub mod runtime;
pub mod surface;
pub mod types;
pub mod winding;

pub use bvh::{Bvh, BvhNode, NodeKind};
pub use config::{BvhConfig, Config, DeviceConfig, SplitHeuristic, WindingConfig};
pub use device::{Allocation, DeviceContext};
pub use error::{Error, Result};
pub use external::ExternalSlice;
pub use hash_grid::HashGrid;
pub use mesh::{Mesh, MeshPoint, MeshRayHit};
pub use registry::{Handle, Registry};
pub use runtime::{Runtime, Structures};
pub use surface::{Buffer, Device, Host, Launcher, Surface, SurfaceKind};
pub use types::Bounds3;
pub use winding::WindingNode;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn public_types_cross_threads() {
        assert_send_sync::<Runtime>();
        assert_send_sync::<Bvh<Device>>();
        assert_send_sync::<HashGrid<Device>>();
        assert_send_sync::<Mesh<Device>>();
        assert_send_sync::<DeviceContext>();
    }

    #[test]
    fn default_config_round_trips_through_runtime() {
        let rt = Runtime::default();
        assert_eq!(rt.config(), &Config::default(), "runtime keeps its config");
        assert_eq!(rt.config().winding.threshold, 0.5, "inside above one half");
        let h = rt.create_bvh_host(&[Vec3::ZERO], &[Vec3::ONE]).unwrap();
        assert_eq!(Handle::from_raw(h.to_raw()), h, "raw handles round-trip");
    }
}
