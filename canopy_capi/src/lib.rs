// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! C ABI for Canopy Spatial.
//!
//! Every structure is addressed by an opaque `u64` handle. Creation returns
//! `0` on failure; every other entry point returns a [`Status`]. After a
//! failure, [`canopy_last_error_message`] describes it on the failing
//! thread. Host entry points run synchronously. Device entry points take a
//! context from [`device_context_create`] and only enqueue work; their
//! failures surface at [`device_context_synchronize`] or the next query.
//!
//! Point buffers and box corners are packed `float[3]` triples; single query
//! points are passed as three scalars.
//! No entry point unwinds into the caller.

#![allow(
    unsafe_code,
    reason = "Every entry point dereferences caller pointers across the C ABI."
)]

use core::ffi::c_char;
use std::any::Any;
use std::cell::RefCell;
use std::ffi::CString;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;

use canopy_spatial::{
    Bounds3, DeviceConfig, Error, ExternalSlice, Handle, MeshPoint, Result, Runtime, Structures,
    Surface,
};
use glam::Vec3;

static RUNTIME: LazyLock<Runtime> = LazyLock::new(Runtime::default);

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Outcome of a non-creating entry point.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Success.
    Ok = 0,
    /// Null pointer, negative count, or otherwise malformed argument.
    InvalidArgument = -1,
    /// Unknown or destroyed handle.
    InvalidHandle = -2,
    /// Host or device memory exhausted.
    AllocationFailure = -3,
    /// A device job failed, or an internal panic was caught.
    DeviceExecutionFailure = -4,
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidArgument(_) => Self::InvalidArgument,
            Error::InvalidHandle(_) => Self::InvalidHandle,
            Error::AllocationFailure { .. } => Self::AllocationFailure,
            Error::DeviceExecutionFailure(_) => Self::DeviceExecutionFailure,
        }
    }
}

/// Closest-point result written by `mesh_query_point_*`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CanopyMeshPoint {
    /// `1` when a point was found within range, `0` otherwise.
    pub found: i32,
    /// Triangle index.
    pub face: u32,
    /// Barycentric weight of the first vertex.
    pub u: f32,
    /// Barycentric weight of the second vertex.
    pub v: f32,
    /// The closest point.
    pub point: [f32; 3],
    /// Distance to the query point.
    pub distance: f32,
}

impl From<Option<MeshPoint>> for CanopyMeshPoint {
    fn from(hit: Option<MeshPoint>) -> Self {
        match hit {
            Some(hit) => Self {
                found: 1,
                face: hit.face,
                u: hit.u,
                v: hit.v,
                point: hit.point.to_array(),
                distance: hit.distance,
            },
            None => Self::default(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn record(err: &Error) {
    log::debug!("canopy_capi call failed: {err}");
    let message = CString::new(err.to_string().replace('\0', " ")).ok();
    LAST_ERROR.with_borrow_mut(|slot| *slot = message);
}

fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let result = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(Error::DeviceExecutionFailure(format!(
            "panic: {}",
            panic_message(payload.as_ref())
        )))
    });
    if let Err(err) = &result {
        record(err);
    }
    result
}

fn status(f: impl FnOnce() -> Result<()>) -> Status {
    match guarded(f) {
        Ok(()) => Status::Ok,
        Err(err) => Status::from(&err),
    }
}

fn create(f: impl FnOnce() -> Result<Handle>) -> u64 {
    guarded(f).map_or(0, Handle::to_raw)
}

fn invalid(msg: String) -> Error {
    log::warn!("rejected argument: {msg}");
    Error::InvalidArgument(msg)
}

fn count(n: i32, what: &str) -> Result<usize> {
    usize::try_from(n).map_err(|_| invalid(format!("{what} must be non-negative, got {n}")))
}

/// View `len` elements at `ptr`, rejecting null.
///
/// # Safety
///
/// `ptr` must be null or point to `len` initialized elements that stay valid for `'a`.
unsafe fn slice<'a, T>(ptr: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if ptr.is_null() {
        return Err(invalid(format!("{what} is null")));
    }
    // SAFETY: non-null, and the caller vouches for the rest.
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// Like [`slice`], but retained until the owning mesh is destroyed.
///
/// # Safety
///
/// As [`ExternalSlice::from_raw_parts`].
unsafe fn external<T>(ptr: *const T, len: usize, what: &str) -> Result<ExternalSlice<T>> {
    // SAFETY: forwarded contract.
    unsafe { ExternalSlice::from_raw_parts(ptr, len) }
        .ok_or_else(|| invalid(format!("{what} is null")))
}

/// Read `n` packed `float[3]` triples.
///
/// # Safety
///
/// As [`slice`] for `n` triples.
unsafe fn points<'a>(ptr: *const [f32; 3], n: usize, what: &str) -> Result<&'a [Vec3]> {
    // SAFETY: `Vec3` is `repr(C)` over three `f32`, the same layout as `[f32; 3]`.
    unsafe { slice(ptr.cast::<Vec3>(), n, what) }
}

/// Write through an out-pointer, rejecting null.
///
/// # Safety
///
/// `out` must be null or valid for a write of `T`.
unsafe fn write_out<T>(out: *mut T, value: T, what: &str) -> Result<()> {
    if out.is_null() {
        return Err(invalid(format!("{what} is null")));
    }
    // SAFETY: non-null and writable per the caller.
    unsafe { out.write(value) };
    Ok(())
}

/// # Safety
///
/// As [`points`] for `lowers` and `uppers`.
unsafe fn bvh_create<S: Surface>(
    structures: &Structures<S>,
    surface: &S,
    lowers: *const [f32; 3],
    uppers: *const [f32; 3],
    n: i32,
) -> Result<Handle> {
    let n = count(n, "item count")?;
    // SAFETY: forwarded contract.
    let (lowers, uppers) = unsafe { (points(lowers, n, "lowers")?, points(uppers, n, "uppers")?) };
    structures.create_bvh(surface, lowers, uppers)
}

/// # Safety
///
/// As [`points`] for `lowers` and `uppers`.
unsafe fn bvh_set_item_bounds<S: Surface>(
    structures: &Structures<S>,
    id: u64,
    first: i32,
    lowers: *const [f32; 3],
    uppers: *const [f32; 3],
    n: i32,
) -> Result<()> {
    let first = count(first, "first item")?;
    let n = count(n, "item count")?;
    // SAFETY: forwarded contract.
    let (lowers, uppers) = unsafe { (points(lowers, n, "lowers")?, points(uppers, n, "uppers")?) };
    let bounds: Vec<Bounds3> = lowers
        .iter()
        .zip(uppers)
        .map(|(&lower, &upper)| Bounds3::new(lower, upper))
        .collect();
    structures.set_bvh_item_bounds(Handle::from_raw(id), first, &bounds)
}

/// # Safety
///
/// As [`points`] for `positions`.
unsafe fn hash_grid_update<S: Surface>(
    structures: &Structures<S>,
    id: u64,
    cell_width: f32,
    positions: *const [f32; 3],
    n: i32,
) -> Result<()> {
    let n = count(n, "point count")?;
    // SAFETY: forwarded contract.
    let positions = unsafe { points(positions, n, "positions")? };
    structures.update_hash_grid(Handle::from_raw(id), cell_width, positions, n)
}

/// # Safety
///
/// `out` must be null or valid for `capacity` writes; `count_out` must be null or writable.
unsafe fn hash_grid_query<S: Surface>(
    structures: &Structures<S>,
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    radius: f32,
    out: *mut u32,
    capacity: i32,
    count_out: *mut i32,
) -> Result<()> {
    let capacity = count(capacity, "capacity")?;
    if out.is_null() && capacity > 0 {
        return Err(invalid("neighbour buffer is null".to_owned()));
    }
    let found = structures.query_hash_grid(Handle::from_raw(id), Vec3::new(x, y, z), radius)?;
    let total = i32::try_from(found.len())
        .map_err(|_| invalid(format!("{} neighbours overflow the count", found.len())))?;
    for (k, &i) in found.iter().take(capacity).enumerate() {
        // SAFETY: `k < capacity`, and the caller provides `capacity` slots.
        unsafe { out.add(k).write(i) };
    }
    // SAFETY: forwarded contract.
    unsafe { write_out(count_out, total, "count") }
}

/// # Safety
///
/// As [`ExternalSlice::from_raw_parts`] for each buffer until the mesh is destroyed.
unsafe fn mesh_create<S: Surface>(
    structures: &Structures<S>,
    surface: &S,
    points: *const [f32; 3],
    velocities: *const [f32; 3],
    tris: *const i32,
    num_points: i32,
    num_tris: i32,
    support_winding_number: bool,
) -> Result<Handle> {
    let num_points = count(num_points, "point count")?;
    let num_tris = count(num_tris, "triangle count")?;
    let num_indices = num_tris
        .checked_mul(3)
        .ok_or_else(|| invalid(format!("{num_tris} triangles overflow")))?;
    // SAFETY: forwarded contract. Indices are reinterpreted as unsigned, so
    // negative ones fail the range check.
    let (points, velocities, indices) = unsafe {
        (
            external(points.cast::<Vec3>(), num_points, "points")?,
            if velocities.is_null() {
                None
            } else {
                Some(external(velocities.cast::<Vec3>(), num_points, "velocities")?)
            },
            external(tris.cast::<u32>(), num_indices, "triangles")?,
        )
    };
    structures.create_mesh(
        surface,
        points,
        velocities,
        indices,
        num_points,
        num_tris,
        support_winding_number,
    )
}

fn device(context: u64) -> Result<canopy_spatial::Device> {
    RUNTIME.device_surface(Handle::from_raw(context))
}

/// Start a device context. A zero `memory_budget_bytes` means unlimited.
///
/// Returns `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn device_context_create(memory_budget_bytes: u64) -> u64 {
    create(|| {
        let memory_budget = match memory_budget_bytes {
            0 => None,
            bytes => Some(usize::try_from(bytes).unwrap_or(usize::MAX)),
        };
        RUNTIME.create_context(&DeviceConfig {
            memory_budget,
            ..DeviceConfig::default()
        })
    })
}

/// Wait for every job on the context and report the first deferred failure.
#[unsafe(no_mangle)]
pub extern "C" fn device_context_synchronize(context: u64) -> Status {
    status(|| RUNTIME.synchronize(Handle::from_raw(context)))
}

/// Retire a context handle. Structures built on it keep working until destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn device_context_destroy(context: u64) -> Status {
    status(|| RUNTIME.destroy_context(Handle::from_raw(context)))
}

/// Build a host BVH over `n` boxes. Returns `0` on failure.
///
/// # Safety
///
/// `lowers` and `uppers` must each point to `n` readable `float[3]` triples.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bvh_create_host(
    lowers: *const [f32; 3],
    uppers: *const [f32; 3],
    n: i32,
) -> u64 {
    // SAFETY: forwarded contract.
    create(|| unsafe { bvh_create(RUNTIME.host(), &canopy_spatial::Host, lowers, uppers, n) })
}

/// Build a device BVH over `n` boxes. Returns `0` on failure.
///
/// # Safety
///
/// As [`bvh_create_host`]. The boxes are copied before this returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bvh_create_device(
    context: u64,
    lowers: *const [f32; 3],
    uppers: *const [f32; 3],
    n: i32,
) -> u64 {
    create(|| {
        let surface = device(context)?;
        // SAFETY: forwarded contract.
        unsafe { bvh_create(RUNTIME.device(), &surface, lowers, uppers, n) }
    })
}

/// Recompute a host BVH's internal boxes.
#[unsafe(no_mangle)]
pub extern "C" fn bvh_refit_host(id: u64) -> Status {
    status(|| RUNTIME.host().refit_bvh(Handle::from_raw(id)))
}

/// Enqueue a refit of a device BVH.
#[unsafe(no_mangle)]
pub extern "C" fn bvh_refit_device(id: u64) -> Status {
    status(|| RUNTIME.device().refit_bvh(Handle::from_raw(id)))
}

/// Overwrite host item boxes `first..first + n`. Call `bvh_refit_host` afterwards.
///
/// # Safety
///
/// As [`bvh_create_host`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bvh_set_item_bounds_host(
    id: u64,
    first: i32,
    lowers: *const [f32; 3],
    uppers: *const [f32; 3],
    n: i32,
) -> Status {
    // SAFETY: forwarded contract.
    status(|| unsafe { bvh_set_item_bounds(RUNTIME.host(), id, first, lowers, uppers, n) })
}

/// Overwrite device item boxes `first..first + n`. Call `bvh_refit_device` afterwards.
///
/// # Safety
///
/// As [`bvh_create_host`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bvh_set_item_bounds_device(
    id: u64,
    first: i32,
    lowers: *const [f32; 3],
    uppers: *const [f32; 3],
    n: i32,
) -> Status {
    // SAFETY: forwarded contract.
    status(|| unsafe { bvh_set_item_bounds(RUNTIME.device(), id, first, lowers, uppers, n) })
}

/// Release a host BVH.
#[unsafe(no_mangle)]
pub extern "C" fn bvh_destroy_host(id: u64) -> Status {
    status(|| RUNTIME.host().destroy_bvh(Handle::from_raw(id)))
}

/// Release a device BVH.
#[unsafe(no_mangle)]
pub extern "C" fn bvh_destroy_device(id: u64) -> Status {
    status(|| RUNTIME.device().destroy_bvh(Handle::from_raw(id)))
}

/// Create a host hash grid. Returns `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn hash_grid_create_host(dim_x: i32, dim_y: i32, dim_z: i32) -> u64 {
    create(|| {
        RUNTIME
            .host()
            .create_hash_grid(&canopy_spatial::Host, [dim_x, dim_y, dim_z])
    })
}

/// Create a device hash grid. Returns `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn hash_grid_create_device(context: u64, dim_x: i32, dim_y: i32, dim_z: i32) -> u64 {
    create(|| {
        RUNTIME
            .device()
            .create_hash_grid(&device(context)?, [dim_x, dim_y, dim_z])
    })
}

/// Grow a host grid's point capacity.
#[unsafe(no_mangle)]
pub extern "C" fn hash_grid_reserve_host(id: u64, num_points: i32) -> Status {
    status(|| {
        let n = count(num_points, "point count")?;
        RUNTIME.host().reserve_hash_grid(Handle::from_raw(id), n)
    })
}

/// Grow a device grid's point capacity.
#[unsafe(no_mangle)]
pub extern "C" fn hash_grid_reserve_device(id: u64, num_points: i32) -> Status {
    status(|| {
        let n = count(num_points, "point count")?;
        RUNTIME.device().reserve_hash_grid(Handle::from_raw(id), n)
    })
}

/// Rebuild a host grid from `n` positions.
///
/// # Safety
///
/// `positions` must point to `n` readable `float[3]` triples.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hash_grid_update_host(
    id: u64,
    cell_width: f32,
    positions: *const [f32; 3],
    n: i32,
) -> Status {
    // SAFETY: forwarded contract.
    status(|| unsafe { hash_grid_update(RUNTIME.host(), id, cell_width, positions, n) })
}

/// Rebuild a device grid from `n` positions. The positions are copied before this returns.
///
/// # Safety
///
/// As [`hash_grid_update_host`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hash_grid_update_device(
    id: u64,
    cell_width: f32,
    positions: *const [f32; 3],
    n: i32,
) -> Status {
    // SAFETY: forwarded contract.
    status(|| unsafe { hash_grid_update(RUNTIME.device(), id, cell_width, positions, n) })
}

/// Write up to `capacity` ids of host-grid points within `radius` of `(x, y, z)`
/// to `out`, ascending, and the total count to `count`.
///
/// # Safety
///
/// `out` must be valid for `capacity` writes and `count` for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hash_grid_query_host(
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    radius: f32,
    out: *mut u32,
    capacity: i32,
    count: *mut i32,
) -> Status {
    // SAFETY: forwarded contract.
    status(|| unsafe { hash_grid_query(RUNTIME.host(), id, x, y, z, radius, out, capacity, count) })
}

/// Device variant of [`hash_grid_query_host`]. Waits for pending updates.
///
/// # Safety
///
/// As [`hash_grid_query_host`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hash_grid_query_device(
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    radius: f32,
    out: *mut u32,
    capacity: i32,
    count: *mut i32,
) -> Status {
    // SAFETY: forwarded contract.
    status(|| unsafe { hash_grid_query(RUNTIME.device(), id, x, y, z, radius, out, capacity, count) })
}

/// Release a host grid.
#[unsafe(no_mangle)]
pub extern "C" fn hash_grid_destroy_host(id: u64) -> Status {
    status(|| RUNTIME.host().destroy_hash_grid(Handle::from_raw(id)))
}

/// Release a device grid.
#[unsafe(no_mangle)]
pub extern "C" fn hash_grid_destroy_device(id: u64) -> Status {
    status(|| RUNTIME.device().destroy_hash_grid(Handle::from_raw(id)))
}

/// Build a host mesh over caller-owned buffers. Returns `0` on failure.
///
/// `velocities` may be null.
///
/// # Safety
///
/// `points` (and `velocities`, if not null) must point to `num_points`
/// triples and `tris` to `3 * num_tris` indices. All three must stay valid
/// and unresized until `mesh_destroy_host`, and may only be written while
/// no call on the mesh is running.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mesh_create_host(
    points: *const [f32; 3],
    velocities: *const [f32; 3],
    tris: *const i32,
    num_points: i32,
    num_tris: i32,
    support_winding_number: bool,
) -> u64 {
    create(|| {
        // SAFETY: forwarded contract.
        unsafe {
            mesh_create(
                RUNTIME.host(),
                &canopy_spatial::Host,
                points,
                velocities,
                tris,
                num_points,
                num_tris,
                support_winding_number,
            )
        }
    })
}

/// Build a device mesh over caller-owned buffers. Returns `0` on failure.
///
/// # Safety
///
/// As [`mesh_create_host`], until `mesh_destroy_device` and with no device
/// work on the mesh pending while the buffers are written.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mesh_create_device(
    context: u64,
    points: *const [f32; 3],
    velocities: *const [f32; 3],
    tris: *const i32,
    num_points: i32,
    num_tris: i32,
    support_winding_number: bool,
) -> u64 {
    create(|| {
        let surface = device(context)?;
        // SAFETY: forwarded contract.
        unsafe {
            mesh_create(
                RUNTIME.device(),
                &surface,
                points,
                velocities,
                tris,
                num_points,
                num_tris,
                support_winding_number,
            )
        }
    })
}

/// Re-read a host mesh's buffers.
#[unsafe(no_mangle)]
pub extern "C" fn mesh_refit_host(id: u64) -> Status {
    status(|| RUNTIME.host().refit_mesh(Handle::from_raw(id)))
}

/// Enqueue a refit of a device mesh.
#[unsafe(no_mangle)]
pub extern "C" fn mesh_refit_device(id: u64) -> Status {
    status(|| RUNTIME.device().refit_mesh(Handle::from_raw(id)))
}

/// Closest point on a host mesh within `max_dist` of `(x, y, z)`.
///
/// # Safety
///
/// `out` must be valid for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mesh_query_point_host(
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    max_dist: f32,
    out: *mut CanopyMeshPoint,
) -> Status {
    status(|| {
        let hit = RUNTIME
            .host()
            .query_mesh_point(Handle::from_raw(id), Vec3::new(x, y, z), max_dist)?;
        // SAFETY: forwarded contract.
        unsafe { write_out(out, hit.into(), "result") }
    })
}

/// Device variant of [`mesh_query_point_host`].
///
/// # Safety
///
/// As [`mesh_query_point_host`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mesh_query_point_device(
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    max_dist: f32,
    out: *mut CanopyMeshPoint,
) -> Status {
    status(|| {
        let hit = RUNTIME
            .device()
            .query_mesh_point(Handle::from_raw(id), Vec3::new(x, y, z), max_dist)?;
        // SAFETY: forwarded contract.
        unsafe { write_out(out, hit.into(), "result") }
    })
}

/// Write `1` to `inside` if `(x, y, z)` is inside a host mesh, `0` otherwise.
///
/// # Safety
///
/// `inside` must be valid for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mesh_is_inside_host(
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    inside: *mut i32,
) -> Status {
    status(|| {
        let is_inside = RUNTIME
            .host()
            .mesh_is_inside(Handle::from_raw(id), Vec3::new(x, y, z))?;
        // SAFETY: forwarded contract.
        unsafe { write_out(inside, i32::from(is_inside), "inside") }
    })
}

/// Device variant of [`mesh_is_inside_host`].
///
/// # Safety
///
/// As [`mesh_is_inside_host`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mesh_is_inside_device(
    id: u64,
    x: f32,
    y: f32,
    z: f32,
    inside: *mut i32,
) -> Status {
    status(|| {
        let is_inside = RUNTIME
            .device()
            .mesh_is_inside(Handle::from_raw(id), Vec3::new(x, y, z))?;
        // SAFETY: forwarded contract.
        unsafe { write_out(inside, i32::from(is_inside), "inside") }
    })
}

/// Release a host mesh. The caller's buffers are untouched.
#[unsafe(no_mangle)]
pub extern "C" fn mesh_destroy_host(id: u64) -> Status {
    status(|| RUNTIME.host().destroy_mesh(Handle::from_raw(id)))
}

/// Release a device mesh. The caller's buffers are untouched.
#[unsafe(no_mangle)]
pub extern "C" fn mesh_destroy_device(id: u64) -> Status {
    status(|| RUNTIME.device().destroy_mesh(Handle::from_raw(id)))
}

/// Message of the last failure on this thread, or null.
///
/// The string stays valid until the next failing call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn canopy_last_error_message() -> *const c_char {
    LAST_ERROR.with_borrow(|message| message.as_ref().map_or(std::ptr::null(), |m| m.as_ptr()))
}
