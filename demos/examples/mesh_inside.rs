// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mesh queries through the C ABI: closest point and inside test on a cube.
//!
//! Run:
//! - `cargo run -p canopy_demos --example mesh_inside`

use std::ffi::CStr;

use canopy_capi::{
    CanopyMeshPoint, Status, canopy_last_error_message, mesh_create_host, mesh_destroy_host,
    mesh_is_inside_host, mesh_query_point_host,
};

static POINTS: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
];

static TRIS: [i32; 36] = [
    0, 2, 1, 0, 3, 2, // bottom
    4, 5, 6, 4, 6, 7, // top
    0, 1, 5, 0, 5, 4, // front
    3, 7, 6, 3, 6, 2, // back
    0, 4, 7, 0, 7, 3, // left
    1, 2, 6, 1, 6, 5, // right
];

fn main() {
    env_logger::init();
    // SAFETY: the buffers are static.
    let mesh = unsafe { mesh_create_host(POINTS.as_ptr(), std::ptr::null(), TRIS.as_ptr(), 8, 12, true) };
    assert_ne!(mesh, 0, "cube mesh is valid");

    for p in [[0.5, 0.5, 0.5], [0.5, 0.5, 1.5], [-0.2, 0.3, 0.9]] {
        let mut inside = 0;
        let mut hit = CanopyMeshPoint::default();
        // SAFETY: out-pointers reference locals.
        let statuses = unsafe {
            [
                mesh_is_inside_host(mesh, p[0], p[1], p[2], &mut inside),
                mesh_query_point_host(mesh, p[0], p[1], p[2], 2.0, &mut hit),
            ]
        };
        assert_eq!(statuses, [Status::Ok; 2], "queries succeed");
        println!(
            "{p:?}: inside = {}, closest face {} at {:?}, distance {:.3}",
            inside == 1,
            hit.face,
            hit.point,
            hit.distance
        );
    }

    // Destroying twice reports an error instead of crashing.
    assert_eq!(mesh_destroy_host(mesh), Status::Ok, "first destroy");
    assert_eq!(mesh_destroy_host(mesh), Status::InvalidHandle, "second destroy");
    // SAFETY: a failure was just recorded on this thread.
    let message = unsafe { CStr::from_ptr(canopy_last_error_message()) };
    println!("second destroy: {}", message.to_string_lossy());
}
