// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hierarchical generalized winding numbers.
//!
//! Every BVH node over a triangle set carries a [`WindingNode`]: the
//! area-weighted centroid of the triangles below it, their summed area
//! vector and a radius bounding them around the centroid. Far from a
//! subtree its triangles act like a single dipole, so the winding number
//! sums exact solid angles near the query point and dipole terms elsewhere.

use core::f32::consts::PI;

use glam::Vec3;

use crate::bvh::{BvhNode, NodeKind};
use crate::error::Result;
use crate::geometry::{area_vector, solid_angle};

/// Aggregate of the triangles below one node.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WindingNode {
    /// Area-weighted centroid.
    pub centroid: Vec3,
    /// Sum of area times unit normal.
    pub area_normal: Vec3,
    /// Total area.
    pub area: f32,
    /// Every vertex below the node lies within this distance of `centroid`.
    pub radius: f32,
}

impl WindingNode {
    /// Aggregate of a single triangle.
    pub fn from_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let centroid = (a + b + c) / 3.0;
        let area_normal = area_vector(a, b, c);
        let radius = centroid
            .distance(a)
            .max(centroid.distance(b))
            .max(centroid.distance(c));
        Self {
            centroid,
            area_normal,
            area: area_normal.length(),
            radius,
        }
    }

    /// Aggregate of two disjoint triangle sets.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let area = self.area + other.area;
        let centroid = if area > 0.0 {
            (self.centroid * self.area + other.centroid * other.area) / area
        } else {
            0.5 * (self.centroid + other.centroid)
        };
        let radius = (self.centroid.distance(centroid) + self.radius)
            .max(other.centroid.distance(centroid) + other.radius);
        Self {
            centroid,
            area_normal: self.area_normal + other.area_normal,
            area,
            radius,
        }
    }

    /// First-order far-field solid angle seen from `p`.
    fn dipole(&self, p: Vec3) -> f32 {
        let d = self.centroid - p;
        let dist = d.length();
        self.area_normal.dot(d) / (dist * dist * dist)
    }
}

/// Winding number of the triangle set at `p`.
///
/// A subtree is replaced by its dipole when `p` is farther than
/// `accuracy * radius` from its centroid; an infinite `accuracy` gives the
/// exact sum. Returns about 1 inside a closed, outward-oriented surface and
/// about 0 outside.
pub(crate) fn winding_number(
    p: Vec3,
    nodes: &[BvhNode],
    winding: &[WindingNode],
    accuracy: f32,
    mut triangle: impl FnMut(u32) -> Result<[Vec3; 3]>,
) -> Result<f32> {
    let mut total = 0.0_f32;
    let mut stack = vec![0_u32];
    while let Some(i) = stack.pop() {
        match nodes[i as usize].kind {
            NodeKind::Leaf { item } => {
                let [a, b, c] = triangle(item)?;
                total += solid_angle(p, a, b, c);
            }
            NodeKind::Internal { left, right } => {
                let w = &winding[i as usize];
                if w.centroid.distance(p) > accuracy * w.radius {
                    total += w.dipole(p);
                } else {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
    }
    Ok(total / (4.0 * PI))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn merge_is_area_weighted() {
        let a = WindingNode::from_triangle(Vec3::ZERO, Vec3::X, Vec3::Y);
        let b = WindingNode::from_triangle(
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(6.0, 0.0, 0.0),
            Vec3::new(4.0, 2.0, 0.0),
        );
        let m = a.merge(b);
        assert_relative_eq!(m.area, 0.5 + 2.0);
        assert_relative_eq!(m.area_normal, Vec3::new(0.0, 0.0, 2.5));
        let expected = (a.centroid * 0.5 + b.centroid * 2.0) / 2.5;
        assert_relative_eq!(m.centroid, expected);
        for v in [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(6.0, 0.0, 0.0), Vec3::new(4.0, 2.0, 0.0)] {
            assert!(m.centroid.distance(v) <= m.radius + 1e-5, "radius bounds every vertex");
        }
    }

    #[test]
    fn dipole_matches_exact_solid_angle_far_away() {
        let (a, b, c) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        let node = WindingNode::from_triangle(a, b, c);
        let p = Vec3::new(0.3, 0.3, -50.0);
        assert_relative_eq!(node.dipole(p), solid_angle(p, a, b, c), max_relative = 1e-3);
    }
}
