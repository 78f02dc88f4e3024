// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and helpers.

use glam::Vec3;

/// Axis-aligned bounding box in 3D.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds3 {
    /// Minimum corner.
    pub lower: Vec3,
    /// Maximum corner.
    pub upper: Vec3,
}

impl Default for Bounds3 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bounds3 {
    /// The explicitly empty box: `lower = +inf`, `upper = -inf`.
    ///
    /// It is the identity for [`Bounds3::union`].
    pub const EMPTY: Self = Self {
        lower: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
        upper: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
    };

    /// Create a box from its corners.
    pub const fn new(lower: Vec3, upper: Vec3) -> Self {
        Self { lower, upper }
    }

    /// Degenerate box around a single point.
    pub const fn from_point(p: Vec3) -> Self {
        Self { lower: p, upper: p }
    }

    /// Tight box around a triangle.
    #[inline]
    pub fn from_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            lower: a.min(b).min(c),
            upper: a.max(b).max(c),
        }
    }

    /// True if `lower <= upper` on every axis. NaN corners are never valid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lower.cmple(self.upper).all()
    }

    /// True if the box is empty or inverted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.is_valid()
    }

    /// Smallest box enclosing both boxes.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }

    /// Grow the box to include a point.
    #[inline]
    pub fn grow(&mut self, p: Vec3) {
        self.lower = self.lower.min(p);
        self.upper = self.upper.max(p);
    }

    /// Whether the box contains the point (boundary inclusive).
    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        self.lower.cmple(p).all() && p.cmple(self.upper).all()
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.lower.cmple(other.lower).all() && other.upper.cmple(self.upper).all()
    }

    /// Whether two boxes overlap (touching counts).
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.lower.cmple(other.upper).all() && other.lower.cmple(self.upper).all()
    }

    /// Center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        0.5 * (self.lower + self.upper)
    }

    /// Edge lengths, clamped at zero.
    #[inline]
    pub fn extents(&self) -> Vec3 {
        (self.upper - self.lower).max(Vec3::ZERO)
    }

    /// Index of the longest axis (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let e = self.extents();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }

    /// Surface area, widened to `f64` for split cost comparisons.
    #[inline]
    pub fn surface_area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extents().as_dvec3();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Squared distance from a point to the box; zero inside.
    #[inline]
    pub fn distance_squared(&self, p: Vec3) -> f32 {
        let d = (self.lower - p).max(p - self.upper).max(Vec3::ZERO);
        d.length_squared()
    }

    /// Slab test. Returns the entry distance along the ray if it hits within `[0, max_t]`.
    ///
    /// `inv_dir` is the component-wise reciprocal of the ray direction.
    #[inline]
    pub fn intersect_ray(&self, origin: Vec3, inv_dir: Vec3, max_t: f32) -> Option<f32> {
        let t0 = (self.lower - origin) * inv_dir;
        let t1 = (self.upper - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element().min(max_t);
        (near <= far).then_some(near)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_union_identity() {
        let b = Bounds3::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0));
        assert!(Bounds3::EMPTY.is_empty());
        assert_eq!(Bounds3::EMPTY.union(&b), b);
        assert_eq!(b.union(&Bounds3::EMPTY), b);
    }

    #[test]
    fn nan_corners_are_not_valid() {
        let b = Bounds3::new(Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ONE);
        assert!(!b.is_valid());
    }

    #[test]
    fn distance_and_overlap() {
        let b = Bounds3::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(b.distance_squared(Vec3::splat(0.5)), 0.0);
        assert_eq!(b.distance_squared(Vec3::new(3.0, 0.5, 0.5)), 4.0);
        let touching = Bounds3::new(Vec3::ONE, Vec3::splat(2.0));
        assert!(b.overlaps(&touching));
        let apart = Bounds3::new(Vec3::splat(1.5), Vec3::splat(2.0));
        assert!(!b.overlaps(&apart));
    }

    #[test]
    fn ray_slab_hits_and_misses() {
        let b = Bounds3::new(Vec3::ZERO, Vec3::ONE);
        let origin = Vec3::new(-1.0, 0.5, 0.5);
        let dir = Vec3::X;
        assert_eq!(b.intersect_ray(origin, dir.recip(), f32::MAX), Some(1.0));
        assert_eq!(b.intersect_ray(origin, dir.recip(), 0.5), None);
        assert_eq!(b.intersect_ray(origin, (-dir).recip(), f32::MAX), None);
    }

    #[test]
    fn longest_axis_picks_largest_extent() {
        let b = Bounds3::new(Vec3::ZERO, Vec3::new(1.0, 3.0, 2.0));
        assert_eq!(b.longest_axis(), 1);
    }
}
