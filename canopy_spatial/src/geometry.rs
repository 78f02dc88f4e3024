// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Triangle-level geometric kernels shared by the mesh queries.

use glam::Vec3;

/// Closest point on triangle `abc` to `p`.
///
/// Returns the point and its barycentric weights `[wa, wb, wc]` (summing to one).
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (Vec3, [f32; 3]) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, [0.0, 1.0 - w, w]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}

/// Half the cross product of the edges: area times unit normal.
#[inline]
pub fn area_vector(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    0.5 * (b - a).cross(c - a)
}

/// Signed solid angle subtended by triangle `abc` as seen from `p`.
///
/// Positive when `p` lies behind the triangle (on the side opposite its
/// counter-clockwise normal). Uses the Van Oosterom-Strackee formula.
pub fn solid_angle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let a = a - p;
    let b = b - p;
    let c = c - p;
    let la = a.length();
    let lb = b.length();
    let lc = c.length();
    let numerator = a.dot(b.cross(c));
    let denominator = la * lb * lc + a.dot(b) * lc + a.dot(c) * lb + b.dot(c) * la;
    2.0 * numerator.atan2(denominator)
}

/// Ray/triangle hit record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriangleHit {
    /// Distance along the ray direction.
    pub t: f32,
    /// Barycentric weight of the first vertex.
    pub u: f32,
    /// Barycentric weight of the second vertex.
    pub v: f32,
    /// `+1` when the ray hits the front (counter-clockwise) face, `-1` otherwise.
    pub sign: f32,
    /// Unit face normal.
    pub normal: Vec3,
}

/// Moller-Trumbore ray/triangle intersection within `[0, max_t]`.
pub fn intersect_ray_triangle(
    origin: Vec3,
    dir: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    max_t: f32,
) -> Option<TriangleHit> {
    let e1 = b - a;
    let e2 = c - a;
    let pvec = dir.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() <= f32::EPSILON * e1.length() * e2.length() {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - a;
    let wb = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&wb) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let wc = dir.dot(qvec) * inv_det;
    if wc < 0.0 || wb + wc > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    if !(0.0..=max_t).contains(&t) {
        return None;
    }
    let normal = e1.cross(e2).normalize_or_zero();
    Some(TriangleHit {
        t,
        u: 1.0 - wb - wc,
        v: wb,
        sign: if det > 0.0 { 1.0 } else { -1.0 },
        normal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use core::f32::consts::PI;

    const A: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    const B: Vec3 = Vec3::new(1.0, 0.0, 0.0);
    const C: Vec3 = Vec3::new(0.0, 1.0, 0.0);

    #[test]
    fn closest_point_regions() {
        let (p, w) = closest_point_on_triangle(Vec3::new(0.25, 0.25, 1.0), A, B, C);
        assert_relative_eq!(p, Vec3::new(0.25, 0.25, 0.0));
        assert_relative_eq!(w[0] + w[1] + w[2], 1.0);

        let (p, w) = closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), A, B, C);
        assert_eq!(p, A);
        assert_eq!(w, [1.0, 0.0, 0.0]);

        let (p, _) = closest_point_on_triangle(Vec3::new(0.5, -2.0, 0.0), A, B, C);
        assert_relative_eq!(p, Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn solid_angle_sign_follows_orientation() {
        // Normal of ABC is +z; a point below sees the back face.
        let below = solid_angle(Vec3::new(0.2, 0.2, -1.0), A, B, C);
        let above = solid_angle(Vec3::new(0.2, 0.2, 1.0), A, B, C);
        assert!(below > 0.0);
        assert_relative_eq!(below, -above, epsilon = 1e-6);
        // Infinitesimally close to the interior the triangle covers a hemisphere.
        let close = solid_angle(Vec3::new(0.2, 0.2, -1e-4), A, B, C);
        assert_relative_eq!(close, 2.0 * PI, epsilon = 1e-2);
    }

    #[test]
    fn ray_hits_front_and_back() {
        let hit = intersect_ray_triangle(Vec3::new(0.25, 0.25, 1.0), -Vec3::Z, A, B, C, 10.0)
            .expect("ray should hit");
        assert_relative_eq!(hit.t, 1.0);
        assert_eq!(hit.sign, 1.0);
        assert_relative_eq!(hit.normal, Vec3::Z);

        let back = intersect_ray_triangle(Vec3::new(0.25, 0.25, -1.0), Vec3::Z, A, B, C, 10.0)
            .expect("ray should hit");
        assert_eq!(back.sign, -1.0);

        assert!(intersect_ray_triangle(Vec3::new(2.0, 2.0, 1.0), -Vec3::Z, A, B, C, 10.0).is_none());
        assert!(intersect_ray_triangle(Vec3::new(0.25, 0.25, 1.0), -Vec3::Z, A, B, C, 0.5).is_none());
    }
}
