//! View frustum for culling

use crate::core::types::{Vec3, Vec4, Mat4};
use super::aabb::Aabb;

/// Plane in Hessian normal form; the normal points into the frustum
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Six clip planes in the order near, far, left, right, top, bottom
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix (Gribb/Hartmann).
    ///
    /// Assumes a [0, 1] clip-space depth range, as produced by glam's
    /// `perspective_rh`.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let row0 = vp.row(0);
        let row1 = vp.row(1);
        let row2 = vp.row(2);
        let row3 = vp.row(3);

        let near = Self::normalize_plane(row2);
        let far = Self::normalize_plane(row3 - row2);
        let left = Self::normalize_plane(row3 + row0);
        let right = Self::normalize_plane(row3 - row0);
        let top = Self::normalize_plane(row3 - row1);
        let bottom = Self::normalize_plane(row3 + row1);

        Self {
            planes: [near, far, left, right, top, bottom],
        }
    }

    /// Build from separate view and projection matrices
    pub fn from_view_and_projection(view: &Mat4, projection: &Mat4) -> Self {
        Self::from_view_projection(&(*projection * *view))
    }

    fn normalize_plane(coefficients: Vec4) -> Plane {
        let normal = coefficients.truncate();
        match normal.length() {
            len if len > f32::EPSILON => Plane::new(normal / len, coefficients.w / len),
            // Degenerate row from a malformed matrix; accepts everything with w >= 0
            _ => Plane::new(Vec3::ZERO, coefficients.w),
        }
    }

    /// True when the point is on the inner side of all six planes
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if a sphere touches the frustum (conservative)
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }

    /// Conservative box test: rejects only when the box lies fully behind one plane
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(aabb.positive_vertex(plane.normal)) >= 0.0)
    }
}
