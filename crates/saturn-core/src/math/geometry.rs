// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Provides geometric primitive shapes for culling and shadow fitting.

use super::{Mat4, Vec3, Vec4};

/// Corners of the normalized device cube, near face first.
///
/// Depth uses the `[0, 1]` convention of `glam`'s `*_rh` projections.
pub const NDC_CORNERS: [Vec3; 8] = [
    Vec3::new(-1.0, 1.0, 0.0),
    Vec3::new(1.0, 1.0, 0.0),
    Vec3::new(1.0, -1.0, 0.0),
    Vec3::new(-1.0, -1.0, 0.0),
    Vec3::new(-1.0, 1.0, 1.0),
    Vec3::new(1.0, 1.0, 1.0),
    Vec3::new(1.0, -1.0, 1.0),
    Vec3::new(-1.0, -1.0, 1.0),
];

/// Transforms the NDC cube back through `inverse_view_projection`.
///
/// The first four corners lie on the near plane and the last four on the far
/// plane, in the same winding, so `corners[i + 4] - corners[i]` is the frustum
/// edge running from near to far.
pub fn frustum_corners(inverse_view_projection: &Mat4) -> [Vec3; 8] {
    NDC_CORNERS.map(|ndc| inverse_view_projection.project_point3(ndc))
}

/// A plane in Hessian normal form: `normal · p + distance = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing to the inside half-space.
    pub normal: Vec3,
    /// Signed distance term.
    pub distance: f32,
}

impl Plane {
    /// Builds the plane through the origin spanned by `a` and `b`, oriented so
    /// that `inside` lies on the positive side.
    ///
    /// Returns `None` when `a` and `b` are colinear.
    pub fn through_origin(a: Vec3, b: Vec3, inside: Vec3) -> Option<Self> {
        let mut normal = a.cross(b).try_normalize()?;
        if normal.dot(inside) < 0.0 {
            normal = -normal;
        }
        Some(Self {
            normal,
            distance: 0.0,
        })
    }

    /// Signed distance from `point` to the plane. Positive means inside.
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Packs the plane as a `vec4` for GPU upload.
    pub fn to_vec4(self) -> Vec4 {
        self.normal.extend(self.distance)
    }
}

/// A bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Center of the sphere.
    pub center: Vec3,
    /// Radius of the sphere.
    pub radius: f32,
}

impl Sphere {
    /// Returns `true` if any part of the sphere lies on the inside of `plane`.
    #[inline]
    pub fn intersects_half_space(&self, plane: &Plane) -> bool {
        plane.signed_distance(self.center) >= -self.radius
    }

    /// Returns `true` if `point` lies inside or on the sphere.
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frustum_corners_identity() {
        let corners = frustum_corners(&Mat4::IDENTITY);
        assert_eq!(corners, NDC_CORNERS);
    }

    #[test]
    fn test_frustum_corners_perspective_depths() {
        let projection = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.5, 100.0);
        let corners = frustum_corners(&projection.inverse());
        for near in &corners[..4] {
            assert_relative_eq!(near.z, -0.5, epsilon = 1e-4);
        }
        for far in &corners[4..] {
            assert_relative_eq!(far.z, -100.0, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_plane_orientation() {
        let plane = Plane::through_origin(Vec3::Y, Vec3::Z, Vec3::X).unwrap();
        assert_relative_eq!(plane.normal.x, 1.0);
        assert!(plane.signed_distance(Vec3::new(2.0, 0.0, 0.0)) > 0.0);

        let flipped = Plane::through_origin(Vec3::Y, Vec3::Z, -Vec3::X).unwrap();
        assert_relative_eq!(flipped.normal.x, -1.0);
    }

    #[test]
    fn test_colinear_plane_is_rejected() {
        assert!(Plane::through_origin(Vec3::X, Vec3::X * 2.0, Vec3::Y).is_none());
    }

    #[test]
    fn test_sphere_half_space() {
        let plane = Plane::through_origin(Vec3::Y, Vec3::Z, Vec3::X).unwrap();
        let touching = Sphere {
            center: Vec3::new(-0.5, 0.0, 0.0),
            radius: 1.0,
        };
        let outside = Sphere {
            center: Vec3::new(-2.0, 0.0, 0.0),
            radius: 1.0,
        };
        assert!(touching.intersects_half_space(&plane));
        assert!(!outside.intersects_half_space(&plane));
    }
}
