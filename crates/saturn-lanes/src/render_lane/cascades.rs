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

//! Cascaded shadow map fitting.
//!
//! The camera frustum is cut into `cascade_count` slices along view depth.
//! Each slice is enclosed in a bounding sphere, and an orthographic light
//! projection is fitted around that sphere. Using a sphere keeps the
//! projection size constant while the camera rotates, and snapping the
//! projection to whole shadow-map texels keeps edges from shimmering while it
//! translates.

use saturn_core::config::{ShadowSettings, MAX_SHADOW_CASCADES};
use saturn_core::math::{frustum_corners, Mat4, Vec2, Vec3, Vec4};
use saturn_core::renderer::ViewInfo;

/// Smallest depth range a slice may span.
const MIN_SLICE_DEPTH: f32 = 1e-3;

/// Bounding sphere radii are rounded up to this step so that small camera
/// motions do not change the projection size.
const RADIUS_QUANTUM: f32 = 1.0 / 16.0;

/// Reasons a set of cascades cannot be built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CascadeError {
    /// Cascade count outside `1..=MAX_SHADOW_CASCADES`.
    #[error("cascade count must be in 1..={max}, got {0}", max = MAX_SHADOW_CASCADES)]
    InvalidCascadeCount(u32),
    /// Camera planes with `near <= 0`, `near >= far` or a non-finite value.
    #[error("invalid camera depth range: near {near}, far {far}")]
    InvalidDepthRange {
        /// Camera near plane.
        near: f32,
        /// Camera far plane.
        far: f32,
    },
    /// The light direction cannot be normalized.
    #[error("light direction is zero or not finite")]
    DegenerateLightDirection,
    /// A zero-sized shadow map.
    #[error("shadow map resolution must be non-zero")]
    ZeroResolution,
}

/// The inputs of [`build_cascades`] taken from [`ShadowSettings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    /// Number of cascades.
    pub cascade_count: u32,
    /// Linear (`0`) to logarithmic (`1`) split blend. Clamped to `[0, 1]`.
    pub split_lambda: f32,
    /// Near plane of every light projection. Negative values extend it
    /// towards the light so that casters outside the slice still land in the map.
    pub near_offset: f32,
    /// Added to the camera far plane to get the shadow distance. The result
    /// never exceeds the camera far plane.
    pub far_offset: f32,
    /// Shadow map width and height in texels.
    pub resolution: u32,
}

impl From<&ShadowSettings> for CascadeParams {
    fn from(settings: &ShadowSettings) -> Self {
        Self {
            cascade_count: settings.cascade_count,
            split_lambda: settings.split_lambda,
            near_offset: settings.near_offset,
            far_offset: settings.far_offset,
            resolution: settings.resolution,
        }
    }
}

/// One fitted cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCascade {
    /// View depth where this cascade ends.
    pub split_depth: f32,
    /// View depth where this cascade begins.
    pub near_depth: f32,
    /// World to light clip space.
    pub view_projection: Mat4,
    /// World-space size of one shadow-map texel.
    pub texel_size: f32,
}

/// The cascades built for the current frame, published into the lane context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameCascades(pub Vec<ShadowCascade>);

/// Computes the far depth of every cascade.
///
/// Splits blend a uniform and a logarithmic distribution. The last split is
/// exactly `far`, and the splits increase strictly.
pub fn cascade_splits(near: f32, far: f32, cascade_count: u32, lambda: f32) -> Vec<f32> {
    let lambda = lambda.clamp(0.0, 1.0);
    let ratio = far / near;
    let range = far - near;
    (1..=cascade_count)
        .map(|i| {
            if i == cascade_count {
                return far;
            }
            let p = i as f32 / cascade_count as f32;
            let log = near * ratio.powf(p);
            let uniform = near + range * p;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Fits one orthographic shadow projection per cascade around `view`.
///
/// `light_direction` points from the light towards the scene.
///
/// # Errors
///
/// Returns a [`CascadeError`] when the parameters or the camera planes are
/// invalid. No cascade is produced in that case.
pub fn build_cascades(
    view: &ViewInfo,
    light_direction: Vec3,
    params: &CascadeParams,
) -> Result<Vec<ShadowCascade>, CascadeError> {
    if params.cascade_count == 0 || params.cascade_count > MAX_SHADOW_CASCADES {
        return Err(CascadeError::InvalidCascadeCount(params.cascade_count));
    }
    if params.resolution == 0 {
        return Err(CascadeError::ZeroResolution);
    }
    let (near, far) = (view.near, view.far);
    if !near.is_finite() || !far.is_finite() || near <= 0.0 || near >= far {
        return Err(CascadeError::InvalidDepthRange { near, far });
    }
    let direction = light_direction
        .try_normalize()
        .ok_or(CascadeError::DegenerateLightDirection)?;

    let shadow_far = (far + params.far_offset)
        .min(far)
        .max(near + MIN_SLICE_DEPTH);
    let splits = cascade_splits(near, shadow_far, params.cascade_count, params.split_lambda);

    let corners = frustum_corners(&view.view_projection_matrix().inverse());
    let camera_range = far - near;

    let mut cascades = Vec::with_capacity(splits.len());
    let mut slice_near = near;
    for split in splits {
        let t0 = (slice_near - near) / camera_range;
        let t1 = (split - near) / camera_range;
        let mut slice = [Vec3::ZERO; 8];
        for i in 0..4 {
            let edge = corners[i + 4] - corners[i];
            slice[i] = corners[i] + edge * t0;
            slice[i + 4] = corners[i] + edge * t1;
        }

        let (view_projection, radius) = fit_light_projection(&slice, direction, params);
        cascades.push(ShadowCascade {
            split_depth: split,
            near_depth: slice_near,
            view_projection,
            texel_size: 2.0 * radius / params.resolution as f32,
        });
        slice_near = split;
    }

    Ok(cascades)
}

fn fit_light_projection(slice: &[Vec3; 8], direction: Vec3, params: &CascadeParams) -> (Mat4, f32) {
    // 1. Bounding sphere of the slice.
    let center = slice.iter().copied().sum::<Vec3>() / 8.0;
    let radius = slice
        .iter()
        .map(|corner| corner.distance(center))
        .fold(0.0f32, f32::max);
    let radius = ((radius / RADIUS_QUANTUM).ceil() * RADIUS_QUANTUM).max(RADIUS_QUANTUM);

    // 2. Light view looking at the sphere from its edge.
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let eye = center - direction * radius;
    let light_view = Mat4::look_at_rh(eye, center, up);
    let mut projection = Mat4::orthographic_rh(
        -radius,
        radius,
        -radius,
        radius,
        params.near_offset.min(0.0),
        2.0 * radius,
    );

    // 3. Snap the world origin onto the texel grid.
    let half_resolution = params.resolution as f32 * 0.5;
    let origin = (projection * light_view) * Vec4::W;
    let texel_origin = Vec2::new(origin.x, origin.y) * half_resolution;
    let offset = (texel_origin.round() - texel_origin) / half_resolution;
    projection.w_axis.x += offset.x;
    projection.w_axis.y += offset.y;

    (projection * light_view, radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use saturn_core::renderer::SceneCamera;

    fn view(near: f32, far: f32) -> ViewInfo {
        let camera = SceneCamera::perspective(60f32.to_radians(), 16.0 / 9.0, near, far);
        let view_matrix = Mat4::look_at_rh(Vec3::new(3.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y);
        ViewInfo::new(&camera, view_matrix)
    }

    fn params(cascade_count: u32) -> CascadeParams {
        CascadeParams::from(&ShadowSettings {
            cascade_count,
            far_offset: 0.0,
            ..ShadowSettings::default()
        })
    }

    fn sun() -> Vec3 {
        Vec3::new(-0.4, -1.0, -0.3)
    }

    #[test]
    fn test_splits_increase_to_far() {
        let cascades = build_cascades(&view(0.1, 1000.0), sun(), &params(4)).unwrap();
        assert_eq!(cascades.len(), 4);
        let mut previous = 0.1;
        for cascade in &cascades {
            assert!(cascade.split_depth > previous);
            assert!(cascade.split_depth <= 1000.0);
            assert_eq!(cascade.near_depth, previous);
            previous = cascade.split_depth;
        }
        assert_eq!(cascades[3].split_depth, 1000.0);
    }

    #[test]
    fn test_zero_lambda_gives_uniform_splits() {
        let splits = cascade_splits(1.0, 101.0, 4, 0.0);
        assert_relative_eq!(splits[0], 26.0, epsilon = 1e-4);
        assert_relative_eq!(splits[1], 51.0, epsilon = 1e-4);
        assert_relative_eq!(splits[2], 76.0, epsilon = 1e-4);
        assert_eq!(splits[3], 101.0);
    }

    #[test]
    fn test_full_lambda_gives_logarithmic_splits() {
        let splits = cascade_splits(1.0, 10_000.0, 4, 1.0);
        assert_relative_eq!(splits[0], 10.0, epsilon = 1e-3);
        assert_relative_eq!(splits[1], 100.0, epsilon = 1e-2);
        assert_relative_eq!(splits[2], 1000.0, epsilon = 1e-1);
    }

    #[test]
    fn test_far_offset_never_extends_past_camera_far() {
        let mut p = params(2);
        p.far_offset = 500.0;
        let cascades = build_cascades(&view(0.1, 1000.0), sun(), &p).unwrap();
        assert_eq!(cascades[1].split_depth, 1000.0);

        p.far_offset = -200.0;
        let cascades = build_cascades(&view(0.1, 1000.0), sun(), &p).unwrap();
        assert_relative_eq!(cascades[1].split_depth, 800.0);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let v = view(0.1, 100.0);
        assert_eq!(
            build_cascades(&v, sun(), &params(0)),
            Err(CascadeError::InvalidCascadeCount(0))
        );
        assert_eq!(
            build_cascades(&v, sun(), &params(5)),
            Err(CascadeError::InvalidCascadeCount(5))
        );
        assert_eq!(
            build_cascades(&v, Vec3::ZERO, &params(2)),
            Err(CascadeError::DegenerateLightDirection)
        );

        let mut p = params(2);
        p.resolution = 0;
        assert_eq!(build_cascades(&v, sun(), &p), Err(CascadeError::ZeroResolution));

        let mut inverted = v;
        inverted.near = 200.0;
        assert!(matches!(
            build_cascades(&inverted, sun(), &params(2)),
            Err(CascadeError::InvalidDepthRange { .. })
        ));
        let mut zero_near = v;
        zero_near.near = 0.0;
        assert!(matches!(
            build_cascades(&zero_near, sun(), &params(2)),
            Err(CascadeError::InvalidDepthRange { .. })
        ));
    }

    #[test]
    fn test_world_origin_lands_on_texel_grid() {
        let p = params(3);
        let half = p.resolution as f32 * 0.5;
        for cascade in build_cascades(&view(0.5, 300.0), sun(), &p).unwrap() {
            let origin = cascade.view_projection * Vec4::W;
            for texel in [origin.x * half, origin.y * half] {
                assert!(
                    (texel - texel.round()).abs() < 1e-2,
                    "origin at texel coordinate {texel}"
                );
            }
        }
    }

    #[test]
    fn test_slices_fit_inside_light_clip_space() {
        let v = view(0.1, 200.0);
        let p = params(4);
        let cascades = build_cascades(&v, sun(), &p).unwrap();
        let corners = frustum_corners(&v.view_projection_matrix().inverse());
        let margin = 2.0 / p.resolution as f32 + 1e-4;

        for cascade in &cascades {
            let t0 = (cascade.near_depth - v.near) / (v.far - v.near);
            let t1 = (cascade.split_depth - v.near) / (v.far - v.near);
            for i in 0..4 {
                for t in [t0, t1] {
                    let world = corners[i] + (corners[i + 4] - corners[i]) * t;
                    let clip = cascade.view_projection.project_point3(world);
                    assert!(clip.x.abs() <= 1.0 + margin, "x = {}", clip.x);
                    assert!(clip.y.abs() <= 1.0 + margin, "y = {}", clip.y);
                    assert!((-1e-4..=1.0 + 1e-4).contains(&clip.z), "z = {}", clip.z);
                }
            }
        }
    }

    #[test]
    fn test_vertical_light_uses_alternate_up_axis() {
        let cascades = build_cascades(&view(0.1, 50.0), Vec3::NEG_Y, &params(1)).unwrap();
        assert!(cascades[0].view_projection.is_finite());
        assert!(cascades[0].texel_size > 0.0);
    }
}
