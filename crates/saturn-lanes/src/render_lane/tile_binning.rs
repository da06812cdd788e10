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

//! CPU reference of the tiled light culling pass.
//!
//! [`TileLightBinner`] performs the same test as `light_culling.wgsl`: each
//! tile's frustum is bounded by four side planes through the eye and by the
//! tile's depth range, and a light is kept when its bounding sphere touches
//! all of them. The compute pass is the one used for rendering; this version
//! backs tests and tooling that need to inspect the tile lists.

use saturn_core::math::{Extent2D, Mat4, Plane, Vec3};
use saturn_core::renderer::{LightCullingConfig, PointLight, ViewInfo};

/// Per-tile light lists, laid out like the GPU grid and index buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBins {
    /// Tiles per row.
    pub tiles_x: u32,
    /// Tiles per column.
    pub tiles_y: u32,
    /// Stride of `indices`, one block per tile.
    pub max_lights_per_tile: u32,
    /// Light count per tile, row-major.
    pub counts: Vec<u32>,
    /// Light indices, `max_lights_per_tile` entries per tile.
    pub indices: Vec<u32>,
    /// Lights dropped because a tile was full, summed over all tiles.
    pub overflowed: u32,
}

impl TileBins {
    /// The lights touching tile `(x, y)`.
    pub fn tile(&self, x: u32, y: u32) -> &[u32] {
        let tile = (y * self.tiles_x + x) as usize;
        let start = tile * self.max_lights_per_tile as usize;
        &self.indices[start..start + self.counts[tile] as usize]
    }
}

/// Bins point lights into screen tiles.
#[derive(Debug, Clone, Copy)]
pub struct TileLightBinner {
    config: LightCullingConfig,
    extent: Extent2D,
}

impl TileLightBinner {
    /// Creates a binner for a viewport.
    pub fn new(config: LightCullingConfig, extent: Extent2D) -> Self {
        Self { config, extent }
    }

    /// Tile grid dimensions.
    pub fn tile_dimensions(&self) -> (u32, u32) {
        self.config.tile_dimensions(self.extent)
    }

    /// Bins `lights` for `view`.
    ///
    /// `depth_bounds` holds each tile's `(min, max)` view depth in row-major
    /// order. When it does not cover every tile, the camera's near and far
    /// planes are used instead.
    pub fn bin(
        &self,
        view: &ViewInfo,
        lights: &[PointLight],
        depth_bounds: &[(f32, f32)],
    ) -> TileBins {
        let (tiles_x, tiles_y) = self.tile_dimensions();
        let total = (tiles_x * tiles_y) as usize;
        let stride = self.config.max_lights_per_tile;
        let mut bins = TileBins {
            tiles_x,
            tiles_y,
            max_lights_per_tile: stride,
            counts: vec![0; total],
            indices: vec![0; total * stride as usize],
            overflowed: 0,
        };

        let inverse_projection = view.projection_matrix.inverse();
        let view_lights: Vec<(Vec3, f32)> = lights
            .iter()
            .map(|light| (view.view_matrix.transform_point3(light.position), light.radius))
            .collect();
        let use_bounds = depth_bounds.len() == total;

        for y in 0..tiles_y {
            for x in 0..tiles_x {
                let tile = (y * tiles_x + x) as usize;
                let (min_depth, max_depth) = if use_bounds {
                    depth_bounds[tile]
                } else {
                    (view.near, view.far)
                };
                let planes = self.side_planes(x, y, &inverse_projection);

                for (index, &(center, radius)) in view_lights.iter().enumerate() {
                    let depth = -center.z;
                    if depth + radius < min_depth || depth - radius > max_depth {
                        continue;
                    }
                    if !planes.iter().all(|plane| plane.signed_distance(center) >= -radius) {
                        continue;
                    }
                    let count = bins.counts[tile];
                    if count == stride {
                        bins.overflowed += 1;
                        continue;
                    }
                    bins.indices[tile * stride as usize + count as usize] = index as u32;
                    bins.counts[tile] = count + 1;
                }
            }
        }

        bins
    }

    /// The four view-space planes bounding tile `(x, y)`, normals facing inwards.
    fn side_planes(&self, x: u32, y: u32, inverse_projection: &Mat4) -> Vec<Plane> {
        let size = self.config.tile_size.pixels();
        let x0 = (x * size) as f32;
        let y0 = (y * size) as f32;
        let x1 = ((x + 1) * size).min(self.extent.width) as f32;
        let y1 = ((y + 1) * size).min(self.extent.height) as f32;

        let corner = |px: f32, py: f32| self.unproject(px, py, 1.0, inverse_projection);
        let corners = [corner(x0, y0), corner(x1, y0), corner(x1, y1), corner(x0, y1)];
        let center = self.unproject((x0 + x1) * 0.5, (y0 + y1) * 0.5, 1.0, inverse_projection);

        (0..4)
            .filter_map(|i| Plane::through_origin(corners[i], corners[(i + 1) % 4], center))
            .collect()
    }

    /// Pixel coordinates plus NDC depth to view space.
    fn unproject(&self, px: f32, py: f32, depth: f32, inverse_projection: &Mat4) -> Vec3 {
        let ndc_x = 2.0 * px / self.extent.width as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * py / self.extent.height as f32;
        inverse_projection.project_point3(Vec3::new(ndc_x, ndc_y, depth))
    }
}

/// Reduces a depth buffer to per-tile `(min, max)` view depths.
///
/// `depth` holds one NDC depth per pixel, row-major.
pub fn tile_depth_bounds(
    depth: &[f32],
    extent: Extent2D,
    config: &LightCullingConfig,
    inverse_projection: &Mat4,
) -> Vec<(f32, f32)> {
    let (tiles_x, tiles_y) = config.tile_dimensions(extent);
    let size = config.tile_size.pixels();
    let mut bounds = vec![(f32::MAX, f32::MIN); (tiles_x * tiles_y) as usize];

    for (i, &d) in depth.iter().enumerate().take(extent.width as usize * extent.height as usize) {
        let px = i as u32 % extent.width;
        let py = i as u32 / extent.width;
        let ndc_x = 2.0 * (px as f32 + 0.5) / extent.width as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * (py as f32 + 0.5) / extent.height as f32;
        let view_depth = -inverse_projection.project_point3(Vec3::new(ndc_x, ndc_y, d)).z;

        let tile = ((py / size) * tiles_x + px / size) as usize;
        let (min, max) = &mut bounds[tile];
        *min = min.min(view_depth);
        *max = max.max(view_depth);
    }

    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_core::renderer::{SceneCamera, TileSize};

    /// Deterministic generator for reproducible light sets.
    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 40) as f32 / (1u64 << 24) as f32
        }

        fn range(&mut self, min: f32, max: f32) -> f32 {
            min + (max - min) * self.next_f32()
        }
    }

    fn view(extent: Extent2D) -> ViewInfo {
        let camera = SceneCamera::perspective(70f32.to_radians(), extent.aspect_ratio(), 0.1, 100.0);
        ViewInfo::new(&camera, Mat4::look_at_rh(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y))
    }

    fn random_lights(rng: &mut Lcg, count: usize) -> Vec<PointLight> {
        (0..count)
            .map(|_| PointLight {
                position: Vec3::new(rng.range(-10.0, 10.0), rng.range(-3.0, 6.0), rng.range(-20.0, 6.0)),
                radius: rng.range(0.5, 4.0),
                ..PointLight::default()
            })
            .collect()
    }

    #[test]
    fn test_culled_lists_shade_like_the_full_list() {
        let extent = Extent2D::new(160, 96);
        let config = LightCullingConfig::default();
        let view = view(extent);
        let mut rng = Lcg(7);
        let lights = random_lights(&mut rng, 64);

        let binner = TileLightBinner::new(config, extent);
        let bins = binner.bin(&view, &lights, &[]);
        assert_eq!(bins.overflowed, 0);

        let inverse_projection = view.projection_matrix.inverse();
        let inverse_view = view.view_matrix.inverse();
        for _ in 0..2000 {
            let px = rng.range(0.0, extent.width as f32 - 0.01);
            let py = rng.range(0.0, extent.height as f32 - 0.01);
            let ndc_depth = rng.range(0.0, 1.0);
            let world = inverse_view
                .transform_point3(binner.unproject(px, py, ndc_depth, &inverse_projection));

            let tile = bins.tile(px as u32 / 16, py as u32 / 16);
            let culled: Vec3 = tile.iter().map(|&i| lights[i as usize].radiance_at(world)).sum();
            let full: Vec3 = lights.iter().map(|light| light.radiance_at(world)).sum();
            assert!(
                culled.abs_diff_eq(full, 1e-4),
                "pixel ({px}, {py}) lost light: culled {culled}, full {full}"
            );
        }
    }

    #[test]
    fn test_depth_bounded_lists_shade_visible_surfaces_like_the_full_list() {
        let extent = Extent2D::new(160, 96);
        let config = LightCullingConfig::default();
        let view = view(extent);
        let mut rng = Lcg(11);
        let lights = random_lights(&mut rng, 64);

        // A surface receding from 3 to 15 units towards the top of the
        // image, with some per-pixel relief.
        let mut depth = Vec::with_capacity((extent.width * extent.height) as usize);
        for py in 0..extent.height {
            for _ in 0..extent.width {
                let view_depth =
                    3.0 + 12.0 * (1.0 - py as f32 / extent.height as f32) + rng.range(0.0, 0.5);
                depth.push(
                    view.projection_matrix
                        .project_point3(Vec3::new(0.0, 0.0, -view_depth))
                        .z,
                );
            }
        }

        let inverse_projection = view.projection_matrix.inverse();
        let bounds = tile_depth_bounds(&depth, extent, &config, &inverse_projection);
        let binner = TileLightBinner::new(config, extent);
        let bounded = binner.bin(&view, &lights, &bounds);
        let unbounded = binner.bin(&view, &lights, &[]);
        assert_eq!(bounded.overflowed, 0);
        assert!(
            bounded.counts.iter().sum::<u32>() < unbounded.counts.iter().sum::<u32>(),
            "depth bounds shorten the tile lists"
        );

        let inverse_view = view.view_matrix.inverse();
        for py in 0..extent.height {
            for px in 0..extent.width {
                let ndc_depth = depth[(py * extent.width + px) as usize];
                let surface = binner.unproject(
                    px as f32 + 0.5,
                    py as f32 + 0.5,
                    ndc_depth,
                    &inverse_projection,
                );
                let world = inverse_view.transform_point3(surface);

                let tile = bounded.tile(px / 16, py / 16);
                let culled: Vec3 =
                    tile.iter().map(|&i| lights[i as usize].radiance_at(world)).sum();
                let full: Vec3 = lights.iter().map(|light| light.radiance_at(world)).sum();
                assert!(
                    culled.abs_diff_eq(full, 1e-4),
                    "pixel ({px}, {py}) lost light: culled {culled}, full {full}"
                );
            }
        }
    }

    #[test]
    fn test_tile_cap_drops_extra_lights() {
        let extent = Extent2D::new(32, 32);
        let config = LightCullingConfig {
            tile_size: TileSize::X32,
            max_lights_per_tile: 3,
        };
        let lights = vec![
            PointLight {
                position: Vec3::new(0.0, 2.0, 0.0),
                radius: 50.0,
                ..PointLight::default()
            };
            5
        ];
        let bins = TileLightBinner::new(config, extent).bin(&view(extent), &lights, &[]);
        assert_eq!(bins.tile(0, 0), &[0, 1, 2]);
        assert_eq!(bins.overflowed, 2);
    }

    #[test]
    fn test_light_behind_camera_is_culled() {
        let extent = Extent2D::new(64, 64);
        let lights = [PointLight {
            position: Vec3::new(0.0, 2.0, 20.0),
            radius: 1.0,
            ..PointLight::default()
        }];
        let bins = TileLightBinner::new(LightCullingConfig::default(), extent).bin(&view(extent), &lights, &[]);
        assert!(bins.counts.iter().all(|&count| count == 0));
    }

    #[test]
    fn test_depth_bounds_reject_lights_in_front_of_geometry_range() {
        let extent = Extent2D::new(16, 16);
        let view = view(extent);
        let config = LightCullingConfig::default();
        // In front of the camera, at a view depth of about 7.8.
        let lights = [PointLight {
            position: Vec3::new(0.0, 2.0, 0.0),
            radius: 1.0,
            ..PointLight::default()
        }];
        let binner = TileLightBinner::new(config, extent);
        assert_eq!(binner.bin(&view, &lights, &[(20.0, 30.0)]).counts, vec![0]);
        assert_eq!(binner.bin(&view, &lights, &[(5.0, 30.0)]).counts, vec![1]);
    }

    #[test]
    fn test_tile_depth_bounds_of_flat_buffer() {
        let extent = Extent2D::new(32, 16);
        let config = LightCullingConfig::default();
        let camera = SceneCamera::perspective(60f32.to_radians(), 2.0, 0.1, 100.0);
        let depth = vec![1.0; 32 * 16];

        let bounds = tile_depth_bounds(&depth, extent, &config, &camera.projection.inverse());
        assert_eq!(bounds.len(), 2);
        for (min, max) in bounds {
            approx::assert_relative_eq!(min, 100.0, max_relative = 1e-3);
            approx::assert_relative_eq!(max, 100.0, max_relative = 1e-3);
        }
    }
}
