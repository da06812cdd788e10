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

//! Defines data structures for tiled (forward+) light culling.
//!
//! The viewport is divided into fixed-size tiles and a compute pass works out
//! which point lights touch each tile. The geometry pass then only evaluates
//! the lights of the fragment's tile.
//!
//! - **Complexity**: O(lights × tiles) for culling plus O(pixels × lights_per_tile)
//!   for shading, instead of O(lights × pixels).
//! - **Memory**: the tile grid and index buffers scale with the viewport size,
//!   so they are rebuilt on every resize.

use crate::math::Extent2D;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// The tile size for light culling.
///
/// Smaller tiles cull more precisely but cost more compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TileSize {
    /// 16×16 pixel tiles.
    #[default]
    X16,
    /// 32×32 pixel tiles.
    X32,
}

impl TileSize {
    /// Returns the tile size in pixels.
    #[inline]
    pub const fn pixels(&self) -> u32 {
        match self {
            TileSize::X16 => 16,
            TileSize::X32 => 32,
        }
    }

    /// Calculates the number of tiles needed to cover `screen_size` pixels.
    #[inline]
    pub const fn tile_count(&self, screen_size: u32) -> u32 {
        screen_size.div_ceil(self.pixels())
    }
}

/// Configuration of the light culling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightCullingConfig {
    /// The tile size.
    pub tile_size: TileSize,
    /// Maximum number of lights recorded per tile. Extra lights are dropped.
    pub max_lights_per_tile: u32,
}

impl Default for LightCullingConfig {
    fn default() -> Self {
        Self {
            tile_size: TileSize::X16,
            max_lights_per_tile: 128,
        }
    }
}

impl LightCullingConfig {
    /// Calculates the tile grid dimensions for a viewport.
    #[inline]
    pub const fn tile_dimensions(&self, extent: Extent2D) -> (u32, u32) {
        (
            self.tile_size.tile_count(extent.width),
            self.tile_size.tile_count(extent.height),
        )
    }

    /// Calculates the total number of tiles for a viewport.
    #[inline]
    pub fn total_tiles(&self, extent: Extent2D) -> u32 {
        let (tiles_x, tiles_y) = self.tile_dimensions(extent);
        tiles_x * tiles_y
    }

    /// The compute dispatch size: one workgroup per tile.
    pub fn workgroup_count(&self, extent: Extent2D) -> (u32, u32, u32) {
        let (tiles_x, tiles_y) = self.tile_dimensions(extent);
        (tiles_x, tiles_y, 1)
    }

    /// Size in bytes of the light index buffer (`max_lights_per_tile` `u32`s per tile).
    pub fn light_index_buffer_size(&self, extent: Extent2D) -> u64 {
        self.total_tiles(extent) as u64
            * self.max_lights_per_tile as u64
            * std::mem::size_of::<u32>() as u64
    }

    /// Size in bytes of the light grid buffer. Each tile stores `(offset, count)`.
    pub fn light_grid_buffer_size(&self, extent: Extent2D) -> u64 {
        self.total_tiles(extent) as u64 * 2 * std::mem::size_of::<u32>() as u64
    }
}

/// Uniforms of the light culling compute shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightCullingUniforms {
    /// World to view space.
    pub view: [[f32; 4]; 4],
    /// Clip to view space.
    pub inverse_projection: [[f32; 4]; 4],
    /// Viewport width and height in pixels.
    pub screen_size: [f32; 2],
    /// Tile grid width and height.
    pub tile_count: [u32; 2],
    /// Number of point lights in the light buffer.
    pub light_count: u32,
    /// Tile size in pixels.
    pub tile_size: u32,
    /// Per-tile cap.
    pub max_lights_per_tile: u32,
    /// Padding to a 16-byte multiple.
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_dimensions_1080p() {
        let config = LightCullingConfig::default();
        assert_eq!(
            config.tile_dimensions(Extent2D::new(1920, 1080)),
            (120, 68)
        );
        assert_eq!(config.total_tiles(Extent2D::new(1920, 1080)), 8160);
    }

    #[test]
    fn test_coarse_tiles() {
        let config = LightCullingConfig {
            tile_size: TileSize::X32,
            max_lights_per_tile: 64,
        };
        assert_eq!(config.tile_dimensions(Extent2D::new(1280, 720)), (40, 23));
        assert_eq!(
            config.workgroup_count(Extent2D::new(1280, 720)),
            (40, 23, 1)
        );
    }

    #[test]
    fn test_buffer_sizes_track_viewport() {
        let config = LightCullingConfig::default();
        let extent = Extent2D::new(32, 16);
        assert_eq!(config.light_grid_buffer_size(extent), 2 * 2 * 4);
        assert_eq!(config.light_index_buffer_size(extent), 2 * 128 * 4);
        assert_eq!(config.total_tiles(Extent2D::new(0, 0)), 0);
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<LightCullingUniforms>(), 160);
    }
}
