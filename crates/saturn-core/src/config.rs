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

//! Renderer configuration.
//!
//! Every field has a sensible default, so a configuration document only needs
//! to name what it changes:
//!
//! ```
//! use saturn_core::RendererConfig;
//!
//! let config = RendererConfig::from_ron_str("(shadows: (cascade_count: 2), exposure: 1.2)").unwrap();
//! assert_eq!(config.shadows.cascade_count, 2);
//! assert_eq!(config.shadows.resolution, 2048);
//! ```

use crate::math::LinearRgba;
use crate::renderer::{LightCullingConfig, TextureFormat, DEFAULT_EXPOSURE};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on the number of shadow cascades.
pub const MAX_SHADOW_CASCADES: u32 = 4;

/// Cascaded shadow map settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Whether the shadow cascade passes run at all.
    pub enabled: bool,
    /// Number of cascades, `1..=MAX_SHADOW_CASCADES`.
    pub cascade_count: u32,
    /// Blend between linear (`0`) and logarithmic (`1`) cascade splits.
    pub split_lambda: f32,
    /// Light-space near plane pull-back, in world units (negative moves toward the light).
    pub near_offset: f32,
    /// Offset applied to the camera far plane for the last cascade.
    pub far_offset: f32,
    /// Width and height of each cascade layer, in texels.
    pub resolution: u32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cascade_count: MAX_SHADOW_CASCADES,
            split_lambda: 0.92,
            near_offset: -50.0,
            far_offset: 50.0,
            resolution: 2048,
        }
    }
}

impl ShadowSettings {
    /// Returns `true` if switching from `self` to `other` requires a new atlas.
    pub fn atlas_differs(&self, other: &ShadowSettings) -> bool {
        self.enabled != other.enabled
            || self.cascade_count != other.cascade_count
            || self.resolution != other.resolution
    }
}

/// Bloom settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    /// Whether the bloom pass contributes to the composite.
    pub enabled: bool,
    /// Luminance above which pixels start to bloom.
    pub threshold: f32,
    /// Width of the soft knee around `threshold`.
    pub knee: f32,
    /// Weight of the bloom term in the composite.
    pub intensity: f32,
    /// Number of mips in the downsample chain.
    pub mip_count: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            knee: 0.1,
            intensity: 0.04,
            mip_count: 6,
        }
    }
}

/// Ground grid drawn under the scene in the geometry pass.
///
/// The grid is a square on the XZ plane centred on the origin, ruled into
/// cells by anti-aliased lines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Whether the grid is drawn.
    pub enabled: bool,
    /// Half the side of the grid square, in world units.
    pub half_extent: f32,
    /// Line width as a fraction of one cell.
    pub line_width: f32,
    /// Number of cells along one side.
    pub cell_count: f32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            half_extent: 16.0,
            line_width: 0.025,
            cell_count: 16.025,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Shadow cascade settings.
    pub shadows: ShadowSettings,
    /// Tiled light culling settings.
    pub light_culling: LightCullingConfig,
    /// Bloom settings.
    pub bloom: BloomSettings,
    /// Ground grid settings.
    pub grid: GridSettings,
    /// Default exposure, used until the camera supplies its own.
    pub exposure: f32,
    /// Format of the HDR scene target.
    pub hdr_format: TextureFormat,
    /// Format of the composite target.
    pub output_format: TextureFormat,
    /// Clear colour of the HDR target, used where no sky is drawn.
    pub clear_color: LinearRgba,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shadows: ShadowSettings::default(),
            light_culling: LightCullingConfig::default(),
            bloom: BloomSettings::default(),
            grid: GridSettings::default(),
            exposure: DEFAULT_EXPOSURE,
            hdr_format: TextureFormat::Rgba16Float,
            output_format: TextureFormat::Rgba8UnormSrgb,
            clear_color: LinearRgba::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl RendererConfig {
    /// Parses and validates a configuration from a RON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or a value is out of range.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let config: RendererConfig =
            ron::from_str(source).context("Failed to parse renderer configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let shadows = &self.shadows;
        if shadows.cascade_count == 0 || shadows.cascade_count > MAX_SHADOW_CASCADES {
            bail!(
                "shadows.cascade_count must be in 1..={MAX_SHADOW_CASCADES}, got {}",
                shadows.cascade_count
            );
        }
        if shadows.resolution == 0 {
            bail!("shadows.resolution must be non-zero");
        }
        if !shadows.split_lambda.is_finite() {
            bail!("shadows.split_lambda must be finite");
        }
        if self.light_culling.max_lights_per_tile == 0 {
            bail!("light_culling.max_lights_per_tile must be non-zero");
        }
        if self.bloom.mip_count == 0 {
            bail!("bloom.mip_count must be non-zero");
        }
        let grid = &self.grid;
        if !(grid.half_extent.is_finite() && grid.half_extent > 0.0) {
            bail!("grid.half_extent must be positive, got {}", grid.half_extent);
        }
        if !(grid.line_width > 0.0 && grid.line_width < 1.0) {
            bail!("grid.line_width must be in (0, 1), got {}", grid.line_width);
        }
        if !(grid.cell_count.is_finite() && grid.cell_count > 0.0) {
            bail!("grid.cell_count must be positive, got {}", grid.cell_count);
        }
        if self.hdr_format.is_depth() || self.output_format.is_depth() {
            bail!("hdr_format and output_format must be colour formats");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::TileSize;

    #[test]
    fn test_defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shadows.cascade_count, 4);
        assert_eq!(config.shadows.split_lambda, 0.92);
        assert_eq!(config.light_culling.max_lights_per_tile, 128);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = RendererConfig::from_ron_str(
            "(light_culling: (tile_size: X32), bloom: (enabled: false))",
        )
        .unwrap();
        assert_eq!(config.light_culling.tile_size, TileSize::X32);
        assert_eq!(config.light_culling.max_lights_per_tile, 128);
        assert!(!config.bloom.enabled);
        assert_eq!(config.bloom.mip_count, 6);
    }

    #[test]
    fn test_grid_is_opt_in() {
        assert!(!RendererConfig::default().grid.enabled);
        let config = RendererConfig::from_ron_str("(grid: (enabled: true))").unwrap();
        assert!(config.grid.enabled);
        assert_eq!(config.grid.half_extent, 16.0);
        assert_eq!(config.grid.line_width, 0.025);

        let err = RendererConfig::from_ron_str("(grid: (line_width: 1.5))").unwrap_err();
        assert!(format!("{err:#}").contains("grid.line_width"));
    }

    #[test]
    fn test_rejects_too_many_cascades() {
        let err = RendererConfig::from_ron_str("(shadows: (cascade_count: 8))").unwrap_err();
        assert!(err.to_string().contains("cascade_count"));
    }

    #[test]
    fn test_rejects_malformed_document() {
        assert!(RendererConfig::from_ron_str("(shadows: ").is_err());
    }

    #[test]
    fn test_atlas_differs_ignores_split_tuning() {
        let base = ShadowSettings::default();
        let tuned = ShadowSettings {
            split_lambda: 0.5,
            far_offset: 10.0,
            ..base
        };
        let bigger = ShadowSettings {
            resolution: 4096,
            ..base
        };
        assert!(!base.atlas_differs(&tuned));
        assert!(base.atlas_differs(&bigger));
    }
}
