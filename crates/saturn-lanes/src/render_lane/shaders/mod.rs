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

//! WGSL sources of the frame pipeline, embedded at compile time.
//!
//! Bind group layouts in the lanes mirror the declarations in these files;
//! a change on one side must be made on the other.

/// Depth-only pre-pass. Vertex stage only.
pub const PREDEPTH_WGSL: &str = include_str!("predepth.wgsl");

/// Tiled light culling. One 16×16 workgroup per tile, entry point `cs_main`.
pub const LIGHT_CULLING_WGSL: &str = include_str!("light_culling.wgsl");

/// Shadow caster pass, one cascade per draw. Vertex stage only.
pub const SHADOW_WGSL: &str = include_str!("shadow.wgsl");

/// Lit geometry, the dynamic sky and the selection outline.
///
/// Entry points: `vs_main`/`fs_main`, `vs_sky`/`fs_sky` and
/// `vs_outline`/`fs_outline`.
pub const GEOMETRY_WGSL: &str = include_str!("geometry.wgsl");

/// Ground grid on the XZ plane, entry points `vs_grid`/`fs_grid`.
pub const GRID_WGSL: &str = include_str!("grid.wgsl");

/// Bloom prefilter, downsample and upsample, all drawn as fullscreen triangles.
pub const BLOOM_WGSL: &str = include_str!("bloom.wgsl");

/// Exposure, bloom resolve and ACES tone mapping.
pub const COMPOSITE_WGSL: &str = include_str!("composite.wgsl");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_only_shaders_valid() {
        for source in [PREDEPTH_WGSL, SHADOW_WGSL] {
            assert!(source.contains("@vertex"));
            assert!(!source.contains("@fragment"));
        }
    }

    #[test]
    fn test_light_culling_shader_valid() {
        assert!(LIGHT_CULLING_WGSL.contains("@compute"));
        assert!(LIGHT_CULLING_WGSL.contains("fn cs_main"));
    }

    #[test]
    fn test_geometry_shader_entry_points() {
        for entry in ["vs_main", "fs_main", "vs_sky", "fs_sky", "vs_outline", "fs_outline"] {
            assert!(GEOMETRY_WGSL.contains(&format!("fn {entry}(")), "missing {entry}");
        }
    }

    #[test]
    fn test_grid_shader_entry_points() {
        assert!(GRID_WGSL.contains("fn vs_grid("));
        assert!(GRID_WGSL.contains("fn fs_grid("));
        assert!(GRID_WGSL.contains("@group(1) @binding(0)"));
    }

    #[test]
    fn test_fullscreen_shaders_valid() {
        for source in [BLOOM_WGSL, COMPOSITE_WGSL] {
            assert!(source.contains("fn vs_fullscreen("));
            assert!(source.contains("@fragment"));
        }
        for entry in ["fs_prefilter", "fs_downsample", "fs_upsample"] {
            assert!(BLOOM_WGSL.contains(&format!("fn {entry}(")), "missing {entry}");
        }
    }
}
