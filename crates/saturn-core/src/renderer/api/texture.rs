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

//! Defines data structures for textures, texture views and samplers.

use crate::math::Extent3D;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An opaque handle to a GPU texture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);

/// An opaque handle to a view into a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewId(pub usize);

/// An opaque handle to a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerId(pub usize);

/// The memory layout and data type of a texture's texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// Four 8-bit unsigned normalized components (RGBA).
    Rgba8Unorm,
    /// Four 8-bit unsigned normalized components (RGBA) in the sRGB color space.
    Rgba8UnormSrgb,
    /// Four 8-bit unsigned normalized components (BGRA) in the sRGB color space.
    Bgra8UnormSrgb,
    /// Packed unsigned float RGB, 11/11/10 bits.
    Rg11b10Ufloat,
    /// Four 16-bit float components.
    Rgba16Float,
    /// Four 32-bit float components.
    Rgba32Float,
    /// A 32-bit float depth format.
    Depth32Float,
}

impl TextureFormat {
    /// Returns `true` for depth formats.
    pub const fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    /// Returns the size in bytes of a single texel.
    pub const fn bytes_per_texel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg11b10Ufloat
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Describes how a texture may be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// The texture can be the source of a copy.
        const COPY_SRC = 1 << 0;
        /// The texture can be the destination of a copy.
        const COPY_DST = 1 << 1;
        /// The texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// The texture can be bound as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// The texture can be a color or depth attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// The dimensionality of a texture view as seen by a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureViewDimension {
    /// A 2D view.
    #[default]
    D2,
    /// A view over several layers of a 2D array texture.
    D2Array,
    /// A cube map view.
    Cube,
}

/// A descriptor used to create a [`TextureId`].
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Size of the texture. `depth_or_array_layers` is the layer count for arrays.
    pub size: Extent3D,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// Number of samples per texel.
    pub sample_count: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Allowed usages.
    pub usage: TextureUsage,
}

/// A descriptor used to create a [`TextureViewId`].
#[derive(Debug, Clone, Default)]
pub struct TextureViewDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Overrides the texture's format when set.
    pub format: Option<TextureFormat>,
    /// Overrides the inferred view dimension when set.
    pub dimension: Option<TextureViewDimension>,
    /// First visible mip level.
    pub base_mip_level: u32,
    /// Number of visible mip levels, or all remaining levels if `None`.
    pub mip_level_count: Option<u32>,
    /// First visible array layer.
    pub base_array_layer: u32,
    /// Number of visible array layers, or all remaining layers if `None`.
    pub array_layer_count: Option<u32>,
}

/// How texture coordinates outside `[0, 1]` are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Coordinates are clamped to the edge texel.
    #[default]
    ClampToEdge,
    /// Coordinates wrap around.
    Repeat,
}

/// Texel filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-neighbour filtering.
    #[default]
    Nearest,
    /// Linear filtering.
    Linear,
}

/// A descriptor used to create a [`SamplerId`].
#[derive(Debug, Clone, Default)]
pub struct SamplerDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Address mode for all three axes.
    pub address_mode: AddressMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Comparison function, which turns this into a comparison sampler.
    pub compare: Option<crate::renderer::api::CompareFunction>,
}
