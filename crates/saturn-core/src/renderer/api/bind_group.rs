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

//! Defines data structures for bind groups and bind group layouts.
//!
//! Bind groups are how buffers, textures and samplers are made visible to
//! shaders. They abstract over descriptor sets (Vulkan) and bind groups
//! (WebGPU).

use crate::renderer::api::{BufferId, SamplerId, TextureViewDimension, TextureViewId};
use bitflags::bitflags;
use std::num::NonZeroU64;

/// An opaque handle to a bind group layout resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutId(pub usize);

/// An opaque handle to a bind group resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupId(pub usize);

bitflags! {
    /// The shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        /// The vertex stage.
        const VERTEX = 1 << 0;
        /// The fragment stage.
        const FRAGMENT = 1 << 1;
        /// The compute stage.
        const COMPUTE = 1 << 2;
    }
}

/// Describes the type of buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBindingType {
    /// A uniform buffer.
    Uniform,
    /// A storage buffer.
    Storage {
        /// Whether the buffer is read-only in the shader.
        read_only: bool,
    },
}

/// The type of texture sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    /// A floating-point texture sample.
    Float {
        /// Whether the texture can be filtered.
        filterable: bool,
    },
    /// A depth texture sample.
    Depth,
}

/// The type of sampler binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerBindingType {
    /// A filtering sampler.
    Filtering,
    /// A comparison sampler, used for shadow lookups.
    Comparison,
}

/// The kind of resource a layout slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    /// A buffer binding.
    Buffer {
        /// Uniform or storage.
        ty: BufferBindingType,
        /// Whether a dynamic offset is supplied at bind time.
        has_dynamic_offset: bool,
        /// Minimum bound size, if known.
        min_binding_size: Option<NonZeroU64>,
    },
    /// A sampled texture binding.
    Texture {
        /// The sample type.
        sample_type: TextureSampleType,
        /// The view dimension.
        view_dimension: TextureViewDimension,
    },
    /// A sampler binding.
    Sampler(SamplerBindingType),
}

/// Describes a single binding entry in a bind group layout.
#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    /// The binding index (e.g., `@binding(0)` in WGSL).
    pub binding: u32,
    /// Which shader stages can access this binding.
    pub visibility: ShaderStageFlags,
    /// The type of resource being bound.
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    /// Helper for a non-dynamic buffer entry.
    pub fn buffer(binding: u32, visibility: ShaderStageFlags, ty: BufferBindingType) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        }
    }

    /// Helper for a filterable 2D float texture entry.
    pub fn texture_2d(binding: u32, visibility: ShaderStageFlags) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
            },
        }
    }

    /// Helper for a sampler entry.
    pub fn sampler(binding: u32, visibility: ShaderStageFlags, ty: SamplerBindingType) -> Self {
        Self {
            binding,
            visibility,
            ty: BindingType::Sampler(ty),
        }
    }
}

/// A descriptor used to create a [`BindGroupLayoutId`].
#[derive(Debug, Clone)]
pub struct BindGroupLayoutDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<&'a str>,
    /// The layout entries.
    pub entries: &'a [BindGroupLayoutEntry],
}

/// A range of a buffer bound to a shader.
#[derive(Debug, Clone, Copy)]
pub struct BufferBinding {
    /// The bound buffer.
    pub buffer: BufferId,
    /// Byte offset into the buffer.
    pub offset: u64,
    /// Bound size, or the rest of the buffer if `None`.
    pub size: Option<NonZeroU64>,
}

impl BufferBinding {
    /// Binds the whole buffer.
    pub fn whole(buffer: BufferId) -> Self {
        Self {
            buffer,
            offset: 0,
            size: None,
        }
    }
}

/// A resource bound in a bind group.
#[derive(Debug, Clone, Copy)]
pub enum BindingResource {
    /// A buffer range.
    Buffer(BufferBinding),
    /// A texture view.
    TextureView(TextureViewId),
    /// A sampler.
    Sampler(SamplerId),
}

/// A single entry of a bind group.
#[derive(Debug, Clone, Copy)]
pub struct BindGroupEntry {
    /// The binding index matching the layout entry.
    pub binding: u32,
    /// The bound resource.
    pub resource: BindingResource,
}

/// A descriptor used to create a [`BindGroupId`].
#[derive(Debug, Clone)]
pub struct BindGroupDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<&'a str>,
    /// The layout this bind group conforms to.
    pub layout: BindGroupLayoutId,
    /// The bound resources.
    pub entries: &'a [BindGroupEntry],
}
