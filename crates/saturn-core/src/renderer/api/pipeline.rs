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

//! Defines the data structures used to configure render and compute pipelines.

use crate::renderer::api::{BindGroupLayoutId, ShaderModuleId, TextureFormat};
use std::borrow::Cow;

/// An opaque handle to a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineId(pub usize);

/// An opaque handle to a compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineId(pub usize);

/// An opaque handle to a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineLayoutId(pub usize);

/// The memory format of a single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// Two 32-bit float components.
    Float32x2,
    /// Three 32-bit float components.
    Float32x3,
    /// Four 32-bit float components.
    Float32x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub const fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Defines how often the GPU advances to the next element in a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexStepMode {
    /// The GPU advances to the next element for each vertex.
    Vertex,
    /// The GPU advances to the next element only for each new instance.
    Instance,
}

/// A single attribute inside a vertex buffer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Attribute format.
    pub format: VertexFormat,
    /// Byte offset inside the element.
    pub offset: u64,
    /// `@location` in the shader.
    pub shader_location: u32,
}

/// The layout of one vertex buffer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout<'a> {
    /// Stride between two consecutive elements.
    pub array_stride: u64,
    /// Per-vertex or per-instance stepping.
    pub step_mode: VertexStepMode,
    /// Attributes of the element.
    pub attributes: Cow<'a, [VertexAttribute]>,
}

/// Defines how vertices are connected to form a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Every two vertices form a line.
    LineList,
}

/// Defines which face of a triangle to cull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling is performed.
    None,
    /// Cull front-facing triangles.
    Front,
    /// Cull back-facing triangles.
    #[default]
    Back,
}

/// The comparison function used for depth testing and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    /// The test never passes.
    Never,
    /// The test passes if the new value is less than the existing value.
    Less,
    /// The test passes if the new value is equal to the existing value.
    Equal,
    /// The test passes if the new value is less than or equal to the existing value.
    LessEqual,
    /// The test passes if the new value is greater than the existing value.
    Greater,
    /// The test always passes.
    #[default]
    Always,
}

/// How a fragment's output is combined with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// The fragment overwrites the target.
    #[default]
    Replace,
    /// Classic `src * a + dst * (1 - a)` blending.
    AlphaBlending,
    /// `src + dst`, used for bloom accumulation.
    Additive,
}

/// A colour attachment of a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetState {
    /// Target format.
    pub format: TextureFormat,
    /// Blend mode.
    pub blend: BlendMode,
}

/// Depth bias applied during rasterization, used by shadow casters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBiasState {
    /// Constant bias.
    pub constant: i32,
    /// Slope-scaled bias.
    pub slope_scale: f32,
}

/// The depth state of a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilState {
    /// Depth attachment format.
    pub format: TextureFormat,
    /// Whether depth writes are enabled.
    pub depth_write_enabled: bool,
    /// Depth comparison function.
    pub depth_compare: CompareFunction,
    /// Rasterization depth bias.
    pub bias: DepthBiasState,
}

/// Primitive assembly and rasterization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveState {
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Face culling.
    pub cull_mode: CullMode,
}

/// A descriptor used to create a [`PipelineLayoutId`].
#[derive(Debug, Clone)]
pub struct PipelineLayoutDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<&'a str>,
    /// Bind group layouts, indexed by group number.
    pub bind_group_layouts: &'a [BindGroupLayoutId],
}

/// A descriptor used to create a [`RenderPipelineId`].
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The pipeline layout.
    pub layout: Option<PipelineLayoutId>,
    /// Shader module holding the vertex entry point.
    pub vertex_shader_module: ShaderModuleId,
    /// Vertex entry point name.
    pub vertex_entry_point: &'a str,
    /// Shader module holding the fragment entry point, if any.
    pub fragment_shader_module: Option<ShaderModuleId>,
    /// Fragment entry point name, if any.
    pub fragment_entry_point: Option<&'a str>,
    /// Vertex buffer slots, indexed by slot number.
    pub vertex_buffers: Cow<'a, [VertexBufferLayout<'a>]>,
    /// Colour targets.
    pub color_targets: Cow<'a, [ColorTargetState]>,
    /// Depth state, if the pipeline uses a depth attachment.
    pub depth_stencil: Option<DepthStencilState>,
    /// Primitive state.
    pub primitive: PrimitiveState,
}

/// A descriptor used to create a [`ComputePipelineId`].
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The pipeline layout.
    pub layout: Option<PipelineLayoutId>,
    /// Shader module holding the entry point.
    pub shader_module: ShaderModuleId,
    /// Entry point name.
    pub entry_point: &'a str,
}
