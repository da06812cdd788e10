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

//! Scene-facing handles and the GPU asset registry the renderer reads from.
//!
//! The scene layer owns entities and assets; the renderer only sees plain
//! handle values and the GPU buffers that the asset layer registered for them.

use crate::renderer::api::{
    BindGroupId, BufferId, IndexFormat, VertexAttribute, VertexBufferLayout, VertexFormat,
    VertexStepMode,
};
use std::borrow::Cow;
use std::collections::HashMap;

/// Identity of the scene entity a draw was submitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// Identity of a mesh asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);

/// Identity of a material registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle(pub u64);

/// A contiguous index range of a mesh drawn with a single material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submesh {
    /// First index of the range.
    pub base_index: u32,
    /// Number of indices in the range.
    pub index_count: u32,
    /// Value added to each index before fetching the vertex.
    pub base_vertex: i32,
}

/// A mesh resident on the GPU.
#[derive(Debug, Clone)]
pub struct GpuMesh {
    /// Interleaved [`MeshVertex`] data.
    pub vertex_buffer: BufferId,
    /// Index data.
    pub index_buffer: BufferId,
    /// Format of the index data.
    pub index_format: IndexFormat,
    /// Submesh ranges. A `DrawCommand`'s submesh index points in here.
    pub submeshes: Vec<Submesh>,
}

/// A material resident on the GPU: the bind group holding its uniforms and textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMaterial {
    /// Bound at the material group of the geometry pipeline.
    pub bind_group: BindGroupId,
}

/// Layout of one mesh vertex: position, normal, texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Texture coordinates.
    pub uv: [f32; 2],
}

static MESH_VERTEX_ATTRIBUTES: [VertexAttribute; 3] = [
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 0,
        shader_location: 0,
    },
    VertexAttribute {
        format: VertexFormat::Float32x3,
        offset: 12,
        shader_location: 1,
    },
    VertexAttribute {
        format: VertexFormat::Float32x2,
        offset: 24,
        shader_location: 2,
    },
];

impl MeshVertex {
    /// The per-vertex buffer layout, bound at slot 0.
    pub fn layout() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: Cow::Borrowed(&MESH_VERTEX_ATTRIBUTES[..]),
        }
    }
}

/// GPU meshes and materials registered by the asset layer.
///
/// Shared with the renderer as `Arc<RwLock<RenderAssets>>`. Handles that do
/// not resolve are not an error for the renderer: missing materials fall back
/// to the default material and missing meshes are skipped.
#[derive(Debug, Default)]
pub struct RenderAssets {
    meshes: HashMap<MeshHandle, GpuMesh>,
    materials: HashMap<MaterialHandle, GpuMaterial>,
}

impl RenderAssets {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a GPU mesh.
    pub fn insert_mesh(&mut self, handle: MeshHandle, mesh: GpuMesh) {
        self.meshes.insert(handle, mesh);
    }

    /// Registers (or replaces) a GPU material.
    pub fn insert_material(&mut self, handle: MaterialHandle, material: GpuMaterial) {
        self.materials.insert(handle, material);
    }

    /// Removes a mesh, returning it so the caller can release its buffers.
    pub fn remove_mesh(&mut self, handle: MeshHandle) -> Option<GpuMesh> {
        self.meshes.remove(&handle)
    }

    /// Removes a material.
    pub fn remove_material(&mut self, handle: MaterialHandle) -> Option<GpuMaterial> {
        self.materials.remove(&handle)
    }

    /// Looks up a mesh.
    pub fn mesh(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(&handle)
    }

    /// Looks up a material.
    pub fn material(&self, handle: MaterialHandle) -> Option<&GpuMaterial> {
        self.materials.get(&handle)
    }

    /// Resolves a submesh of a mesh.
    pub fn submesh(&self, handle: MeshHandle, index: u32) -> Option<(&GpuMesh, Submesh)> {
        let mesh = self.meshes.get(&handle)?;
        let submesh = *mesh.submeshes.get(index as usize)?;
        Some((mesh, submesh))
    }
}
