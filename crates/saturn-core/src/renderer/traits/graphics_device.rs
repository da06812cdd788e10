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

//! The device-level contract of the graphics wrapper.

use crate::renderer::api::*;
use crate::renderer::error::{RenderError, ResourceError};
use crate::renderer::traits::CommandEncoder;
use std::fmt::Debug;

/// A logical GPU device: creates and destroys resources, uploads data and
/// submits recorded command buffers.
///
/// The renderer only ever talks to the GPU through this trait. Every method
/// takes `&self`; implementations synchronize internally.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    /// Creates a shader module from the provided descriptor.
    /// ## Arguments
    /// * `descriptor` - The shader source and label.
    /// ## Errors
    /// * `ResourceError` - If the shader fails to compile.
    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleId, ResourceError>;

    /// Destroys the shader module associated with the given ID.
    fn destroy_shader_module(&self, id: ShaderModuleId) -> Result<(), ResourceError>;

    /// Creates a pipeline layout from the provided descriptor.
    /// ## Errors
    /// * `ResourceError` - If the pipeline layout creation fails.
    fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayoutId, ResourceError>;

    /// Destroys the pipeline layout associated with the given ID.
    fn destroy_pipeline_layout(&self, id: PipelineLayoutId) -> Result<(), ResourceError>;

    /// Creates a render pipeline from the provided descriptor.
    /// ## Errors
    /// * `ResourceError` - If the render pipeline creation fails.
    fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<RenderPipelineId, ResourceError>;

    /// Destroys the render pipeline associated with the given ID.
    fn destroy_render_pipeline(&self, id: RenderPipelineId) -> Result<(), ResourceError>;

    /// Creates a compute pipeline from the provided descriptor.
    /// ## Errors
    /// * `ResourceError` - If the compute pipeline creation fails.
    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<ComputePipelineId, ResourceError>;

    /// Destroys the compute pipeline associated with the given ID.
    fn destroy_compute_pipeline(&self, id: ComputePipelineId) -> Result<(), ResourceError>;

    /// Creates a bind group layout.
    fn create_bind_group_layout(
        &self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Result<BindGroupLayoutId, ResourceError>;

    /// Destroys a bind group layout.
    fn destroy_bind_group_layout(&self, id: BindGroupLayoutId) -> Result<(), ResourceError>;

    /// Creates a bind group.
    fn create_bind_group(
        &self,
        descriptor: &BindGroupDescriptor,
    ) -> Result<BindGroupId, ResourceError>;

    /// Destroys a bind group.
    fn destroy_bind_group(&self, id: BindGroupId) -> Result<(), ResourceError>;

    /// Creates a new GPU buffer.
    /// ## Arguments
    /// * `descriptor` - The size, usage and label of the buffer.
    /// ## Errors
    /// * `ResourceError::OutOfMemory` - If the device cannot back the allocation.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Creates a new GPU buffer and initializes it with `data`.
    /// This is the preferred way to create static buffers.
    fn create_buffer_with_data(
        &self,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> Result<BufferId, ResourceError>;

    /// Destroys the buffer associated with the given ID.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Queues a write of `data` into the buffer at `offset`.
    ///
    /// The write becomes visible to command buffers submitted afterwards.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the write exceeds the buffer size.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Creates a new texture.
    /// ## Errors
    /// * `ResourceError::OutOfMemory` - If the device cannot back the allocation.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError>;

    /// Destroys the texture associated with the given ID.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Creates a view into an existing texture.
    fn create_texture_view(
        &self,
        texture_id: TextureId,
        descriptor: &TextureViewDescriptor,
    ) -> Result<TextureViewId, ResourceError>;

    /// Destroys the texture view associated with the given ID.
    fn destroy_texture_view(&self, id: TextureViewId) -> Result<(), ResourceError>;

    /// Creates a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError>;

    /// Destroys the sampler associated with the given ID.
    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError>;

    /// Creates a new command encoder.
    fn create_command_encoder(&self, label: Option<&str>) -> Box<dyn CommandEncoder>;

    /// Submits a finished command buffer to the queue.
    /// ## Returns
    /// The index of this submission, which can later be waited on.
    fn submit_command_buffer(&self, command_buffer: CommandBufferId) -> SubmissionIndex;

    /// Blocks until every submission up to and including `index` has completed on the GPU.
    /// ## Errors
    /// * `RenderError::DeviceLost` - If the device was lost while waiting.
    fn wait_for_submission(&self, index: SubmissionIndex) -> Result<(), RenderError>;

    /// Returns `true` if the submission `index` has completed, without blocking.
    fn is_submission_complete(&self, index: SubmissionIndex) -> bool;
}
