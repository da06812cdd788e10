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

//! Rendering lanes - the passes of the frame pipeline.
//!
//! Each pass implements [`RenderPassLane`], which extends the core
//! [`Lane`] trait with the list of frame resources the pass touches and a hook
//! that runs whenever those resources are rebuilt. The sequencer in
//! `saturn-agents` uses the access lists to place barriers; the lanes only
//! record their own commands.

use saturn_core::lane::{Lane, LaneContext, LaneError};
use saturn_core::renderer::api::{
    BindGroupDescriptor, BindGroupId, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindGroupLayoutId, BlendMode, BufferDescriptor, BufferId, BufferUsage, ColorTargetState,
    ComputePipelineDescriptor, ComputePipelineId, CullMode, PipelineLayoutDescriptor,
    PipelineLayoutId, PrimitiveState, PrimitiveTopology, RenderAssets, RenderPipelineDescriptor,
    RenderPipelineId, ResourceState, SamplerDescriptor, SamplerId, ShaderModuleDescriptor,
    ShaderModuleId, ShaderSourceData, TextureFormat,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{GraphicsDevice, RenderPass};
use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

mod batching;
mod bloom_lane;
mod cascades;
mod composite_lane;
mod geometry_lane;
mod light_buffer;
mod light_culling_lane;
mod pre_depth_lane;
mod shadow_cascade_lane;
pub mod shaders;
mod sky;
mod tile_binning;

pub use batching::*;
pub use bloom_lane::*;
pub use cascades::*;
pub use composite_lane::*;
pub use geometry_lane::*;
pub use light_buffer::*;
pub use light_culling_lane::*;
pub use pre_depth_lane::*;
pub use shadow_cascade_lane::*;
pub use sky::*;
pub use tile_binning::*;

/// Format of the pre-depth buffer.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Format of every shadow cascade layer.
pub const SHADOW_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Logical resources shared between passes within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameResource {
    /// The pre-depth buffer.
    Depth,
    /// The light grid and light index buffers.
    LightGrid,
    /// Every layer of the cascade atlas.
    ShadowAtlas,
    /// The HDR scene colour target.
    Hdr,
    /// The bloom mip chain.
    Bloom,
    /// The final composite image.
    Composite,
}

impl FrameResource {
    /// Number of frame resources.
    pub const COUNT: usize = 6;

    /// Every frame resource, in declaration order.
    pub const ALL: [FrameResource; Self::COUNT] = [
        FrameResource::Depth,
        FrameResource::LightGrid,
        FrameResource::ShadowAtlas,
        FrameResource::Hdr,
        FrameResource::Bloom,
        FrameResource::Composite,
    ];

    /// Dense index, for per-resource tables.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A resource a pass touches and the state it needs the resource in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAccess {
    /// The resource.
    pub resource: FrameResource,
    /// Required state while the pass runs.
    pub state: ResourceState,
}

impl ResourceAccess {
    /// Shorthand constructor, usable in `const` access tables.
    pub const fn new(resource: FrameResource, state: ResourceState) -> Self {
        Self { resource, state }
    }
}

/// A pass of the fixed frame pipeline.
pub trait RenderPassLane: Lane {
    /// Resources this pass reads or writes, and in which state.
    fn accesses(&self) -> &'static [ResourceAccess];

    /// Called after the renderer rebuilt size-dependent or shadow-setting
    /// dependent resources. The context carries the new target keys.
    ///
    /// Lanes drop every binding that referenced the old resources here.
    fn on_resize(&self, _ctx: &mut LaneContext) -> Result<(), LaneError> {
        Ok(())
    }
}

/// Draw counts recorded by the geometry pass, published into the context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawTally {
    /// Indexed draw calls.
    pub draw_calls: u32,
    /// Instances covered by those calls.
    pub instances: u32,
    /// Triangles submitted.
    pub triangles: u64,
    /// Batches whose mesh did not resolve.
    pub skipped: u32,
}

impl DrawTally {
    fn absorb(&mut self, other: DrawTally) {
        self.draw_calls += other.draw_calls;
        self.instances += other.instances;
        self.triangles += other.triangles;
        self.skipped += other.skipped;
    }
}

/// Records one indexed, instanced draw per batch.
///
/// Slot 0 receives the mesh vertices and slot 1 the instance transforms, so
/// `first_instance` addresses the batch's rows directly. `before_draw` binds
/// whatever per-batch state the calling pass needs.
pub(crate) fn draw_batches<'p>(
    pass: &mut (dyn RenderPass<'p> + 'p),
    batches: &[InstancedDraw],
    assets: &RenderAssets,
    transforms: BufferId,
    mut before_draw: impl FnMut(&mut (dyn RenderPass<'p> + 'p), &InstancedDraw),
) -> DrawTally {
    let mut tally = DrawTally::default();
    for batch in batches {
        let Some((mesh, submesh)) = assets.submesh(batch.key.mesh, batch.key.submesh) else {
            tally.skipped += 1;
            continue;
        };
        before_draw(&mut *pass, batch);
        pass.set_vertex_buffer(0, mesh.vertex_buffer, 0);
        pass.set_vertex_buffer(1, transforms, 0);
        pass.set_index_buffer(mesh.index_buffer, 0, mesh.index_format);
        let first = submesh.base_index;
        pass.draw_indexed(
            first..first + submesh.index_count,
            submesh.base_vertex,
            batch.instances(),
        );
        tally.draw_calls += 1;
        tally.instances += batch.instance_count;
        tally.triangles += (submesh.index_count / 3) as u64 * batch.instance_count as u64;
    }
    tally
}

/// A bind group built from resources that change rarely, rebuilt when they do.
#[derive(Debug)]
pub(crate) struct CachedBindGroup<K> {
    entry: Option<(K, BindGroupId)>,
}

impl<K: PartialEq + Copy> CachedBindGroup<K> {
    pub(crate) const fn new() -> Self {
        Self { entry: None }
    }

    /// Returns the cached bind group if it was built from `key`, otherwise
    /// replaces it with the one `create` builds.
    pub(crate) fn get_or_create(
        &mut self,
        device: &dyn GraphicsDevice,
        key: K,
        create: impl FnOnce(&dyn GraphicsDevice) -> Result<BindGroupId, ResourceError>,
    ) -> Result<BindGroupId, ResourceError> {
        if let Some((cached, id)) = &self.entry {
            if *cached == key {
                return Ok(*id);
            }
        }
        self.invalidate(device);
        let id = create(device)?;
        self.entry = Some((key, id));
        Ok(id)
    }

    pub(crate) fn invalidate(&mut self, device: &dyn GraphicsDevice) {
        if let Some((_, id)) = self.entry.take() {
            if let Err(e) = device.destroy_bind_group(id) {
                log::warn!("Failed to destroy cached bind group {:?}: {:?}", id, e);
            }
        }
    }
}

/// Locks lane state, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clones a context key, or reports it missing.
pub(crate) fn required<T: Clone + 'static>(
    ctx: &LaneContext,
    name: &'static str,
) -> Result<T, LaneError> {
    ctx.get::<T>().cloned().ok_or(LaneError::missing(name))
}

/// The graphics device every lane records against.
pub(crate) fn device(ctx: &LaneContext) -> Result<Arc<dyn GraphicsDevice>, LaneError> {
    required::<Arc<dyn GraphicsDevice>>(ctx, "Arc<dyn GraphicsDevice>")
}

/// Read-locks shared render assets.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// LaneResources
// ─────────────────────────────────────────────────────────────────────────────

/// Records every long-lived GPU object a lane creates, so that a failed
/// initialization and `on_shutdown` release exactly what exists.
#[derive(Debug, Default)]
pub(crate) struct LaneResources {
    shader_modules: Vec<ShaderModuleId>,
    bind_group_layouts: Vec<BindGroupLayoutId>,
    pipeline_layouts: Vec<PipelineLayoutId>,
    render_pipelines: Vec<RenderPipelineId>,
    compute_pipelines: Vec<ComputePipelineId>,
    bind_groups: Vec<BindGroupId>,
    buffers: Vec<BufferId>,
    samplers: Vec<SamplerId>,
}

impl LaneResources {
    pub(crate) fn shader(
        &mut self,
        device: &dyn GraphicsDevice,
        label: &str,
        source: &'static str,
    ) -> Result<ShaderModuleId, ResourceError> {
        let id = device.create_shader_module(&ShaderModuleDescriptor {
            label: Some(label),
            source: ShaderSourceData::Wgsl(Cow::Borrowed(source)),
        })?;
        self.shader_modules.push(id);
        Ok(id)
    }

    pub(crate) fn bind_group_layout(
        &mut self,
        device: &dyn GraphicsDevice,
        label: &str,
        entries: &[BindGroupLayoutEntry],
    ) -> Result<BindGroupLayoutId, ResourceError> {
        let id = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        })?;
        self.bind_group_layouts.push(id);
        Ok(id)
    }

    pub(crate) fn pipeline_layout(
        &mut self,
        device: &dyn GraphicsDevice,
        label: &str,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Result<PipelineLayoutId, ResourceError> {
        let id = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts,
        })?;
        self.pipeline_layouts.push(id);
        Ok(id)
    }

    pub(crate) fn render_pipeline(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<RenderPipelineId, ResourceError> {
        let id = device.create_render_pipeline(descriptor)?;
        self.render_pipelines.push(id);
        Ok(id)
    }

    pub(crate) fn compute_pipeline(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<ComputePipelineId, ResourceError> {
        let id = device.create_compute_pipeline(descriptor)?;
        self.compute_pipelines.push(id);
        Ok(id)
    }

    pub(crate) fn bind_group(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &BindGroupDescriptor,
    ) -> Result<BindGroupId, ResourceError> {
        let id = device.create_bind_group(descriptor)?;
        self.bind_groups.push(id);
        Ok(id)
    }

    pub(crate) fn uniform_buffer(
        &mut self,
        device: &dyn GraphicsDevice,
        label: &str,
        data: &[u8],
    ) -> Result<BufferId, ResourceError> {
        let id = device.create_buffer_with_data(
            &BufferDescriptor {
                label: Some(Cow::Borrowed(label)),
                size: data.len() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            },
            data,
        )?;
        self.buffers.push(id);
        Ok(id)
    }

    pub(crate) fn sampler(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerId, ResourceError> {
        let id = device.create_sampler(descriptor)?;
        self.samplers.push(id);
        Ok(id)
    }

    /// A pipeline drawing one fullscreen triangle from `vs_fullscreen`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fullscreen_pipeline(
        &mut self,
        device: &dyn GraphicsDevice,
        label: &str,
        layout: PipelineLayoutId,
        shader: ShaderModuleId,
        fragment_entry: &str,
        format: TextureFormat,
        blend: BlendMode,
    ) -> Result<RenderPipelineId, ResourceError> {
        self.render_pipeline(
            device,
            &RenderPipelineDescriptor {
                label: Some(Cow::Borrowed(label)),
                layout: Some(layout),
                vertex_shader_module: shader,
                vertex_entry_point: "vs_fullscreen",
                fragment_shader_module: Some(shader),
                fragment_entry_point: Some(fragment_entry),
                vertex_buffers: Cow::Borrowed(&[]),
                color_targets: Cow::Owned(vec![ColorTargetState { format, blend }]),
                depth_stencil: None,
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    cull_mode: CullMode::None,
                },
            },
        )
    }

    /// Destroys everything, dependents first.
    pub(crate) fn release(&mut self, device: &dyn GraphicsDevice, owner: &str) {
        fn destroy_all<T: Copy + std::fmt::Debug>(
            ids: &mut Vec<T>,
            owner: &str,
            destroy: impl Fn(T) -> Result<(), ResourceError>,
        ) {
            for id in ids.drain(..).rev() {
                if let Err(e) = destroy(id) {
                    log::warn!("{owner}: Failed to destroy {:?}: {:?}", id, e);
                }
            }
        }

        destroy_all(&mut self.bind_groups, owner, |id| device.destroy_bind_group(id));
        destroy_all(&mut self.render_pipelines, owner, |id| {
            device.destroy_render_pipeline(id)
        });
        destroy_all(&mut self.compute_pipelines, owner, |id| {
            device.destroy_compute_pipeline(id)
        });
        destroy_all(&mut self.pipeline_layouts, owner, |id| {
            device.destroy_pipeline_layout(id)
        });
        destroy_all(&mut self.bind_group_layouts, owner, |id| {
            device.destroy_bind_group_layout(id)
        });
        destroy_all(&mut self.shader_modules, owner, |id| {
            device.destroy_shader_module(id)
        });
        destroy_all(&mut self.buffers, owner, |id| device.destroy_buffer(id));
        destroy_all(&mut self.samplers, owner, |id| device.destroy_sampler(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_resource_indices_are_dense() {
        for (i, resource) in FrameResource::ALL.iter().enumerate() {
            assert_eq!(resource.index(), i);
        }
    }
}
