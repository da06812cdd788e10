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

//! Cascaded shadow map rendering.
//!
//! The lane runs once per cascade. The sequencer publishes the cascade to
//! draw as [`CascadeIndex`]; the lane renders the frame's batches into the
//! matching layer of the shadow atlas with that cascade's light
//! view-projection.

use super::{
    device, draw_batches, lock, read, required, FrameCascades, FrameResource, InstanceBatcher,
    InstanceTransform, LaneResources, RenderPassLane, ResourceAccess, SHADOW_FORMAT,
};
use crate::render_lane::shaders::SHADOW_WGSL;
use saturn_core::config::MAX_SHADOW_CASCADES;
use saturn_core::lane::{
    CascadeIndex, FrameSlot, Lane, LaneContext, LaneError, LaneKind, Ref, ShadowLayerViews, Slot,
};
use saturn_core::renderer::api::{
    BindGroupLayoutEntry, BindingType, BufferBindingType, CompareFunction, CullMode,
    DepthBiasState, DepthStencilState, LoadOp, MeshVertex, Operations, PrimitiveState,
    PrimitiveTopology, RenderAssets, RenderPassDepthStencilAttachment, RenderPassDescriptor,
    RenderPipelineDescriptor, RenderPipelineId, ResourceState, ShaderStageFlags, StoreOp,
    UniformRingBuffer,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use std::borrow::Cow;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, RwLock};

const ACCESSES: &[ResourceAccess] = &[ResourceAccess::new(
    FrameResource::ShadowAtlas,
    ResourceState::DepthWrite,
)];

/// Size of one cascade's light view-projection in the uniform ring.
const CASCADE_UNIFORM_SIZE: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64;

/// Depth bias applied while rendering casters, in depth units and slope.
const SHADOW_DEPTH_BIAS: DepthBiasState = DepthBiasState {
    constant: 2,
    slope_scale: 2.0,
};

#[derive(Debug)]
struct ShadowGpu {
    resources: LaneResources,
    pipeline: RenderPipelineId,
    cascade_ring: UniformRingBuffer,
}

/// Renders shadow casters into one cascade of the shadow atlas per run.
#[derive(Debug, Default)]
pub struct ShadowCascadeLane {
    gpu: Mutex<Option<ShadowGpu>>,
}

impl ShadowCascadeLane {
    /// Creates the lane. GPU objects are created in `on_initialize`.
    pub fn new() -> Self {
        Self::default()
    }

    fn create_gpu(
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
    ) -> Result<(RenderPipelineId, UniformRingBuffer), ResourceError> {
        let shader = resources.shader(device, "Shadow Shader", SHADOW_WGSL)?;
        // One light matrix per cascade, selected with a dynamic offset.
        let cascade_layout = resources.bind_group_layout(
            device,
            "Shadow Cascade Layout",
            &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(CASCADE_UNIFORM_SIZE),
                },
            }],
        )?;
        let layout = resources.pipeline_layout(device, "Shadow Layout", &[cascade_layout])?;

        let pipeline = resources.render_pipeline(
            device,
            &RenderPipelineDescriptor {
                label: Some(Cow::Borrowed("Shadow Pipeline")),
                layout: Some(layout),
                vertex_shader_module: shader,
                vertex_entry_point: "vs_main",
                fragment_shader_module: None,
                fragment_entry_point: None,
                vertex_buffers: Cow::Owned(vec![MeshVertex::layout(), InstanceTransform::layout()]),
                color_targets: Cow::Borrowed(&[]),
                depth_stencil: Some(DepthStencilState {
                    format: SHADOW_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: CompareFunction::LessEqual,
                    bias: SHADOW_DEPTH_BIAS,
                }),
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    cull_mode: CullMode::Back,
                },
            },
        )?;

        let cascade_ring = UniformRingBuffer::with_elements(
            device,
            cascade_layout,
            0,
            CASCADE_UNIFORM_SIZE,
            MAX_SHADOW_CASCADES,
            "Shadow Cascades",
        )?;

        Ok((pipeline, cascade_ring))
    }
}

impl Lane for ShadowCascadeLane {
    fn strategy_name(&self) -> &'static str {
        "ShadowCascade"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Shadow
    }

    fn on_initialize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        let mut resources = LaneResources::default();
        match Self::create_gpu(device.as_ref(), &mut resources) {
            Ok((pipeline, cascade_ring)) => {
                *lock(&self.gpu) = Some(ShadowGpu {
                    resources,
                    pipeline,
                    cascade_ring,
                });
                Ok(())
            }
            Err(e) => {
                resources.release(device.as_ref(), self.strategy_name());
                Err(LaneError::initialization(e))
            }
        }
    }

    fn execute(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        let slot = required::<FrameSlot>(ctx, "FrameSlot")?.0;
        let index = required::<CascadeIndex>(ctx, "CascadeIndex")?.0;
        let layer = ctx
            .get::<ShadowLayerViews>()
            .ok_or(LaneError::missing("ShadowLayerViews"))?
            .0
            .get(index as usize)
            .copied()
            .ok_or(LaneError::missing("ShadowLayerViews[cascade]"))?;
        let cascade = ctx
            .get::<FrameCascades>()
            .and_then(|cascades| cascades.0.get(index as usize).copied());
        let assets = required::<Arc<RwLock<RenderAssets>>>(ctx, "Arc<RwLock<RenderAssets>>")?;
        let batcher = ctx
            .get::<Ref<InstanceBatcher>>()
            .ok_or(LaneError::missing("Ref<InstanceBatcher>"))?
            .get();
        let encoder = ctx
            .get::<Slot<dyn CommandEncoder>>()
            .ok_or(LaneError::missing("Slot<dyn CommandEncoder>"))?
            .get();

        let gpu = lock(&self.gpu);
        let gpu = gpu.as_ref().ok_or(LaneError::NotInitialized)?;
        if let Some(cascade) = &cascade {
            let matrix = cascade.view_projection.to_cols_array_2d();
            gpu.cascade_ring
                .write_element(device.as_ref(), slot, index, bytemuck::bytes_of(&matrix))
                .map_err(LaneError::execution)?;
        }

        let assets = read(&assets);
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Shadow Cascade"),
            color_attachments: &[],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: layer,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
            }),
        });

        // A layer without a cascade is only cleared, so it samples as unshadowed.
        let (Some(_), Some(transforms)) = (cascade, batcher.transform_buffer()) else {
            return Ok(());
        };
        pass.set_pipeline(gpu.pipeline);
        pass.set_bind_group(
            0,
            gpu.cascade_ring.bind_group(slot),
            &[gpu.cascade_ring.dynamic_offset(index)],
        );
        let mut casters = 0;
        for batches in [batcher.draws(), batcher.selected_draws()] {
            casters += draw_batches(pass.as_mut(), batches, &assets, transforms, |_, _| {})
                .draw_calls;
        }
        log::trace!("ShadowCascadeLane: cascade {} drew {} batches", index, casters);
        Ok(())
    }

    fn on_shutdown(&self, ctx: &mut LaneContext) {
        let Ok(device) = device(ctx) else {
            return;
        };
        if let Some(mut gpu) = lock(&self.gpu).take() {
            gpu.cascade_ring.destroy(device.as_ref());
            gpu.resources.release(device.as_ref(), self.strategy_name());
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl RenderPassLane for ShadowCascadeLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        ACCESSES
    }
}
