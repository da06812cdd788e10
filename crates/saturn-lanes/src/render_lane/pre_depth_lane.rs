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

//! Depth-only pre-pass.
//!
//! Lays down scene depth before anything is shaded. The light culling pass
//! derives per-tile depth bounds from it and the geometry pass tests against
//! it read-only, so every visible fragment is shaded exactly once.

use super::{
    device, draw_batches, lock, read, required, FrameResource, InstanceBatcher, InstanceTransform,
    LaneResources, RenderPassLane, ResourceAccess, DEPTH_FORMAT,
};
use crate::render_lane::shaders::PREDEPTH_WGSL;
use saturn_core::lane::{
    CameraView, DepthTarget, FrameSlot, Lane, LaneContext, LaneError, LaneKind, Ref, Slot,
    ViewportExtent,
};
use saturn_core::renderer::api::{
    BindGroupLayoutEntry, BufferBindingType, CompareFunction, CullMode, DepthBiasState,
    DepthStencilState, LoadOp, MeshVertex, Operations, PrimitiveState, PrimitiveTopology,
    RenderAssets, RenderPassDepthStencilAttachment, RenderPassDescriptor,
    RenderPipelineDescriptor, RenderPipelineId, ResourceState, ShaderStageFlags, StoreOp,
    UniformRingBuffer,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use saturn_core::renderer::CameraUniformData;
use std::borrow::Cow;
use std::sync::{Arc, Mutex, RwLock};

const ACCESSES: &[ResourceAccess] = &[ResourceAccess::new(
    FrameResource::Depth,
    ResourceState::DepthWrite,
)];

#[derive(Debug)]
struct PreDepthGpu {
    resources: LaneResources,
    pipeline: RenderPipelineId,
    camera_ring: UniformRingBuffer,
}

/// Writes scene depth for the main and the selected draw lists.
#[derive(Debug, Default)]
pub struct PreDepthLane {
    gpu: Mutex<Option<PreDepthGpu>>,
}

impl PreDepthLane {
    /// Creates the lane. GPU objects are created in `on_initialize`.
    pub fn new() -> Self {
        Self::default()
    }

    fn create_gpu(
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
    ) -> Result<(RenderPipelineId, UniformRingBuffer), ResourceError> {
        let shader = resources.shader(device, "Pre-Depth Shader", PREDEPTH_WGSL)?;
        let camera_layout = resources.bind_group_layout(
            device,
            "Pre-Depth Camera Layout",
            &[BindGroupLayoutEntry::buffer(
                0,
                ShaderStageFlags::VERTEX,
                BufferBindingType::Uniform,
            )],
        )?;
        let layout = resources.pipeline_layout(device, "Pre-Depth Layout", &[camera_layout])?;

        let pipeline = resources.render_pipeline(
            device,
            &RenderPipelineDescriptor {
                label: Some(Cow::Borrowed("Pre-Depth Pipeline")),
                layout: Some(layout),
                vertex_shader_module: shader,
                vertex_entry_point: "vs_main",
                fragment_shader_module: None,
                fragment_entry_point: None,
                vertex_buffers: Cow::Owned(vec![MeshVertex::layout(), InstanceTransform::layout()]),
                color_targets: Cow::Borrowed(&[]),
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: CompareFunction::Less,
                    bias: DepthBiasState::default(),
                }),
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    cull_mode: CullMode::Back,
                },
            },
        )?;

        let camera_ring = UniformRingBuffer::new(
            device,
            camera_layout,
            0,
            std::mem::size_of::<CameraUniformData>() as u64,
            "Pre-Depth Camera",
        )?;

        Ok((pipeline, camera_ring))
    }
}

impl Lane for PreDepthLane {
    fn strategy_name(&self) -> &'static str {
        "PreDepth"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Render
    }

    fn on_initialize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        let mut resources = LaneResources::default();
        match Self::create_gpu(device.as_ref(), &mut resources) {
            Ok((pipeline, camera_ring)) => {
                *lock(&self.gpu) = Some(PreDepthGpu {
                    resources,
                    pipeline,
                    camera_ring,
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
        let extent = required::<ViewportExtent>(ctx, "ViewportExtent")?.0;
        let view = required::<CameraView>(ctx, "CameraView")?.0;
        let depth = required::<DepthTarget>(ctx, "DepthTarget")?.0;
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
        let camera = CameraUniformData::new(&view, extent);
        gpu.camera_ring
            .write(device.as_ref(), slot, bytemuck::bytes_of(&camera))
            .map_err(LaneError::execution)?;

        let assets = read(&assets);
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Pre-Depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
            }),
        });

        let Some(transforms) = batcher.transform_buffer() else {
            return Ok(());
        };
        pass.set_pipeline(gpu.pipeline);
        pass.set_bind_group(0, gpu.camera_ring.bind_group(slot), &[]);
        for batches in [batcher.draws(), batcher.selected_draws()] {
            draw_batches(pass.as_mut(), batches, &assets, transforms, |_, _| {});
        }
        Ok(())
    }

    fn on_shutdown(&self, ctx: &mut LaneContext) {
        let Ok(device) = device(ctx) else {
            return;
        };
        if let Some(mut gpu) = lock(&self.gpu).take() {
            gpu.camera_ring.destroy(device.as_ref());
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

impl RenderPassLane for PreDepthLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        ACCESSES
    }
}
