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

//! Final composite: HDR scene plus bloom, exposed and tone mapped into the
//! output target.

use super::{
    device, lock, required, CachedBindGroup, FrameResource, LaneResources, RenderPassLane,
    ResourceAccess,
};
use crate::render_lane::shaders::COMPOSITE_WGSL;
use saturn_core::config::BloomSettings;
use saturn_core::lane::{
    BloomChain, CameraView, CompositeTarget, FrameSlot, HdrTarget, Lane, LaneContext, LaneError,
    LaneKind, Slot,
};
use saturn_core::math::LinearRgba;
use saturn_core::renderer::api::{
    AddressMode, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutEntry, BindGroupLayoutId,
    BindingResource, BlendMode, BufferBindingType, FilterMode, LoadOp, Operations,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipelineId, ResourceState,
    SamplerBindingType, SamplerDescriptor, SamplerId, ShaderStageFlags, StoreOp, TextureFormat,
    TextureViewId, UniformRingBuffer, MAX_FRAMES_IN_FLIGHT,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use std::borrow::Cow;
use std::sync::Mutex;

const ACCESSES: &[ResourceAccess] = &[
    ResourceAccess::new(FrameResource::Hdr, ResourceState::ShaderRead),
    ResourceAccess::new(FrameResource::Bloom, ResourceState::ShaderRead),
    ResourceAccess::new(FrameResource::Composite, ResourceState::ColorTarget),
];

/// Per-frame parameters of `composite.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeParams {
    /// Linear exposure multiplier.
    pub exposure: f32,
    /// Weight of the bloom term, zero when bloom is off.
    pub bloom_intensity: f32,
    /// Padding to a 16-byte multiple.
    pub _padding: [f32; 2],
}

#[derive(Debug)]
struct CompositeGpu {
    resources: LaneResources,
    pipeline: RenderPipelineId,
    source_layout: BindGroupLayoutId,
    sampler: SamplerId,
    params_ring: UniformRingBuffer,
    source_groups: Vec<CachedBindGroup<(TextureViewId, TextureViewId)>>,
}

/// Resolves the frame into the composite target.
#[derive(Debug)]
pub struct CompositeLane {
    bloom: BloomSettings,
    output_format: TextureFormat,
    gpu: Mutex<Option<CompositeGpu>>,
}

impl Default for CompositeLane {
    fn default() -> Self {
        Self::new(BloomSettings::default(), TextureFormat::Rgba8UnormSrgb)
    }
}

impl CompositeLane {
    /// Creates the lane writing `output_format`.
    pub fn new(bloom: BloomSettings, output_format: TextureFormat) -> Self {
        Self {
            bloom,
            output_format,
            gpu: Mutex::new(None),
        }
    }

    fn create_gpu(
        &self,
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
    ) -> Result<CompositeGpu, ResourceError> {
        let shader = resources.shader(device, "Composite Shader", COMPOSITE_WGSL)?;
        let source_layout = resources.bind_group_layout(
            device,
            "Composite Source Layout",
            &[
                BindGroupLayoutEntry::texture_2d(0, ShaderStageFlags::FRAGMENT),
                BindGroupLayoutEntry::texture_2d(1, ShaderStageFlags::FRAGMENT),
                BindGroupLayoutEntry::sampler(
                    2,
                    ShaderStageFlags::FRAGMENT,
                    SamplerBindingType::Filtering,
                ),
            ],
        )?;
        let params_layout = resources.bind_group_layout(
            device,
            "Composite Params Layout",
            &[BindGroupLayoutEntry::buffer(
                0,
                ShaderStageFlags::FRAGMENT,
                BufferBindingType::Uniform,
            )],
        )?;
        let layout = resources.pipeline_layout(
            device,
            "Composite Layout",
            &[source_layout, params_layout],
        )?;
        let pipeline = resources.fullscreen_pipeline(
            device,
            "Composite Pipeline",
            layout,
            shader,
            "fs_main",
            self.output_format,
            BlendMode::Replace,
        )?;
        let sampler = resources.sampler(
            device,
            &SamplerDescriptor {
                label: Some(Cow::Borrowed("Composite Sampler")),
                address_mode: AddressMode::ClampToEdge,
                mag_filter: FilterMode::Linear,
                min_filter: FilterMode::Linear,
                ..Default::default()
            },
        )?;
        let params_ring = UniformRingBuffer::new(
            device,
            params_layout,
            0,
            std::mem::size_of::<CompositeParams>() as u64,
            "Composite Params",
        )?;

        Ok(CompositeGpu {
            resources: std::mem::take(resources),
            pipeline,
            source_layout,
            sampler,
            params_ring,
            source_groups: (0..MAX_FRAMES_IN_FLIGHT).map(|_| CachedBindGroup::new()).collect(),
        })
    }
}

impl Lane for CompositeLane {
    fn strategy_name(&self) -> &'static str {
        "Composite"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::PostProcess
    }

    fn on_initialize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        let mut resources = LaneResources::default();
        match self.create_gpu(device.as_ref(), &mut resources) {
            Ok(gpu) => {
                *lock(&self.gpu) = Some(gpu);
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
        let view = required::<CameraView>(ctx, "CameraView")?.0;
        let hdr = required::<HdrTarget>(ctx, "HdrTarget")?.0;
        let target = required::<CompositeTarget>(ctx, "CompositeTarget")?.0;
        let bloom = ctx
            .get::<BloomChain>()
            .and_then(|chain| chain.views.first().copied())
            .ok_or(LaneError::missing("BloomChain[0]"))?;
        let encoder = ctx
            .get::<Slot<dyn CommandEncoder>>()
            .ok_or(LaneError::missing("Slot<dyn CommandEncoder>"))?
            .get();

        let mut gpu = lock(&self.gpu);
        let gpu = gpu.as_mut().ok_or(LaneError::NotInitialized)?;

        let params = CompositeParams {
            exposure: view.exposure,
            bloom_intensity: if self.bloom.enabled {
                self.bloom.intensity
            } else {
                0.0
            },
            _padding: [0.0; 2],
        };
        gpu.params_ring
            .write(device.as_ref(), slot, bytemuck::bytes_of(&params))
            .map_err(LaneError::execution)?;

        let (layout, sampler) = (gpu.source_layout, gpu.sampler);
        let sources = gpu.source_groups[slot % MAX_FRAMES_IN_FLIGHT]
            .get_or_create(device.as_ref(), (hdr, bloom), |device| {
                device.create_bind_group(&BindGroupDescriptor {
                    label: Some("Composite Sources"),
                    layout,
                    entries: &[
                        BindGroupEntry {
                            binding: 0,
                            resource: BindingResource::TextureView(hdr),
                        },
                        BindGroupEntry {
                            binding: 1,
                            resource: BindingResource::TextureView(bloom),
                        },
                        BindGroupEntry {
                            binding: 2,
                            resource: BindingResource::Sampler(sampler),
                        },
                    ],
                })
            })
            .map_err(LaneError::execution)?;

        let color_attachments = [RenderPassColorAttachment {
            view: target,
            ops: Operations {
                load: LoadOp::Clear(LinearRgba::new(0.0, 0.0, 0.0, 1.0)),
                store: StoreOp::Store,
            },
        }];
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Composite"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
        });
        pass.set_pipeline(gpu.pipeline);
        pass.set_bind_group(0, sources, &[]);
        pass.set_bind_group(1, gpu.params_ring.bind_group(slot), &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn on_shutdown(&self, ctx: &mut LaneContext) {
        let Ok(device) = device(ctx) else {
            return;
        };
        if let Some(mut gpu) = lock(&self.gpu).take() {
            for group in &mut gpu.source_groups {
                group.invalidate(device.as_ref());
            }
            gpu.params_ring.destroy(device.as_ref());
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

impl RenderPassLane for CompositeLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        ACCESSES
    }

    fn on_resize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        if let Some(gpu) = lock(&self.gpu).as_mut() {
            for group in &mut gpu.source_groups {
                group.invalidate(device.as_ref());
            }
        }
        Ok(())
    }
}
