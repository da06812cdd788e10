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

//! Tiled light culling compute pass.
//!
//! One workgroup per screen tile reduces the tile's pre-depth values to a
//! depth range, tests every point light against the tile frustum and writes
//! the survivors into the light grid. [`TileLightBinner`](super::TileLightBinner)
//! is the CPU counterpart of the same test.

use super::{
    device, lock, required, CachedBindGroup, FrameResource, LaneResources, RenderPassLane,
    ResourceAccess,
};
use crate::render_lane::shaders::LIGHT_CULLING_WGSL;
use saturn_core::lane::{
    CameraView, DepthTarget, FrameSlot, Lane, LaneContext, LaneError, LaneKind, LightGridBuffers,
    PointLightBuffer, Slot, ViewportExtent,
};
use saturn_core::renderer::api::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayoutEntry, BindGroupLayoutId, BindingResource,
    BindingType, BufferBinding, BufferBindingType, BufferId, ComputePassDescriptor,
    ComputePipelineDescriptor, ComputePipelineId, ResourceState, ShaderStageFlags,
    TextureSampleType, TextureViewDimension, TextureViewId, UniformRingBuffer,
    MAX_FRAMES_IN_FLIGHT,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use saturn_core::renderer::{LightCullingConfig, LightCullingUniforms};
use std::borrow::Cow;
use std::sync::Mutex;

const ACCESSES: &[ResourceAccess] = &[
    ResourceAccess::new(FrameResource::Depth, ResourceState::DepthRead),
    ResourceAccess::new(FrameResource::LightGrid, ResourceState::StorageWrite),
];

/// Resources bound in group 1. A change in any of them rebuilds the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CullingInputs {
    lights: BufferId,
    depth: TextureViewId,
    grid: BufferId,
    indices: BufferId,
}

#[derive(Debug)]
struct LightCullingGpu {
    resources: LaneResources,
    pipeline: ComputePipelineId,
    data_layout: BindGroupLayoutId,
    uniform_ring: UniformRingBuffer,
    data_groups: Vec<CachedBindGroup<CullingInputs>>,
}

/// Builds the per-tile light lists read by the geometry pass.
#[derive(Debug)]
pub struct LightCullingLane {
    config: LightCullingConfig,
    gpu: Mutex<Option<LightCullingGpu>>,
}

impl Default for LightCullingLane {
    fn default() -> Self {
        Self::new(LightCullingConfig::default())
    }
}

impl LightCullingLane {
    /// Creates the lane for a tile configuration.
    pub fn new(config: LightCullingConfig) -> Self {
        Self {
            config,
            gpu: Mutex::new(None),
        }
    }

    /// The tile configuration.
    pub fn config(&self) -> &LightCullingConfig {
        &self.config
    }

    fn create_gpu(
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
    ) -> Result<LightCullingGpu, ResourceError> {
        let shader = resources.shader(device, "Light Culling Shader", LIGHT_CULLING_WGSL)?;
        let uniform_layout = resources.bind_group_layout(
            device,
            "Light Culling Uniform Layout",
            &[BindGroupLayoutEntry::buffer(
                0,
                ShaderStageFlags::COMPUTE,
                BufferBindingType::Uniform,
            )],
        )?;
        let storage = |binding, read_only| {
            BindGroupLayoutEntry::buffer(
                binding,
                ShaderStageFlags::COMPUTE,
                BufferBindingType::Storage { read_only },
            )
        };
        let data_layout = resources.bind_group_layout(
            device,
            "Light Culling Data Layout",
            &[
                storage(0, true),
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStageFlags::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Depth,
                        view_dimension: TextureViewDimension::D2,
                    },
                },
                storage(2, false),
                storage(3, false),
            ],
        )?;
        let layout = resources.pipeline_layout(
            device,
            "Light Culling Layout",
            &[uniform_layout, data_layout],
        )?;
        let pipeline = resources.compute_pipeline(
            device,
            &ComputePipelineDescriptor {
                label: Some(Cow::Borrowed("Light Culling Pipeline")),
                layout: Some(layout),
                shader_module: shader,
                entry_point: "cs_main",
            },
        )?;

        let uniform_ring = UniformRingBuffer::new(
            device,
            uniform_layout,
            0,
            std::mem::size_of::<LightCullingUniforms>() as u64,
            "Light Culling Uniforms",
        )?;

        Ok(LightCullingGpu {
            resources: std::mem::take(resources),
            pipeline,
            data_layout,
            uniform_ring,
            data_groups: (0..MAX_FRAMES_IN_FLIGHT).map(|_| CachedBindGroup::new()).collect(),
        })
    }
}

impl Lane for LightCullingLane {
    fn strategy_name(&self) -> &'static str {
        "LightCulling"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Compute
    }

    fn on_initialize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        let mut resources = LaneResources::default();
        match Self::create_gpu(device.as_ref(), &mut resources) {
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
        let extent = required::<ViewportExtent>(ctx, "ViewportExtent")?.0;
        let view = required::<CameraView>(ctx, "CameraView")?.0;
        let depth = required::<DepthTarget>(ctx, "DepthTarget")?.0;
        let grid = required::<LightGridBuffers>(ctx, "LightGridBuffers")?;
        let lights = required::<PointLightBuffer>(ctx, "PointLightBuffer")?;
        let encoder = ctx
            .get::<Slot<dyn CommandEncoder>>()
            .ok_or(LaneError::missing("Slot<dyn CommandEncoder>"))?
            .get();

        let mut gpu = lock(&self.gpu);
        let gpu = gpu.as_mut().ok_or(LaneError::NotInitialized)?;

        // 1. Uniforms.
        let (tiles_x, tiles_y) = self.config.tile_dimensions(extent);
        let uniforms = LightCullingUniforms {
            view: view.view_matrix.to_cols_array_2d(),
            inverse_projection: view.projection_matrix.inverse().to_cols_array_2d(),
            screen_size: [extent.width as f32, extent.height as f32],
            tile_count: [tiles_x, tiles_y],
            light_count: lights.count,
            tile_size: self.config.tile_size.pixels(),
            max_lights_per_tile: self.config.max_lights_per_tile,
            _padding: 0,
        };
        gpu.uniform_ring
            .write(device.as_ref(), slot, bytemuck::bytes_of(&uniforms))
            .map_err(LaneError::execution)?;

        // 2. Data bind group of this frame slot.
        let inputs = CullingInputs {
            lights: lights.buffer,
            depth,
            grid: grid.grid,
            indices: grid.indices,
        };
        let data_layout = gpu.data_layout;
        let data_group = gpu.data_groups[slot % MAX_FRAMES_IN_FLIGHT]
            .get_or_create(device.as_ref(), inputs, |device| {
                let buffer = |binding, buffer| BindGroupEntry {
                    binding,
                    resource: BindingResource::Buffer(BufferBinding::whole(buffer)),
                };
                device.create_bind_group(&BindGroupDescriptor {
                    label: Some("Light Culling Data"),
                    layout: data_layout,
                    entries: &[
                        buffer(0, inputs.lights),
                        BindGroupEntry {
                            binding: 1,
                            resource: BindingResource::TextureView(inputs.depth),
                        },
                        buffer(2, inputs.grid),
                        buffer(3, inputs.indices),
                    ],
                })
            })
            .map_err(LaneError::execution)?;

        // 3. Dispatch one workgroup per tile.
        let (x, y, z) = self.config.workgroup_count(extent);
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Light Culling"),
        });
        pass.set_pipeline(gpu.pipeline);
        pass.set_bind_group(0, gpu.uniform_ring.bind_group(slot), &[]);
        pass.set_bind_group(1, data_group, &[]);
        pass.dispatch_workgroups(x, y, z);

        log::trace!(
            "LightCullingLane: {} lights over {}x{} tiles",
            lights.count,
            tiles_x,
            tiles_y
        );
        Ok(())
    }

    fn on_shutdown(&self, ctx: &mut LaneContext) {
        let Ok(device) = device(ctx) else {
            return;
        };
        if let Some(mut gpu) = lock(&self.gpu).take() {
            for group in &mut gpu.data_groups {
                group.invalidate(device.as_ref());
            }
            gpu.uniform_ring.destroy(device.as_ref());
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

impl RenderPassLane for LightCullingLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        ACCESSES
    }

    fn on_resize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        if let Some(gpu) = lock(&self.gpu).as_mut() {
            for group in &mut gpu.data_groups {
                group.invalidate(device.as_ref());
            }
        }
        Ok(())
    }
}
