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

//! Lit forward pass over the pre-depth buffer.
//!
//! Draws, into the HDR target:
//!
//! 1. the dynamic sky, behind everything, when one is set;
//! 2. the ground grid, blended over the sky, when enabled;
//! 3. the main batches, lit by the directional lights (with cascaded shadows
//!    for the dominant one) and by the point lights of the fragment's tile;
//! 4. the selected batches, lit the same way;
//! 5. an outline around the selected batches.
//!
//! Depth was written by the pre-depth pass and is only tested here.

use super::{
    device, draw_batches, lock, read, required, CachedBindGroup, DrawTally, FrameCascades,
    FrameResource, InstanceBatcher, InstanceTransform, LaneResources, PreethamSky,
    RenderPassLane, ResourceAccess, SkyUniform, DEPTH_FORMAT,
};
use crate::render_lane::shaders::{GEOMETRY_WGSL, GRID_WGSL};
use saturn_core::config::{GridSettings, MAX_SHADOW_CASCADES};
use saturn_core::lane::{
    CameraView, ClearColor, DepthTarget, FrameSlot, HdrTarget, Lane, LaneContext, LaneError,
    LaneKind, LightGridBuffers, PointLightBuffer, Ref, ShadowAtlasView, ShadowComparisonSampler,
    Slot, ViewportExtent,
};
use saturn_core::math::{Mat4, Vec3};
use saturn_core::renderer::api::{
    BindGroupDescriptor, BindGroupEntry, BindGroupId, BindGroupLayoutEntry, BindGroupLayoutId,
    BindingResource, BindingType, BlendMode, BufferBinding, BufferBindingType, BufferId,
    ColorTargetState, CompareFunction, CullMode, DepthBiasState, DepthStencilState, LoadOp,
    MeshVertex, Operations, PipelineLayoutId, PrimitiveState, PrimitiveTopology, RenderAssets,
    RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor,
    RenderPipelineDescriptor, RenderPipelineId, ResourceState, SamplerBindingType, SamplerId,
    ShaderModuleId, ShaderStageFlags, StoreOp, TextureFormat, TextureSampleType,
    TextureViewDimension, TextureViewId, UniformRingBuffer, MAX_FRAMES_IN_FLIGHT,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use saturn_core::renderer::{
    CameraUniformData, GpuDirectionalLight, LightCullingConfig, Lights, MAX_DIRECTIONAL_LIGHTS,
};
use std::borrow::Cow;
use std::sync::{Arc, Mutex, RwLock};

const ACCESSES: &[ResourceAccess] = &[
    ResourceAccess::new(FrameResource::Depth, ResourceState::DepthRead),
    ResourceAccess::new(FrameResource::LightGrid, ResourceState::StorageRead),
    ResourceAccess::new(FrameResource::ShadowAtlas, ResourceState::ShaderRead),
    ResourceAccess::new(FrameResource::Hdr, ResourceState::ColorTarget),
];

/// The sky to draw behind the scene, published into the lane context.
/// `None` leaves the clear colour visible.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DynamicSky(pub Option<PreethamSky>);

/// Per-frame data of the geometry shader. Mirrors `FrameUniforms` in
/// `geometry.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GeometryUniforms {
    /// Camera matrices.
    pub camera: CameraUniformData,
    /// World to light clip space, per cascade.
    pub cascade_view_projections: [[[f32; 4]; 4]; MAX_SHADOW_CASCADES as usize],
    /// Far view depth of each cascade.
    pub cascade_splits: [f32; MAX_SHADOW_CASCADES as usize],
    /// Directional lights, `counts[0]` of them valid.
    pub directional: [GpuDirectionalLight; MAX_DIRECTIONAL_LIGHTS],
    /// The dynamic sky.
    pub sky: SkyUniform,
    /// Directional lights, point lights, cascades and a sky flag.
    pub counts: [u32; 4],
    /// Tiles per row, tiles per column, tile size and the per-tile cap.
    pub tiles: [u32; 4],
}

/// Material parameters bound at group 2.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    /// Linear base colour and alpha.
    pub base_color: [f32; 4],
    /// Emitted radiance, `w` unused.
    pub emissive: [f32; 4],
    /// Perceptual roughness, metalness and two unused lanes.
    pub roughness_metallic: [f32; 4],
}

impl Default for MaterialUniform {
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.8, 0.8, 1.0],
            emissive: [0.0; 4],
            roughness_metallic: [0.5, 0.0, 0.0, 0.0],
        }
    }
}

/// Placement and line parameters of `grid.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GridUniform {
    /// Maps the unit quad on the XY plane onto the grid square on XZ.
    pub transform: [[f32; 4]; 4],
    /// Line width as a fraction of one cell.
    pub line_width: f32,
    /// Cells along one side.
    pub cell_count: f32,
    /// Padding to a 16-byte multiple.
    pub _padding: [f32; 2],
}

impl From<&GridSettings> for GridUniform {
    fn from(settings: &GridSettings) -> Self {
        let transform = Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2)
            * Mat4::from_scale(Vec3::splat(settings.half_extent));
        Self {
            transform: transform.to_cols_array_2d(),
            line_width: settings.line_width,
            cell_count: settings.cell_count,
            _padding: [0.0; 2],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GridGpu {
    pipeline: RenderPipelineId,
    group: BindGroupId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LightingInputs {
    lights: BufferId,
    grid: BufferId,
    indices: BufferId,
    atlas: TextureViewId,
    sampler: SamplerId,
}

#[derive(Debug)]
struct GeometryGpu {
    resources: LaneResources,
    lit_pipeline: RenderPipelineId,
    sky_pipeline: RenderPipelineId,
    outline_pipeline: RenderPipelineId,
    grid: Option<GridGpu>,
    lighting_layout: BindGroupLayoutId,
    material_layout: BindGroupLayoutId,
    default_material: BindGroupId,
    frame_ring: UniformRingBuffer,
    lighting_groups: Vec<CachedBindGroup<LightingInputs>>,
}

/// Shades the frame's batches into the HDR target.
#[derive(Debug)]
pub struct GeometryLane {
    hdr_format: TextureFormat,
    light_culling: LightCullingConfig,
    grid: GridSettings,
    gpu: Mutex<Option<GeometryGpu>>,
}

impl Default for GeometryLane {
    fn default() -> Self {
        Self::new(TextureFormat::Rgba16Float, LightCullingConfig::default())
    }
}

impl GeometryLane {
    /// Creates the lane for an HDR target format and tile configuration.
    pub fn new(hdr_format: TextureFormat, light_culling: LightCullingConfig) -> Self {
        Self {
            hdr_format,
            light_culling,
            grid: GridSettings::default(),
            gpu: Mutex::new(None),
        }
    }

    /// Draws the ground grid with `grid` when it is enabled.
    pub fn with_grid(mut self, grid: GridSettings) -> Self {
        self.grid = grid;
        self
    }

    /// Layout that material bind groups must be created against, available
    /// once the lane is initialized.
    pub fn material_layout(&self) -> Option<BindGroupLayoutId> {
        lock(&self.gpu).as_ref().map(|gpu| gpu.material_layout)
    }

    fn create_gpu(
        &self,
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
    ) -> Result<GeometryGpu, ResourceError> {
        let shader = resources.shader(device, "Geometry Shader", GEOMETRY_WGSL)?;

        let frame_layout = resources.bind_group_layout(
            device,
            "Geometry Frame Layout",
            &[BindGroupLayoutEntry::buffer(
                0,
                ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
                BufferBindingType::Uniform,
            )],
        )?;
        let read_only = |binding| {
            BindGroupLayoutEntry::buffer(
                binding,
                ShaderStageFlags::FRAGMENT,
                BufferBindingType::Storage { read_only: true },
            )
        };
        let lighting_layout = resources.bind_group_layout(
            device,
            "Geometry Lighting Layout",
            &[
                read_only(0),
                read_only(1),
                read_only(2),
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStageFlags::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Depth,
                        view_dimension: TextureViewDimension::D2Array,
                    },
                },
                BindGroupLayoutEntry::sampler(
                    4,
                    ShaderStageFlags::FRAGMENT,
                    SamplerBindingType::Comparison,
                ),
            ],
        )?;
        let material_layout = resources.bind_group_layout(
            device,
            "Material Layout",
            &[BindGroupLayoutEntry::buffer(
                0,
                ShaderStageFlags::FRAGMENT,
                BufferBindingType::Uniform,
            )],
        )?;

        let lit_layout = resources.pipeline_layout(
            device,
            "Geometry Lit Layout",
            &[frame_layout, lighting_layout, material_layout],
        )?;
        let frame_only_layout =
            resources.pipeline_layout(device, "Geometry Frame Only Layout", &[frame_layout])?;

        let lit_pipeline = self.mesh_pipeline(
            device,
            resources,
            "Geometry Lit Pipeline",
            lit_layout,
            shader,
            ("vs_main", "fs_main"),
            CullMode::Back,
            CompareFunction::LessEqual,
        )?;
        let outline_pipeline = self.mesh_pipeline(
            device,
            resources,
            "Geometry Outline Pipeline",
            frame_only_layout,
            shader,
            ("vs_outline", "fs_outline"),
            CullMode::Front,
            CompareFunction::Always,
        )?;
        let sky_pipeline = resources.render_pipeline(
            device,
            &RenderPipelineDescriptor {
                label: Some(Cow::Borrowed("Geometry Sky Pipeline")),
                layout: Some(frame_only_layout),
                vertex_shader_module: shader,
                vertex_entry_point: "vs_sky",
                fragment_shader_module: Some(shader),
                fragment_entry_point: Some("fs_sky"),
                vertex_buffers: Cow::Borrowed(&[]),
                color_targets: Cow::Owned(vec![ColorTargetState {
                    format: self.hdr_format,
                    blend: BlendMode::Replace,
                }]),
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::LessEqual,
                    bias: DepthBiasState::default(),
                }),
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    cull_mode: CullMode::None,
                },
            },
        )?;

        let grid = if self.grid.enabled {
            Some(self.create_grid(device, resources, frame_layout)?)
        } else {
            None
        };

        let material_buffer = resources.uniform_buffer(
            device,
            "Default Material",
            bytemuck::bytes_of(&MaterialUniform::default()),
        )?;
        let default_material = resources.bind_group(
            device,
            &BindGroupDescriptor {
                label: Some("Default Material"),
                layout: material_layout,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(BufferBinding::whole(material_buffer)),
                }],
            },
        )?;

        let frame_ring = UniformRingBuffer::new(
            device,
            frame_layout,
            0,
            std::mem::size_of::<GeometryUniforms>() as u64,
            "Geometry Frame Uniforms",
        )?;

        Ok(GeometryGpu {
            resources: std::mem::take(resources),
            lit_pipeline,
            sky_pipeline,
            outline_pipeline,
            grid,
            lighting_layout,
            material_layout,
            default_material,
            frame_ring,
            lighting_groups: (0..MAX_FRAMES_IN_FLIGHT).map(|_| CachedBindGroup::new()).collect(),
        })
    }

    fn create_grid(
        &self,
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
        frame_layout: BindGroupLayoutId,
    ) -> Result<GridGpu, ResourceError> {
        let shader = resources.shader(device, "Grid Shader", GRID_WGSL)?;
        let grid_layout = resources.bind_group_layout(
            device,
            "Grid Layout",
            &[BindGroupLayoutEntry::buffer(
                0,
                ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
                BufferBindingType::Uniform,
            )],
        )?;
        let layout =
            resources.pipeline_layout(device, "Grid Pipeline Layout", &[frame_layout, grid_layout])?;
        let pipeline = resources.render_pipeline(
            device,
            &RenderPipelineDescriptor {
                label: Some(Cow::Borrowed("Grid Pipeline")),
                layout: Some(layout),
                vertex_shader_module: shader,
                vertex_entry_point: "vs_grid",
                fragment_shader_module: Some(shader),
                fragment_entry_point: Some("fs_grid"),
                vertex_buffers: Cow::Borrowed(&[]),
                color_targets: Cow::Owned(vec![ColorTargetState {
                    format: self.hdr_format,
                    blend: BlendMode::AlphaBlending,
                }]),
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::LessEqual,
                    bias: DepthBiasState::default(),
                }),
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    cull_mode: CullMode::None,
                },
            },
        )?;
        let params = resources.uniform_buffer(
            device,
            "Grid Params",
            bytemuck::bytes_of(&GridUniform::from(&self.grid)),
        )?;
        let group = resources.bind_group(
            device,
            &BindGroupDescriptor {
                label: Some("Grid"),
                layout: grid_layout,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(BufferBinding::whole(params)),
                }],
            },
        )?;
        Ok(GridGpu { pipeline, group })
    }

    #[allow(clippy::too_many_arguments)]
    fn mesh_pipeline(
        &self,
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
        label: &'static str,
        layout: PipelineLayoutId,
        shader: ShaderModuleId,
        (vertex_entry, fragment_entry): (&str, &str),
        cull_mode: CullMode,
        depth_compare: CompareFunction,
    ) -> Result<RenderPipelineId, ResourceError> {
        resources.render_pipeline(
            device,
            &RenderPipelineDescriptor {
                label: Some(Cow::Borrowed(label)),
                layout: Some(layout),
                vertex_shader_module: shader,
                vertex_entry_point: vertex_entry,
                fragment_shader_module: Some(shader),
                fragment_entry_point: Some(fragment_entry),
                vertex_buffers: Cow::Owned(vec![MeshVertex::layout(), InstanceTransform::layout()]),
                color_targets: Cow::Owned(vec![ColorTargetState {
                    format: self.hdr_format,
                    blend: BlendMode::Replace,
                }]),
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare,
                    bias: DepthBiasState::default(),
                }),
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    cull_mode,
                },
            },
        )
    }

    fn frame_uniforms(
        &self,
        ctx: &LaneContext,
        point_lights: u32,
    ) -> Result<GeometryUniforms, LaneError> {
        let extent = required::<ViewportExtent>(ctx, "ViewportExtent")?.0;
        let view = required::<CameraView>(ctx, "CameraView")?.0;
        let lights = ctx
            .get::<Ref<Lights>>()
            .ok_or(LaneError::missing("Ref<Lights>"))?
            .get();
        let cascades = ctx.get::<FrameCascades>().map_or(&[][..], |c| c.0.as_slice());
        let sky = ctx.get::<DynamicSky>().and_then(|sky| sky.0);

        let mut uniforms = GeometryUniforms {
            camera: CameraUniformData::new(&view, extent),
            cascade_view_projections: [[[0.0; 4]; 4]; MAX_SHADOW_CASCADES as usize],
            cascade_splits: [0.0; MAX_SHADOW_CASCADES as usize],
            directional: [bytemuck::Zeroable::zeroed(); MAX_DIRECTIONAL_LIGHTS],
            sky: sky.map(|sky| sky.uniform()).unwrap_or_else(bytemuck::Zeroable::zeroed),
            counts: [0; 4],
            tiles: [0; 4],
        };

        for (i, cascade) in cascades.iter().take(MAX_SHADOW_CASCADES as usize).enumerate() {
            uniforms.cascade_view_projections[i] = cascade.view_projection.to_cols_array_2d();
            uniforms.cascade_splits[i] = cascade.split_depth;
        }

        // Only the dominant light samples the cascades.
        let dominant = lights.directional.iter().position(|light| light.cast_shadows);
        let directional = lights.directional.iter().take(MAX_DIRECTIONAL_LIGHTS);
        for (i, light) in directional.enumerate() {
            let mut gpu_light = GpuDirectionalLight::from(light);
            let shadowed = Some(i) == dominant && !cascades.is_empty();
            gpu_light.shadowed = if shadowed { 1.0 } else { 0.0 };
            uniforms.directional[i] = gpu_light;
        }
        if lights.directional.len() > MAX_DIRECTIONAL_LIGHTS {
            log::debug!(
                "GeometryLane: {} directional lights, only the first {} are shaded",
                lights.directional.len(),
                MAX_DIRECTIONAL_LIGHTS
            );
        }

        let (tiles_x, tiles_y) = self.light_culling.tile_dimensions(extent);
        uniforms.counts = [
            lights.directional.len().min(MAX_DIRECTIONAL_LIGHTS) as u32,
            point_lights,
            cascades.len().min(MAX_SHADOW_CASCADES as usize) as u32,
            sky.is_some() as u32,
        ];
        uniforms.tiles = [
            tiles_x,
            tiles_y,
            self.light_culling.tile_size.pixels(),
            self.light_culling.max_lights_per_tile,
        ];
        Ok(uniforms)
    }
}

impl Lane for GeometryLane {
    fn strategy_name(&self) -> &'static str {
        "Geometry"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Render
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
        let depth = required::<DepthTarget>(ctx, "DepthTarget")?.0;
        let hdr = required::<HdrTarget>(ctx, "HdrTarget")?.0;
        let clear = required::<ClearColor>(ctx, "ClearColor")?.0;
        let grid = required::<LightGridBuffers>(ctx, "LightGridBuffers")?;
        let point_lights = required::<PointLightBuffer>(ctx, "PointLightBuffer")?;
        let atlas = required::<ShadowAtlasView>(ctx, "ShadowAtlasView")?.0;
        let sampler = required::<ShadowComparisonSampler>(ctx, "ShadowComparisonSampler")?.0;
        let assets = required::<Arc<RwLock<RenderAssets>>>(ctx, "Arc<RwLock<RenderAssets>>")?;
        let uniforms = self.frame_uniforms(ctx, point_lights.count)?;
        let sky_enabled = uniforms.counts[3] != 0;

        let mut gpu = lock(&self.gpu);
        let gpu = gpu.as_mut().ok_or(LaneError::NotInitialized)?;
        gpu.frame_ring
            .write(device.as_ref(), slot, bytemuck::bytes_of(&uniforms))
            .map_err(LaneError::execution)?;

        let inputs = LightingInputs {
            lights: point_lights.buffer,
            grid: grid.grid,
            indices: grid.indices,
            atlas,
            sampler,
        };
        let lighting_layout = gpu.lighting_layout;
        let lighting_group = gpu.lighting_groups[slot % MAX_FRAMES_IN_FLIGHT]
            .get_or_create(device.as_ref(), inputs, |device| {
                let buffer = |binding, buffer| BindGroupEntry {
                    binding,
                    resource: BindingResource::Buffer(BufferBinding::whole(buffer)),
                };
                device.create_bind_group(&BindGroupDescriptor {
                    label: Some("Geometry Lighting"),
                    layout: lighting_layout,
                    entries: &[
                        buffer(0, inputs.lights),
                        buffer(1, inputs.grid),
                        buffer(2, inputs.indices),
                        BindGroupEntry {
                            binding: 3,
                            resource: BindingResource::TextureView(inputs.atlas),
                        },
                        BindGroupEntry {
                            binding: 4,
                            resource: BindingResource::Sampler(inputs.sampler),
                        },
                    ],
                })
            })
            .map_err(LaneError::execution)?;

        let batcher = ctx
            .get::<Ref<InstanceBatcher>>()
            .ok_or(LaneError::missing("Ref<InstanceBatcher>"))?
            .get();
        let encoder = ctx
            .get::<Slot<dyn CommandEncoder>>()
            .ok_or(LaneError::missing("Slot<dyn CommandEncoder>"))?
            .get();
        let frame_group = gpu.frame_ring.bind_group(slot);
        let assets = read(&assets);

        let color_attachments = [RenderPassColorAttachment {
            view: hdr,
            ops: Operations {
                load: LoadOp::Clear(clear),
                store: StoreOp::Store,
            },
        }];
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Geometry"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: None,
            }),
        });

        if sky_enabled {
            pass.set_pipeline(gpu.sky_pipeline);
            pass.set_bind_group(0, frame_group, &[]);
            pass.draw(0..3, 0..1);
        }

        if let Some(grid) = gpu.grid {
            pass.set_pipeline(grid.pipeline);
            pass.set_bind_group(0, frame_group, &[]);
            pass.set_bind_group(1, grid.group, &[]);
            pass.draw(0..6, 0..1);
        }

        let mut tally = DrawTally::default();
        if let Some(transforms) = batcher.transform_buffer() {
            pass.set_pipeline(gpu.lit_pipeline);
            pass.set_bind_group(0, frame_group, &[]);
            pass.set_bind_group(1, lighting_group, &[]);

            let default_material = gpu.default_material;
            let mut bound_material = None;
            for batches in [batcher.draws(), batcher.selected_draws()] {
                tally.absorb(draw_batches(
                    pass.as_mut(),
                    batches,
                    &assets,
                    transforms,
                    |pass, batch| {
                        let material = assets
                            .material(batch.material)
                            .map_or(default_material, |material| material.bind_group);
                        if bound_material != Some(material) {
                            pass.set_bind_group(2, material, &[]);
                            bound_material = Some(material);
                        }
                    },
                ));
            }

            if !batcher.selected_draws().is_empty() {
                pass.set_pipeline(gpu.outline_pipeline);
                pass.set_bind_group(0, frame_group, &[]);
                draw_batches(
                    pass.as_mut(),
                    batcher.selected_draws(),
                    &assets,
                    transforms,
                    |_, _| {},
                );
            }
        }
        drop(pass);

        if tally.skipped > 0 {
            log::warn!(
                "GeometryLane: {} batches referenced meshes that are not loaded",
                tally.skipped
            );
        }
        ctx.insert(tally);
        Ok(())
    }

    fn on_shutdown(&self, ctx: &mut LaneContext) {
        let Ok(device) = device(ctx) else {
            return;
        };
        if let Some(mut gpu) = lock(&self.gpu).take() {
            for group in &mut gpu.lighting_groups {
                group.invalidate(device.as_ref());
            }
            gpu.frame_ring.destroy(device.as_ref());
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

impl RenderPassLane for GeometryLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        ACCESSES
    }

    fn on_resize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        if let Some(gpu) = lock(&self.gpu).as_mut() {
            for group in &mut gpu.lighting_groups {
                group.invalidate(device.as_ref());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layouts_match_shader() {
        assert_eq!(std::mem::size_of::<GeometryUniforms>(), 896);
        assert_eq!(std::mem::size_of::<GeometryUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 48);
        assert_eq!(std::mem::size_of::<GridUniform>(), 80);
    }

    #[test]
    fn test_grid_lies_on_the_ground_plane() {
        let uniform = GridUniform::from(&GridSettings::default());
        let transform = Mat4::from_cols_array_2d(&uniform.transform);
        let corner = transform.transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert!(corner.abs_diff_eq(Vec3::new(16.0, 0.0, 16.0), 1e-4));
        let centre = transform.transform_point3(Vec3::ZERO);
        assert!(centre.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert_eq!(uniform.line_width, 0.025);
        assert_eq!(uniform.cell_count, 16.025);
    }
}
