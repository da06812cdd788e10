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

//! Bloom over the HDR image.
//!
//! A prefilter keeps the energy above the threshold and writes it into the
//! first mip of the bloom chain. Each following mip is a 13-tap downsample of
//! the previous one, and the chain is then folded back up with additive tent
//! upsamples, leaving the result in mip 0 for the composite pass.
//!
//! The sequencer tracks the chain as one resource in `ColorTarget`. Inside the
//! lane every pass reads a level an earlier pass wrote, so each level is
//! transitioned on its own between passes, and the chain is handed back with
//! every level in `ColorTarget` again.

use super::{
    device, lock, required, FrameResource, LaneResources, RenderPassLane, ResourceAccess,
};
use crate::render_lane::shaders::BLOOM_WGSL;
use saturn_core::config::BloomSettings;
use saturn_core::lane::{BloomChain, HdrTarget, Lane, LaneContext, LaneError, LaneKind, Slot};
use saturn_core::math::LinearRgba;
use saturn_core::renderer::api::{
    AddressMode, BarrierTarget, BindGroupDescriptor, BindGroupEntry, BindGroupId, BindGroupLayoutEntry,
    BindGroupLayoutId, BindingResource, BlendMode, BufferBinding, BufferBindingType, BufferId,
    FilterMode, LoadOp, Operations, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipelineId, ResourceBarrier, ResourceState, SamplerBindingType, SamplerDescriptor,
    SamplerId, ShaderStageFlags, StoreOp, TextureFormat, TextureId, TextureViewId,
};
use saturn_core::renderer::error::ResourceError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use std::borrow::Cow;
use std::sync::Mutex;

const ACCESSES: &[ResourceAccess] = &[
    ResourceAccess::new(FrameResource::Hdr, ResourceState::ShaderRead),
    ResourceAccess::new(FrameResource::Bloom, ResourceState::ColorTarget),
];

/// Parameters of `bloom.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BloomParams {
    /// Luminance threshold.
    pub threshold: f32,
    /// Soft knee width.
    pub knee: f32,
    /// Tent filter radius of the upsample, in source texels.
    pub filter_radius: f32,
    /// Padding to a 16-byte multiple.
    pub _padding: f32,
}

impl From<&BloomSettings> for BloomParams {
    fn from(settings: &BloomSettings) -> Self {
        Self {
            threshold: settings.threshold,
            knee: settings.knee.max(1e-4),
            filter_radius: 1.0,
            _padding: 0.0,
        }
    }
}

fn mip_barrier(
    texture: TextureId,
    mip: u32,
    before: ResourceState,
    after: ResourceState,
) -> ResourceBarrier {
    ResourceBarrier {
        target: BarrierTarget::TextureMip { texture, mip },
        before,
        after,
    }
}

/// Transitions recorded before pass `pass` of a chain with `mips` levels.
///
/// Pass 0 is the prefilter, passes `1..mips` downsample into level `pass` and
/// the remaining passes upsample into levels `mips - 2` down to 0. A
/// downsample samples the level the previous pass wrote. An upsample samples
/// level `t + 1` and accumulates into level `t`, which a downsample left in
/// `ShaderRead`.
pub(crate) fn barriers_before_pass(
    texture: TextureId,
    mips: u32,
    pass: u32,
) -> Vec<ResourceBarrier> {
    use ResourceState::{ColorTarget, ShaderRead};
    if pass == 0 {
        Vec::new()
    } else if pass < mips {
        vec![mip_barrier(texture, pass - 1, ColorTarget, ShaderRead)]
    } else {
        let target = 2 * mips - 2 - pass;
        vec![
            mip_barrier(texture, target + 1, ColorTarget, ShaderRead),
            mip_barrier(texture, target, ShaderRead, ColorTarget),
        ]
    }
}

/// Returns levels `1..mips` to `ColorTarget` after the last upsample.
pub(crate) fn restore_barriers(texture: TextureId, mips: u32) -> Vec<ResourceBarrier> {
    (1..mips)
        .map(|mip| {
            mip_barrier(
                texture,
                mip,
                ResourceState::ShaderRead,
                ResourceState::ColorTarget,
            )
        })
        .collect()
}

/// Bind groups sampling one source each, rebuilt when the targets change.
#[derive(Debug, Default)]
struct ChainBindGroups {
    /// The HDR view followed by the chain views the groups were built for.
    sources: Vec<TextureViewId>,
    /// Prefilter, then `n - 1` downsamples, then `n - 1` upsamples.
    groups: Vec<BindGroupId>,
}

impl ChainBindGroups {
    fn matches(&self, hdr: TextureViewId, chain: &[TextureViewId]) -> bool {
        self.sources.first() == Some(&hdr) && self.sources[1..] == *chain
    }

    fn clear(&mut self, device: &dyn GraphicsDevice) {
        for group in self.groups.drain(..) {
            if let Err(e) = device.destroy_bind_group(group) {
                log::warn!("BloomLane: Failed to destroy bind group: {:?}", e);
            }
        }
        self.sources.clear();
    }
}

#[derive(Debug)]
struct BloomGpu {
    resources: LaneResources,
    layout: BindGroupLayoutId,
    sampler: SamplerId,
    params: BufferId,
    prefilter: RenderPipelineId,
    downsample: RenderPipelineId,
    upsample: RenderPipelineId,
    chain_groups: ChainBindGroups,
}

impl BloomGpu {
    fn rebuild_groups(
        &mut self,
        device: &dyn GraphicsDevice,
        hdr: TextureViewId,
        chain: &[TextureViewId],
    ) -> Result<(), ResourceError> {
        self.chain_groups.clear(device);
        // Sources in pass order: prefilter, downsamples, upsamples.
        let sources = std::iter::once(hdr)
            .chain(chain[..chain.len() - 1].iter().copied())
            .chain(chain[1..].iter().rev().copied());
        for source in sources {
            let group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("Bloom Source"),
                layout: self.layout,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::TextureView(source),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::Sampler(self.sampler),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::Buffer(BufferBinding::whole(self.params)),
                    },
                ],
            });
            match group {
                Ok(group) => self.chain_groups.groups.push(group),
                Err(e) => {
                    self.chain_groups.clear(device);
                    return Err(e);
                }
            }
        }
        self.chain_groups.sources = std::iter::once(hdr).chain(chain.iter().copied()).collect();
        Ok(())
    }
}

/// Builds the bloom chain from the HDR target.
#[derive(Debug)]
pub struct BloomLane {
    settings: BloomSettings,
    format: TextureFormat,
    gpu: Mutex<Option<BloomGpu>>,
}

impl Default for BloomLane {
    fn default() -> Self {
        Self::new(BloomSettings::default(), TextureFormat::Rgba16Float)
    }
}

impl BloomLane {
    /// Creates the lane. `format` is the format of the bloom chain, which
    /// matches the HDR target.
    pub fn new(settings: BloomSettings, format: TextureFormat) -> Self {
        Self {
            settings,
            format,
            gpu: Mutex::new(None),
        }
    }

    /// The bloom settings.
    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    fn create_gpu(
        &self,
        device: &dyn GraphicsDevice,
        resources: &mut LaneResources,
    ) -> Result<BloomGpu, ResourceError> {
        let shader = resources.shader(device, "Bloom Shader", BLOOM_WGSL)?;
        let layout = resources.bind_group_layout(
            device,
            "Bloom Layout",
            &[
                BindGroupLayoutEntry::texture_2d(0, ShaderStageFlags::FRAGMENT),
                BindGroupLayoutEntry::sampler(
                    1,
                    ShaderStageFlags::FRAGMENT,
                    SamplerBindingType::Filtering,
                ),
                BindGroupLayoutEntry::buffer(
                    2,
                    ShaderStageFlags::FRAGMENT,
                    BufferBindingType::Uniform,
                ),
            ],
        )?;
        let pipeline_layout = resources.pipeline_layout(device, "Bloom Pipeline Layout", &[layout])?;
        let sampler = resources.sampler(
            device,
            &SamplerDescriptor {
                label: Some(Cow::Borrowed("Bloom Sampler")),
                address_mode: AddressMode::ClampToEdge,
                mag_filter: FilterMode::Linear,
                min_filter: FilterMode::Linear,
                ..Default::default()
            },
        )?;
        let params = resources.uniform_buffer(
            device,
            "Bloom Params",
            bytemuck::bytes_of(&BloomParams::from(&self.settings)),
        )?;

        let mut pipeline = |label, entry, blend| {
            resources.fullscreen_pipeline(
                device,
                label,
                pipeline_layout,
                shader,
                entry,
                self.format,
                blend,
            )
        };
        let prefilter = pipeline("Bloom Prefilter", "fs_prefilter", BlendMode::Replace)?;
        let downsample = pipeline("Bloom Downsample", "fs_downsample", BlendMode::Replace)?;
        let upsample = pipeline("Bloom Upsample", "fs_upsample", BlendMode::Additive)?;

        Ok(BloomGpu {
            resources: std::mem::take(resources),
            layout,
            sampler,
            params,
            prefilter,
            downsample,
            upsample,
            chain_groups: ChainBindGroups::default(),
        })
    }
}

impl Lane for BloomLane {
    fn strategy_name(&self) -> &'static str {
        "Bloom"
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
        let hdr = required::<HdrTarget>(ctx, "HdrTarget")?.0;
        let (texture, chain) = ctx
            .get::<BloomChain>()
            .map(|chain| (chain.texture, chain.views.clone()))
            .ok_or(LaneError::missing("BloomChain"))?;
        let Some(&first) = chain.first() else {
            return Err(LaneError::missing("BloomChain[0]"));
        };
        let encoder = ctx
            .get::<Slot<dyn CommandEncoder>>()
            .ok_or(LaneError::missing("Slot<dyn CommandEncoder>"))?
            .get();

        let mut gpu = lock(&self.gpu);
        let gpu = gpu.as_mut().ok_or(LaneError::NotInitialized)?;

        let black = Operations {
            load: LoadOp::Clear(LinearRgba::ZERO),
            store: StoreOp::Store,
        };
        if !self.settings.enabled {
            // The composite still samples mip 0.
            let color_attachments = [RenderPassColorAttachment {
                view: first,
                ops: black,
            }];
            let _pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Bloom Clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: None,
            });
            return Ok(());
        }

        if !gpu.chain_groups.matches(hdr, &chain) {
            gpu.rebuild_groups(device.as_ref(), hdr, &chain)
                .map_err(LaneError::execution)?;
        }

        let mips = chain.len();
        let mut groups = gpu.chain_groups.groups.iter().copied();
        let mut passes = Vec::with_capacity(2 * mips - 1);
        passes.push((gpu.prefilter, first, black));
        for target in &chain[1..] {
            passes.push((gpu.downsample, *target, black));
        }
        for target in chain[..mips - 1].iter().rev() {
            let accumulate = Operations {
                load: LoadOp::Load,
                store: StoreOp::Store,
            };
            passes.push((gpu.upsample, *target, accumulate));
        }

        let levels = mips as u32;
        for (index, (pipeline, target, ops)) in passes.into_iter().enumerate() {
            let Some(group) = groups.next() else {
                return Err(LaneError::missing("bloom source bind group"));
            };
            let barriers = barriers_before_pass(texture, levels, index as u32);
            if !barriers.is_empty() {
                encoder.resource_barrier(&barriers);
            }
            let color_attachments = [RenderPassColorAttachment { view: target, ops }];
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Bloom"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.draw(0..3, 0..1);
        }
        let restore = restore_barriers(texture, levels);
        if !restore.is_empty() {
            encoder.resource_barrier(&restore);
        }
        Ok(())
    }

    fn on_shutdown(&self, ctx: &mut LaneContext) {
        let Ok(device) = device(ctx) else {
            return;
        };
        if let Some(mut gpu) = lock(&self.gpu).take() {
            gpu.chain_groups.clear(device.as_ref());
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

impl RenderPassLane for BloomLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        ACCESSES
    }

    fn on_resize(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
        let device = device(ctx)?;
        if let Some(gpu) = lock(&self.gpu).as_mut() {
            gpu.chain_groups.clear(device.as_ref());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_clamp_knee() {
        let params = BloomParams::from(&BloomSettings {
            knee: 0.0,
            ..BloomSettings::default()
        });
        assert!(params.knee > 0.0);
        assert_eq!(std::mem::size_of::<BloomParams>(), 16);
    }

    /// Replays the planned transitions over per-level states and checks that
    /// every pass samples a readable level and renders into a writable one.
    #[test]
    fn test_every_pass_sees_its_levels_in_the_right_state() {
        let texture = TextureId(9);
        for mips in 1..=6u32 {
            let mut states = vec![ResourceState::ColorTarget; mips as usize];
            let apply = |barriers: Vec<ResourceBarrier>, states: &mut Vec<ResourceState>| {
                for barrier in barriers {
                    let BarrierTarget::TextureMip { texture: t, mip } = barrier.target else {
                        panic!("expected a mip barrier, got {:?}", barrier.target);
                    };
                    assert_eq!(t, texture);
                    assert_eq!(states[mip as usize], barrier.before, "mip {mip}");
                    states[mip as usize] = barrier.after;
                }
            };

            for pass in 0..2 * mips - 1 {
                apply(barriers_before_pass(texture, mips, pass), &mut states);
                let (source, target) = if pass == 0 {
                    (None, 0)
                } else if pass < mips {
                    (Some(pass - 1), pass)
                } else {
                    let target = 2 * mips - 2 - pass;
                    (Some(target + 1), target)
                };
                if let Some(source) = source {
                    assert_eq!(states[source as usize], ResourceState::ShaderRead);
                }
                assert_eq!(states[target as usize], ResourceState::ColorTarget);
            }
            apply(restore_barriers(texture, mips), &mut states);
            assert!(states.iter().all(|s| *s == ResourceState::ColorTarget));
        }
    }

    #[test]
    fn test_single_level_chain_needs_no_transitions() {
        assert!(barriers_before_pass(TextureId(1), 1, 0).is_empty());
        assert!(restore_barriers(TextureId(1), 1).is_empty());
    }
}
