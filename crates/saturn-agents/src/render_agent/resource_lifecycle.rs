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

//! Ownership of the frame's render targets.
//!
//! Resources fall into three sets with different lifetimes:
//!
//! - **shared**: samplers that outlive every resize;
//! - **shadow atlas**: the cascade array texture and its per-layer views,
//!   rebuilt only when the shadow resolution or cascade count changes;
//! - **frame targets**: depth, HDR, bloom chain, composite and the light tile
//!   buffers, rebuilt whenever the viewport size changes.
//!
//! A rebuild waits for every in-flight submission before destroying anything,
//! and builds the replacement set completely before the old one is released,
//! so a failed allocation leaves the previous targets intact.

use super::FrameSync;
use saturn_core::config::ShadowSettings;
use saturn_core::lane::{
    BloomChain, CompositeTarget, DepthTarget, HdrTarget, LaneContext, LightGridBuffers,
    ShadowAtlasView, ShadowComparisonSampler, ShadowLayerViews,
};
use saturn_core::math::{Extent2D, Extent3D};
use saturn_core::renderer::api::{
    AddressMode, BarrierTarget, BufferDescriptor, BufferId, BufferUsage, CompareFunction,
    FilterMode, SamplerDescriptor, SamplerId, TextureDescriptor, TextureFormat, TextureId,
    TextureUsage, TextureViewDescriptor, TextureViewDimension, TextureViewId,
};
use saturn_core::renderer::error::RenderError;
use saturn_core::renderer::traits::GraphicsDevice;
use saturn_core::renderer::LightCullingConfig;
use saturn_core::RendererConfig;
use saturn_lanes::{FrameResource, DEPTH_FORMAT, SHADOW_FORMAT};
use std::borrow::Cow;

/// Every object of one resource set, in creation order.
#[derive(Debug, Default)]
struct OwnedSet {
    textures: Vec<TextureId>,
    views: Vec<TextureViewId>,
    buffers: Vec<BufferId>,
    samplers: Vec<SamplerId>,
}

impl OwnedSet {
    fn texture(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureId, RenderError> {
        let id = device.create_texture(descriptor).map_err(|e| {
            RenderError::allocation(descriptor.label.as_deref().unwrap_or("texture"), e)
        })?;
        self.textures.push(id);
        Ok(id)
    }

    fn view(
        &mut self,
        device: &dyn GraphicsDevice,
        texture: TextureId,
        descriptor: &TextureViewDescriptor,
    ) -> Result<TextureViewId, RenderError> {
        let id = device.create_texture_view(texture, descriptor).map_err(|e| {
            RenderError::allocation(descriptor.label.as_deref().unwrap_or("texture view"), e)
        })?;
        self.views.push(id);
        Ok(id)
    }

    fn buffer(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferId, RenderError> {
        let id = device.create_buffer(descriptor).map_err(|e| {
            RenderError::allocation(descriptor.label.as_deref().unwrap_or("buffer"), e)
        })?;
        self.buffers.push(id);
        Ok(id)
    }

    fn sampler(
        &mut self,
        device: &dyn GraphicsDevice,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerId, RenderError> {
        let id = device.create_sampler(descriptor).map_err(|e| {
            RenderError::allocation(descriptor.label.as_deref().unwrap_or("sampler"), e)
        })?;
        self.samplers.push(id);
        Ok(id)
    }

    /// A single-mip 2D texture and its default view.
    fn target(
        &mut self,
        device: &dyn GraphicsDevice,
        label: &'static str,
        extent: Extent2D,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Result<Target, RenderError> {
        let texture = self.texture(
            device,
            &TextureDescriptor {
                label: Some(Cow::Borrowed(label)),
                size: extent.to_3d(),
                mip_level_count: 1,
                sample_count: 1,
                format,
                usage,
            },
        )?;
        let view = self.view(device, texture, &TextureViewDescriptor::default())?;
        Ok(Target { texture, view })
    }

    fn len(&self) -> usize {
        self.textures.len() + self.views.len() + self.buffers.len() + self.samplers.len()
    }

    /// Views go before the textures they were created from.
    fn destroy(&mut self, device: &dyn GraphicsDevice, owner: &str) {
        for id in self.views.drain(..).rev() {
            if let Err(e) = device.destroy_texture_view(id) {
                log::warn!("{owner}: Failed to destroy texture view {:?}: {:?}", id, e);
            }
        }
        for id in self.textures.drain(..).rev() {
            if let Err(e) = device.destroy_texture(id) {
                log::warn!("{owner}: Failed to destroy texture {:?}: {:?}", id, e);
            }
        }
        for id in self.buffers.drain(..).rev() {
            if let Err(e) = device.destroy_buffer(id) {
                log::warn!("{owner}: Failed to destroy buffer {:?}: {:?}", id, e);
            }
        }
        for id in self.samplers.drain(..).rev() {
            if let Err(e) = device.destroy_sampler(id) {
                log::warn!("{owner}: Failed to destroy sampler {:?}: {:?}", id, e);
            }
        }
    }
}

/// Number of bloom mips that fit a chain starting at `base`, capped at `requested`.
pub fn bloom_mip_count(base: Extent2D, requested: u32) -> u32 {
    let largest = base.width.max(base.height).max(1);
    let available = u32::BITS - largest.leading_zeros();
    requested.clamp(1, available)
}

#[derive(Debug, Clone, Copy)]
struct Target {
    texture: TextureId,
    view: TextureViewId,
}

/// The viewport-sized resources.
#[derive(Debug)]
struct FrameTargets {
    owned: OwnedSet,
    extent: Extent2D,
    depth: Target,
    hdr: Target,
    bloom: TextureId,
    bloom_views: Vec<TextureViewId>,
    composite: Target,
    light_grid: BufferId,
    light_indices: BufferId,
}

impl FrameTargets {
    fn create(
        device: &dyn GraphicsDevice,
        config: &RendererConfig,
        extent: Extent2D,
    ) -> Result<Self, RenderError> {
        let mut owned = OwnedSet::default();
        match Self::build(device, &mut owned, config, extent) {
            Ok(targets) => Ok(targets),
            Err(e) => {
                owned.destroy(device, "ResourceLifecycle");
                Err(e)
            }
        }
    }

    fn build(
        device: &dyn GraphicsDevice,
        owned: &mut OwnedSet,
        config: &RendererConfig,
        extent: Extent2D,
    ) -> Result<Self, RenderError> {
        let sampled = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;

        let depth = owned.target(device, "Depth Target", extent, DEPTH_FORMAT, sampled)?;
        let hdr = owned.target(device, "HDR Target", extent, config.hdr_format, sampled)?;
        let composite = owned.target(
            device,
            "Composite Target",
            extent,
            config.output_format,
            sampled | TextureUsage::COPY_SRC,
        )?;

        let (bloom, bloom_views) = Self::bloom_chain(device, owned, config, extent)?;

        let culling = &config.light_culling;
        let storage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        let light_grid = owned.buffer(
            device,
            &BufferDescriptor {
                label: Some(Cow::Borrowed("Light Grid")),
                size: culling.light_grid_buffer_size(extent),
                usage: storage,
            },
        )?;
        let light_indices = owned.buffer(
            device,
            &BufferDescriptor {
                label: Some(Cow::Borrowed("Light Index List")),
                size: culling.light_index_buffer_size(extent),
                usage: storage,
            },
        )?;

        Ok(Self {
            owned: std::mem::take(owned),
            extent,
            depth,
            hdr,
            bloom,
            bloom_views,
            composite,
            light_grid,
            light_indices,
        })
    }

    /// Bloom works at half resolution; mip `i` of the chain is half of mip `i - 1`.
    fn bloom_chain(
        device: &dyn GraphicsDevice,
        owned: &mut OwnedSet,
        config: &RendererConfig,
        extent: Extent2D,
    ) -> Result<(TextureId, Vec<TextureViewId>), RenderError> {
        let base = extent.mip_level(1);
        let mips = bloom_mip_count(base, config.bloom.mip_count);
        let texture = owned.texture(
            device,
            &TextureDescriptor {
                label: Some(Cow::Borrowed("Bloom Chain")),
                size: base.to_3d(),
                mip_level_count: mips,
                sample_count: 1,
                format: config.hdr_format,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            },
        )?;
        let views = (0..mips)
            .map(|mip| {
                owned.view(
                    device,
                    texture,
                    &TextureViewDescriptor {
                        label: Some(Cow::Owned(format!("Bloom Mip {mip}"))),
                        base_mip_level: mip,
                        mip_level_count: Some(1),
                        ..Default::default()
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((texture, views))
    }
}

/// The cascade array texture.
#[derive(Debug)]
struct ShadowAtlas {
    owned: OwnedSet,
    texture: TextureId,
    array_view: TextureViewId,
    layer_views: Vec<TextureViewId>,
}

impl ShadowAtlas {
    fn create(device: &dyn GraphicsDevice, settings: &ShadowSettings) -> Result<Self, RenderError> {
        let mut owned = OwnedSet::default();
        match Self::build(device, &mut owned, settings) {
            Ok(atlas) => Ok(atlas),
            Err(e) => {
                owned.destroy(device, "ResourceLifecycle");
                Err(e)
            }
        }
    }

    /// With shadows disabled the atlas is a single cleared texel, so the
    /// geometry pass can keep its bindings.
    fn build(
        device: &dyn GraphicsDevice,
        owned: &mut OwnedSet,
        settings: &ShadowSettings,
    ) -> Result<Self, RenderError> {
        let (resolution, layers) = if settings.enabled {
            (settings.resolution, settings.cascade_count.max(1))
        } else {
            (1, 1)
        };
        let texture = owned.texture(
            device,
            &TextureDescriptor {
                label: Some(Cow::Borrowed("Shadow Atlas")),
                size: Extent3D {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                format: SHADOW_FORMAT,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            },
        )?;
        let array_view = owned.view(
            device,
            texture,
            &TextureViewDescriptor {
                label: Some(Cow::Borrowed("Shadow Atlas View")),
                dimension: Some(TextureViewDimension::D2Array),
                ..Default::default()
            },
        )?;
        let layer_views = (0..layers)
            .map(|layer| {
                owned.view(
                    device,
                    texture,
                    &TextureViewDescriptor {
                        label: Some(Cow::Owned(format!("Shadow Cascade {layer}"))),
                        dimension: Some(TextureViewDimension::D2),
                        base_array_layer: layer,
                        array_layer_count: Some(1),
                        ..Default::default()
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            owned: std::mem::take(owned),
            texture,
            array_view,
            layer_views,
        })
    }
}

/// Owns the render targets every pass reads and writes.
#[derive(Debug)]
pub struct ResourceLifecycle {
    config: RendererConfig,
    shared: OwnedSet,
    comparison_sampler: Option<SamplerId>,
    atlas: Option<ShadowAtlas>,
    targets: Option<FrameTargets>,
    generation: u64,
}

impl ResourceLifecycle {
    /// Creates an empty lifecycle. Nothing is allocated before
    /// [`initialize`](Self::initialize).
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            config: *config,
            shared: OwnedSet::default(),
            comparison_sampler: None,
            atlas: None,
            targets: None,
            generation: 0,
        }
    }

    /// Creates the shared sampler and the shadow atlas.
    pub fn initialize(&mut self, device: &dyn GraphicsDevice) -> Result<(), RenderError> {
        let sampler = self.shared.sampler(
            device,
            &SamplerDescriptor {
                label: Some(Cow::Borrowed("Shadow Comparison Sampler")),
                address_mode: AddressMode::ClampToEdge,
                mag_filter: FilterMode::Linear,
                min_filter: FilterMode::Linear,
                compare: Some(CompareFunction::LessEqual),
            },
        )?;
        self.comparison_sampler = Some(sampler);
        self.atlas = Some(ShadowAtlas::create(device, &self.config.shadows)?);
        Ok(())
    }

    /// Shadow settings the atlas was built for.
    pub fn shadow_settings(&self) -> &ShadowSettings {
        &self.config.shadows
    }

    /// Tile configuration the light buffers are sized for.
    pub fn light_culling(&self) -> &LightCullingConfig {
        &self.config.light_culling
    }

    /// Size of the current frame targets, or an empty extent before the first
    /// `recreate`.
    pub fn extent(&self) -> Extent2D {
        self.targets
            .as_ref()
            .map_or(Extent2D::default(), |targets| targets.extent)
    }

    /// Incremented every time a resource set is replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` once frame targets exist.
    pub fn has_targets(&self) -> bool {
        self.targets.is_some()
    }

    /// Rebuilds the viewport-sized targets for `extent`.
    ///
    /// Returns `Ok(false)` without touching anything when `extent` is empty or
    /// equal to the current size. Otherwise every in-flight submission is
    /// waited on, the new set is built and the old one destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::AllocationFailed`] if a target cannot be
    /// created. The previous targets stay valid in that case.
    pub fn recreate(
        &mut self,
        device: &dyn GraphicsDevice,
        extent: Extent2D,
        sync: &mut FrameSync,
    ) -> Result<bool, RenderError> {
        if extent.is_empty() || self.targets.as_ref().is_some_and(|t| t.extent == extent) {
            return Ok(false);
        }
        sync.wait_all(device)?;

        let targets = FrameTargets::create(device, &self.config, extent)?;
        if let Some(mut old) = self.targets.replace(targets) {
            old.owned.destroy(device, "ResourceLifecycle");
        }
        self.generation += 1;
        log::info!(
            "ResourceLifecycle: frame targets rebuilt at {}x{} (generation {})",
            extent.width,
            extent.height,
            self.generation
        );
        Ok(true)
    }

    /// Applies new shadow settings, rebuilding the atlas only if its size or
    /// layer count changes. Returns `true` if the atlas was rebuilt.
    pub fn set_shadow_settings(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: ShadowSettings,
        sync: &mut FrameSync,
    ) -> Result<bool, RenderError> {
        let rebuild = self.atlas.is_none() || self.config.shadows.atlas_differs(&settings);
        if !rebuild {
            self.config.shadows = settings;
            return Ok(false);
        }
        sync.wait_all(device)?;

        let atlas = ShadowAtlas::create(device, &settings)?;
        if let Some(mut old) = self.atlas.replace(atlas) {
            old.owned.destroy(device, "ResourceLifecycle");
        }
        self.config.shadows = settings;
        self.generation += 1;
        log::info!(
            "ResourceLifecycle: shadow atlas rebuilt ({} cascades at {}px, enabled: {})",
            settings.cascade_count,
            settings.resolution,
            settings.enabled
        );
        Ok(true)
    }

    /// Publishes every target view the lanes read.
    ///
    /// # Errors
    ///
    /// [`RenderError::NotInitialized`] before `initialize` and the first
    /// non-empty `recreate`.
    pub fn insert_context(&self, ctx: &mut LaneContext) -> Result<(), RenderError> {
        let (Some(targets), Some(atlas), Some(sampler)) =
            (&self.targets, &self.atlas, self.comparison_sampler)
        else {
            return Err(RenderError::NotInitialized);
        };
        ctx.insert(DepthTarget(targets.depth.view));
        ctx.insert(HdrTarget(targets.hdr.view));
        ctx.insert(BloomChain {
            texture: targets.bloom,
            views: targets.bloom_views.clone(),
        });
        ctx.insert(CompositeTarget(targets.composite.view));
        ctx.insert(LightGridBuffers {
            grid: targets.light_grid,
            indices: targets.light_indices,
        });
        ctx.insert(ShadowAtlasView(atlas.array_view));
        ctx.insert(ShadowLayerViews(atlas.layer_views.clone()));
        ctx.insert(ShadowComparisonSampler(sampler));
        Ok(())
    }

    /// The GPU objects behind a logical frame resource, for barriers.
    pub fn barrier_targets(&self, resource: FrameResource) -> Vec<BarrierTarget> {
        if resource == FrameResource::ShadowAtlas {
            return self
                .atlas
                .iter()
                .map(|atlas| BarrierTarget::Texture(atlas.texture))
                .collect();
        }
        let Some(targets) = &self.targets else {
            return Vec::new();
        };
        match resource {
            FrameResource::Depth => vec![BarrierTarget::Texture(targets.depth.texture)],
            FrameResource::LightGrid => vec![
                BarrierTarget::Buffer(targets.light_grid),
                BarrierTarget::Buffer(targets.light_indices),
            ],
            FrameResource::Hdr => vec![BarrierTarget::Texture(targets.hdr.texture)],
            FrameResource::Bloom => vec![BarrierTarget::Texture(targets.bloom)],
            FrameResource::Composite => vec![BarrierTarget::Texture(targets.composite.texture)],
            FrameResource::ShadowAtlas => Vec::new(),
        }
    }

    /// The final colour target, readable once the frame's submission completes.
    pub fn composite_view(&self) -> Option<TextureViewId> {
        self.targets.as_ref().map(|targets| targets.composite.view)
    }

    /// Format of the composite target.
    pub fn output_format(&self) -> TextureFormat {
        self.config.output_format
    }

    /// Number of live GPU objects owned by the lifecycle.
    pub fn live_resource_count(&self) -> usize {
        self.shared.len()
            + self.atlas.as_ref().map_or(0, |atlas| atlas.owned.len())
            + self.targets.as_ref().map_or(0, |targets| targets.owned.len())
    }

    /// Destroys every owned resource. The caller waits for the GPU first.
    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        if let Some(mut targets) = self.targets.take() {
            targets.owned.destroy(device, "ResourceLifecycle");
        }
        if let Some(mut atlas) = self.atlas.take() {
            atlas.owned.destroy(device, "ResourceLifecycle");
        }
        self.shared.destroy(device, "ResourceLifecycle");
        self.comparison_sampler = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_mip_count_is_clamped_to_chain_length() {
        assert_eq!(bloom_mip_count(Extent2D::new(640, 360), 6), 6);
        // 4x2 halves to 2x1 and 1x1.
        assert_eq!(bloom_mip_count(Extent2D::new(4, 2), 6), 3);
        assert_eq!(bloom_mip_count(Extent2D::new(1, 1), 6), 1);
        assert_eq!(bloom_mip_count(Extent2D::new(640, 360), 0), 1);
    }

    #[test]
    fn test_lifecycle_starts_empty() {
        let lifecycle = ResourceLifecycle::new(&RendererConfig::default());
        assert_eq!(lifecycle.live_resource_count(), 0);
        assert!(lifecycle.extent().is_empty());
        assert!(lifecycle.composite_view().is_none());
        assert!(lifecycle.barrier_targets(FrameResource::Hdr).is_empty());

        let mut ctx = LaneContext::new();
        assert!(matches!(
            lifecycle.insert_context(&mut ctx),
            Err(RenderError::NotInitialized)
        ));
    }
}
