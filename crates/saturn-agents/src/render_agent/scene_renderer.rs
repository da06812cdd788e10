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

//! Defines the SceneRenderer, the application-facing owner of the frame renderer.

use super::{FrameReport, FrameSync, PassLanes, PassSequencer, ResourceLifecycle};
use saturn_core::config::ShadowSettings;
use saturn_core::lane::{
    CameraView, ClearColor, FrameSlot, LaneContext, Ref, Slot, ViewportExtent,
};
use saturn_core::math::{Extent2D, Mat4};
use saturn_core::renderer::api::{
    BindGroupLayoutId, EntityId, MaterialHandle, MeshHandle, RenderAssets, TextureViewId,
};
use saturn_core::renderer::error::RenderError;
use saturn_core::renderer::traits::{CommandEncoder, GraphicsDevice};
use saturn_core::renderer::{Lights, RenderStats, SceneCamera, ViewInfo};
use saturn_core::RendererConfig;
use saturn_lanes::{
    build_cascades, CascadeParams, DrawCommand, DrawTally, DynamicSky, FrameCascades,
    FrameResource, InstanceBatcher, PointLightStorage, PreethamSky, SkyParameters,
};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The frame renderer.
///
/// A `SceneRenderer` is created once by the application and driven once per
/// frame:
///
/// 1. [`begin_frame`](Self::begin_frame) claims a frame-in-flight slot and
///    applies a pending resize;
/// 2. the scene layer submits meshes, lights and the camera;
/// 3. [`render_scene`](Self::render_scene) batches the submissions, records
///    every pass and submits the frame.
///
/// The final image is available through [`composite_image`](Self::composite_image).
pub struct SceneRenderer {
    device: Arc<dyn GraphicsDevice>,
    assets: Arc<RwLock<RenderAssets>>,
    config: RendererConfig,
    lanes: PassLanes,
    sequencer: PassSequencer,
    lifecycle: ResourceLifecycle,
    sync: FrameSync,
    batcher: InstanceBatcher,
    point_lights: PointLightStorage,
    // --- Scene input ---
    camera: SceneCamera,
    view_matrix: Mat4,
    lights: Lights,
    sky: Option<PreethamSky>,
    // --- Frame state ---
    viewport: Extent2D,
    pending_viewport: Option<Extent2D>,
    frame_open: bool,
    terminated: bool,
    // --- Diagnostics ---
    stats: RenderStats,
    last_report: FrameReport,
}

impl SceneRenderer {
    /// Creates a renderer with the standard pass lanes.
    ///
    /// # Errors
    ///
    /// [`RenderError::InitializationFailed`] if `config` is invalid or a lane
    /// cannot create its pipelines; [`RenderError::AllocationFailed`] if the
    /// shadow atlas cannot be allocated. Nothing is leaked on failure.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        assets: Arc<RwLock<RenderAssets>>,
        config: RendererConfig,
    ) -> Result<Self, RenderError> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(format!("{e:#}")))?;
        let lanes = PassLanes::standard(&config);
        Self::with_lanes(device, assets, config, lanes)
    }

    /// Creates a renderer around caller-provided lanes.
    pub fn with_lanes(
        device: Arc<dyn GraphicsDevice>,
        assets: Arc<RwLock<RenderAssets>>,
        config: RendererConfig,
        lanes: PassLanes,
    ) -> Result<Self, RenderError> {
        let mut renderer = Self {
            device,
            assets,
            config,
            lanes,
            sequencer: PassSequencer::new(),
            lifecycle: ResourceLifecycle::new(&config),
            sync: FrameSync::new(),
            batcher: InstanceBatcher::new(),
            point_lights: PointLightStorage::new(),
            camera: SceneCamera::default(),
            view_matrix: Mat4::IDENTITY,
            lights: Lights::default(),
            sky: None,
            viewport: Extent2D::default(),
            pending_viewport: None,
            frame_open: false,
            terminated: false,
            stats: RenderStats::default(),
            last_report: FrameReport::default(),
        };
        if let Err(e) = renderer.initialize() {
            log::error!("SceneRenderer: initialization failed: {}", e);
            renderer.terminate();
            return Err(e);
        }
        Ok(renderer)
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        self.lifecycle.initialize(self.device.as_ref())?;
        let mut ctx = self.device_context();
        for lane in self.lanes.iter() {
            lane.on_initialize(&mut ctx).map_err(|e| {
                RenderError::InitializationFailed(format!("{}: {}", lane.strategy_name(), e))
            })?;
            log::debug!(
                "SceneRenderer: initialized {} lane {}",
                lane.lane_kind(),
                lane.strategy_name()
            );
        }
        log::info!(
            "SceneRenderer: initialized ({} cascades, bloom: {})",
            self.config.shadows.cascade_count,
            self.config.bloom.enabled
        );
        Ok(())
    }

    fn device_context(&self) -> LaneContext {
        let mut ctx = LaneContext::new();
        ctx.insert::<Arc<dyn GraphicsDevice>>(self.device.clone());
        ctx
    }

    // --- Frame lifecycle ---

    /// Opens a frame: waits until the GPU is done with the slot this frame
    /// reuses, applies a pending resize and starts accepting submissions.
    ///
    /// [`render_scene`](Self::render_scene) calls it implicitly when no frame
    /// is open.
    pub fn begin_frame(&mut self) -> Result<(), RenderError> {
        if self.terminated {
            return Err(RenderError::NotInitialized);
        }
        let slot = self.sync.begin_frame(self.device.as_ref())?;
        self.apply_pending_resize()?;
        self.batcher.begin_frame(slot);
        self.frame_open = true;
        Ok(())
    }

    /// Records and submits the frame.
    ///
    /// A zero-area viewport makes this a no-op that submits nothing.
    ///
    /// # Errors
    ///
    /// Allocation failures while flushing the draw list or uploading lights
    /// are returned and the frame is dropped. Failures inside a pass are not
    /// errors: the pass is skipped and reported in
    /// [`last_frame_report`](Self::last_frame_report).
    pub fn render_scene(&mut self) -> Result<(), RenderError> {
        if !self.frame_open {
            self.begin_frame()?;
        }
        let preparation_start = Instant::now();
        let slot = self.sync.current_slot();

        if self.viewport.is_empty() || !self.lifecycle.has_targets() {
            log::trace!("SceneRenderer: empty viewport, frame skipped");
            self.abandon_frame();
            return Ok(());
        }

        if let Err(e) = self.flush_draw_list() {
            self.abandon_frame();
            return Err(e);
        }
        let view = ViewInfo::new(&self.camera, self.view_matrix);
        let cascades = self.frame_cascades(&view);
        let point_lights =
            match self
                .point_lights
                .upload(self.device.as_ref(), slot, &self.lights.point)
            {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.abandon_frame();
                    return Err(e);
                }
            };
        let preparation_time = preparation_start.elapsed();

        let recording_start = Instant::now();
        let cascade_count = if self.lifecycle.shadow_settings().enabled {
            self.lifecycle.shadow_settings().cascade_count
        } else {
            0
        };
        let mut encoder = self.device.create_command_encoder(Some("Scene Frame"));
        let (mut report, tally) = {
            let mut ctx = self.device_context();
            if let Err(e) = self.lifecycle.insert_context(&mut ctx) {
                drop(ctx);
                self.abandon_frame();
                return Err(e);
            }
            ctx.insert(FrameSlot(slot));
            ctx.insert(ViewportExtent(self.viewport));
            ctx.insert(CameraView(view));
            ctx.insert(ClearColor(self.config.clear_color));
            ctx.insert(self.assets.clone());
            ctx.insert(Ref::new(&self.batcher));
            ctx.insert(Ref::new(&self.lights));
            ctx.insert(cascades);
            ctx.insert(DynamicSky(self.sky));
            ctx.insert(point_lights);
            ctx.insert(Slot::new(encoder.as_mut()));

            let report = self
                .sequencer
                .run(&self.lanes, &mut ctx, &self.lifecycle, cascade_count);
            let tally = ctx.get::<DrawTally>().copied().unwrap_or_default();
            (report, tally)
        };

        let submission = self.device.submit_command_buffer(encoder.finish());
        self.batcher.mark_submitted(submission);
        self.point_lights.mark_submitted(slot, submission);
        report.frame_index = self.sync.frame_index();
        self.sync.end_frame(Some(submission));
        self.frame_open = false;

        self.stats = RenderStats {
            frame_number: self.stats.frame_number + 1,
            cpu_preparation_time_ms: preparation_time.as_secs_f32() * 1000.0,
            cpu_render_submission_time_ms: recording_start.elapsed().as_secs_f32() * 1000.0,
            draw_calls: tally.draw_calls,
            instances: tally.instances,
            triangles_rendered: tally.triangles,
            skipped_passes: report.skipped.len() as u32,
        };
        self.last_report = report;
        log::trace!(
            "SceneRenderer: frame {} submitted as {:?}",
            self.stats.frame_number,
            submission
        );
        Ok(())
    }

    /// Closes the open frame without submitting anything.
    fn abandon_frame(&mut self) {
        self.batcher.discard();
        self.sync.end_frame(None);
        self.frame_open = false;
    }

    fn frame_cascades(&self, view: &ViewInfo) -> FrameCascades {
        let settings = self.lifecycle.shadow_settings();
        if !settings.enabled {
            return FrameCascades::default();
        }
        let Some(light) = self.lights.dominant_directional() else {
            return FrameCascades::default();
        };
        match build_cascades(view, light.direction, &CascadeParams::from(settings)) {
            Ok(cascades) => FrameCascades(cascades),
            Err(e) => {
                log::warn!("SceneRenderer: shadows skipped this frame: {}", e);
                FrameCascades::default()
            }
        }
    }

    // --- Scene input ---

    /// Queues one submesh of `mesh` for this frame.
    ///
    /// Returns `false`, and drops the submission, outside
    /// `begin_frame`..`render_scene`.
    pub fn submit_static_mesh(
        &mut self,
        entity: EntityId,
        mesh: MeshHandle,
        material: MaterialHandle,
        transform: Mat4,
        submesh: u32,
    ) -> bool {
        self.batcher.submit(DrawCommand {
            entity,
            mesh,
            material,
            transform,
            submesh,
        })
    }

    /// Queues a selected submesh. It is drawn like a static mesh, then outlined.
    pub fn submit_selected_mesh(
        &mut self,
        entity: EntityId,
        mesh: MeshHandle,
        material: MaterialHandle,
        transform: Mat4,
        submesh: u32,
    ) -> bool {
        self.batcher.submit_selected(DrawCommand {
            entity,
            mesh,
            material,
            transform,
            submesh,
        })
    }

    /// Sets the camera used from the next `render_scene` on.
    pub fn set_camera(&mut self, camera: SceneCamera, view_matrix: Mat4) {
        self.camera = camera;
        self.view_matrix = view_matrix;
    }

    /// Replaces the frame's lights.
    pub fn set_lights(&mut self, lights: Lights) {
        self.lights = lights;
    }

    /// Enables the analytic sky with the given sun position. Angles are in
    /// radians.
    pub fn set_dynamic_sky(&mut self, turbidity: f32, azimuth: f32, inclination: f32) {
        self.sky = Some(PreethamSky::new(SkyParameters {
            turbidity,
            azimuth,
            inclination,
        }));
    }

    /// Disables the analytic sky; the frame clears to the configured colour.
    pub fn clear_dynamic_sky(&mut self) {
        self.sky = None;
    }

    /// Applies new shadow settings. The atlas is rebuilt only if its size,
    /// layer count or enabled state changes.
    pub fn set_shadow_settings(&mut self, settings: ShadowSettings) -> Result<(), RenderError> {
        RendererConfig {
            shadows: settings,
            ..self.config
        }
        .validate()
        .map_err(|e| RenderError::Internal(format!("{e:#}")))?;

        let rebuilt =
            self.lifecycle
                .set_shadow_settings(self.device.as_ref(), settings, &mut self.sync)?;
        self.config.shadows = settings;
        if rebuilt {
            self.sequencer.invalidate(FrameResource::ShadowAtlas);
            self.notify_resize();
        }
        Ok(())
    }

    /// Groups and uploads the submissions of the open frame. Called by
    /// `render_scene`; calling it earlier only moves the work.
    pub fn flush_draw_list(&mut self) -> Result<(), RenderError> {
        if !self.batcher.is_recording() {
            return Ok(());
        }
        debug_assert!(
            !self.sync.is_slot_in_flight(self.sync.current_slot()),
            "flushing into a slot the GPU may still read"
        );
        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        let result = self.batcher.flush(self.device.as_ref(), &assets);
        drop(assets);
        if result.is_err() {
            self.batcher.discard();
        }
        result
    }

    // --- Viewport ---

    /// Requests a new viewport size. The targets are rebuilt at the next
    /// `begin_frame`, once the frames using the old ones have completed.
    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        let extent = Extent2D::new(width, height);
        if self.pending_viewport.is_none() && extent == self.viewport {
            return;
        }
        log::debug!("SceneRenderer: viewport resize to {}x{} requested", width, height);
        self.pending_viewport = Some(extent);
    }

    /// Applies a pending resize now instead of at the next `begin_frame`.
    ///
    /// Inside an open frame the resize stays deferred.
    pub fn recreate(&mut self) -> Result<(), RenderError> {
        if self.frame_open {
            log::debug!("SceneRenderer: recreate inside an open frame deferred to begin_frame");
            return Ok(());
        }
        self.apply_pending_resize()
    }

    fn apply_pending_resize(&mut self) -> Result<(), RenderError> {
        let Some(extent) = self.pending_viewport.take() else {
            return Ok(());
        };
        match self
            .lifecycle
            .recreate(self.device.as_ref(), extent, &mut self.sync)
        {
            Ok(rebuilt) => {
                self.viewport = extent;
                if rebuilt {
                    self.sequencer.reset_states();
                    self.notify_resize();
                }
                Ok(())
            }
            Err(e) => {
                self.pending_viewport = Some(extent);
                Err(e)
            }
        }
    }

    fn notify_resize(&self) {
        let mut ctx = self.device_context();
        for lane in self.lanes.iter() {
            if let Err(e) = lane.on_resize(&mut ctx) {
                log::warn!("SceneRenderer: {} failed to resize: {}", lane.strategy_name(), e);
            }
        }
    }

    /// Current viewport size.
    pub fn viewport_size(&self) -> Extent2D {
        self.viewport
    }

    // --- Outputs ---

    /// The final colour target. It holds the last submitted frame once that
    /// submission completes.
    pub fn composite_image(&self) -> Option<TextureViewId> {
        self.lifecycle.composite_view()
    }

    /// Layout materials must be created against.
    pub fn material_bind_group_layout(&self) -> Option<BindGroupLayoutId> {
        self.lanes.material_layout()
    }

    /// Statistics of the last submitted frame.
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Pass-level report of the last submitted frame.
    pub fn last_frame_report(&self) -> &FrameReport {
        &self.last_report
    }

    /// The render targets and their state.
    pub fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }

    /// Diagnostic overlay hook. Logs the last frame's summary.
    pub fn imgui_render(&self) {
        log::debug!(
            "SceneRenderer: frame {} | {} draws | {} instances | {} tris | {} skipped | prep {:.2}ms | record {:.2}ms",
            self.stats.frame_number,
            self.stats.draw_calls,
            self.stats.instances,
            self.stats.triangles_rendered,
            self.stats.skipped_passes,
            self.stats.cpu_preparation_time_ms,
            self.stats.cpu_render_submission_time_ms
        );
    }

    // --- Shutdown ---

    /// Waits for the GPU and destroys every owned resource. Also run on drop.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if self.frame_open {
            self.abandon_frame();
        }
        if let Err(e) = self.sync.wait_all(self.device.as_ref()) {
            log::warn!("SceneRenderer: wait before shutdown failed: {}", e);
        }
        let mut ctx = self.device_context();
        for lane in self.lanes.iter() {
            lane.on_shutdown(&mut ctx);
        }
        let device = self.device.as_ref();
        self.batcher.destroy(device);
        self.point_lights.destroy(device);
        self.lifecycle.destroy(device);
        log::info!("SceneRenderer: terminated after {} frames", self.stats.frame_number);
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for SceneRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneRenderer")
            .field("lanes", &self.lanes)
            .field("viewport", &self.viewport)
            .field("frame_open", &self.frame_open)
            .field("frame_index", &self.sync.frame_index())
            .finish()
    }
}
