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

//! The fixed pass order of a frame.
//!
//! ```text
//! Idle -> PreDepth -> LightCulling -> ShadowCascade(0..N) -> Geometry -> Bloom -> Composite -> Idle
//! ```
//!
//! Before each pass the sequencer compares the pass's declared resource
//! accesses with the state each resource was left in and records a barrier for
//! every resource whose state changes. A pass that fails is logged and skipped;
//! the walk always continues to Composite.

use super::ResourceLifecycle;
use saturn_core::config::MAX_SHADOW_CASCADES;
use saturn_core::lane::{CascadeIndex, LaneContext, Slot};
use saturn_core::renderer::api::{BindGroupLayoutId, ResourceBarrier, ResourceState};
use saturn_core::renderer::traits::CommandEncoder;
use saturn_core::RendererConfig;
use saturn_lanes::{
    BloomLane, CompositeLane, FrameResource, GeometryLane, LightCullingLane, PreDepthLane,
    RenderPassLane, ResourceAccess, ShadowCascadeLane,
};
use std::fmt;

/// A state of the per-frame pass machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    /// Depth-only pass over every batch.
    PreDepth,
    /// Tiled point light culling.
    LightCulling,
    /// Shadow caster rendering into one cascade layer.
    ShadowCascade(u32),
    /// Lit HDR rendering.
    Geometry,
    /// Bloom mip chain.
    Bloom,
    /// Tone mapping into the output target.
    Composite,
    /// Between frames.
    Idle,
}

impl PassState {
    /// The state following `self` in a frame with `cascade_count` cascades.
    pub fn next(self, cascade_count: u32) -> PassState {
        match self {
            PassState::Idle => PassState::PreDepth,
            PassState::PreDepth => PassState::LightCulling,
            PassState::LightCulling if cascade_count > 0 => PassState::ShadowCascade(0),
            PassState::LightCulling => PassState::Geometry,
            PassState::ShadowCascade(i) if i + 1 < cascade_count => PassState::ShadowCascade(i + 1),
            PassState::ShadowCascade(_) => PassState::Geometry,
            PassState::Geometry => PassState::Bloom,
            PassState::Bloom => PassState::Composite,
            PassState::Composite => PassState::Idle,
        }
    }

    /// The full walk of one frame, from `PreDepth` back to `Idle`.
    pub fn sequence(cascade_count: u32) -> Vec<PassState> {
        let mut states = vec![PassState::PreDepth];
        let mut state = PassState::PreDepth;
        while state != PassState::Idle {
            state = state.next(cascade_count);
            states.push(state);
        }
        states
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassState::PreDepth => write!(f, "PreDepth"),
            PassState::LightCulling => write!(f, "LightCulling"),
            PassState::ShadowCascade(i) => write!(f, "ShadowCascade({i})"),
            PassState::Geometry => write!(f, "Geometry"),
            PassState::Bloom => write!(f, "Bloom"),
            PassState::Composite => write!(f, "Composite"),
            PassState::Idle => write!(f, "Idle"),
        }
    }
}

/// The lane that records each pass.
pub struct PassLanes {
    /// Records [`PassState::PreDepth`].
    pub pre_depth: Box<dyn RenderPassLane>,
    /// Records [`PassState::LightCulling`].
    pub light_culling: Box<dyn RenderPassLane>,
    /// Records every [`PassState::ShadowCascade`].
    pub shadow: Box<dyn RenderPassLane>,
    /// Records [`PassState::Geometry`].
    pub geometry: Box<dyn RenderPassLane>,
    /// Records [`PassState::Bloom`].
    pub bloom: Box<dyn RenderPassLane>,
    /// Records [`PassState::Composite`].
    pub composite: Box<dyn RenderPassLane>,
}

impl PassLanes {
    /// The standard lanes, configured from `config`.
    pub fn standard(config: &RendererConfig) -> Self {
        Self {
            pre_depth: Box::new(PreDepthLane::new()),
            light_culling: Box::new(LightCullingLane::new(config.light_culling)),
            shadow: Box::new(ShadowCascadeLane::new()),
            geometry: Box::new(
                GeometryLane::new(config.hdr_format, config.light_culling).with_grid(config.grid),
            ),
            bloom: Box::new(BloomLane::new(config.bloom, config.hdr_format)),
            composite: Box::new(CompositeLane::new(config.bloom, config.output_format)),
        }
    }

    /// The lane for `state`, or `None` for [`PassState::Idle`].
    pub fn lane(&self, state: PassState) -> Option<&dyn RenderPassLane> {
        let lane = match state {
            PassState::PreDepth => &self.pre_depth,
            PassState::LightCulling => &self.light_culling,
            PassState::ShadowCascade(_) => &self.shadow,
            PassState::Geometry => &self.geometry,
            PassState::Bloom => &self.bloom,
            PassState::Composite => &self.composite,
            PassState::Idle => return None,
        };
        Some(lane.as_ref())
    }

    /// Every lane, in pass order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn RenderPassLane> + '_ {
        [
            &self.pre_depth,
            &self.light_culling,
            &self.shadow,
            &self.geometry,
            &self.bloom,
            &self.composite,
        ]
        .into_iter()
        .map(|lane| lane.as_ref())
    }

    /// Layout of the material bind group, if the geometry lane is the
    /// standard one and has been initialized.
    pub fn material_layout(&self) -> Option<BindGroupLayoutId> {
        self.geometry
            .as_any()
            .downcast_ref::<GeometryLane>()
            .and_then(GeometryLane::material_layout)
    }
}

impl fmt::Debug for PassLanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|lane| lane.strategy_name()))
            .finish()
    }
}

/// A pass whose contribution was dropped from the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPass {
    /// Where in the sequence it failed.
    pub state: PassState,
    /// Name of the lane that failed.
    pub lane: &'static str,
    /// The lane's error, formatted.
    pub error: String,
}

/// What happened while recording one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Index of the frame this report describes.
    pub frame_index: u64,
    /// Every state entered, in order, ending with [`PassState::Idle`].
    pub visited: Vec<PassState>,
    /// Passes that failed.
    pub skipped: Vec<SkippedPass>,
    /// Number of resource barriers recorded.
    pub barrier_count: usize,
}

impl FrameReport {
    /// Returns `true` if the walk reached Composite and returned to Idle.
    pub fn is_complete(&self) -> bool {
        self.visited.ends_with(&[PassState::Composite, PassState::Idle])
    }
}

/// Drives the pass lanes through a frame.
#[derive(Debug, Default)]
pub struct PassSequencer {
    states: [ResourceState; FrameResource::COUNT],
}

impl PassSequencer {
    /// Creates a sequencer with every resource in [`ResourceState::Undefined`].
    pub fn new() -> Self {
        Self::default()
    }

    /// State `resource` was left in by the last recorded pass.
    pub fn state(&self, resource: FrameResource) -> ResourceState {
        self.states[resource.index()]
    }

    /// Forgets every tracked state, after the targets were rebuilt.
    pub fn reset_states(&mut self) {
        self.states = [ResourceState::Undefined; FrameResource::COUNT];
    }

    /// Forgets the tracked state of one resource.
    pub fn invalidate(&mut self, resource: FrameResource) {
        self.states[resource.index()] = ResourceState::Undefined;
    }

    /// Records one frame.
    ///
    /// `ctx` must hold everything the lanes read, including the frame's
    /// `Slot<dyn CommandEncoder>`. Shadow cascades `0..cascade_count` are
    /// rendered, capped at [`MAX_SHADOW_CASCADES`].
    pub fn run(
        &mut self,
        lanes: &PassLanes,
        ctx: &mut LaneContext,
        lifecycle: &ResourceLifecycle,
        cascade_count: u32,
    ) -> FrameReport {
        let cascade_count = cascade_count.min(MAX_SHADOW_CASCADES);
        let mut report = FrameReport::default();

        let mut state = PassState::PreDepth;
        loop {
            report.visited.push(state);
            let Some(lane) = lanes.lane(state) else {
                break;
            };
            if let PassState::ShadowCascade(index) = state {
                ctx.insert(CascadeIndex(index));
            }

            report.barrier_count += self.transition(ctx, lifecycle, lane.accesses());
            if let Err(e) = lane.execute(ctx) {
                log::error!(
                    "PassSequencer: {} failed during {}, skipping its contribution: {}",
                    lane.strategy_name(),
                    state,
                    e
                );
                report.skipped.push(SkippedPass {
                    state,
                    lane: lane.strategy_name(),
                    error: e.to_string(),
                });
            }

            if state == PassState::Composite {
                // Leave the output readable by whoever consumes the frame.
                report.barrier_count += self.transition(
                    ctx,
                    lifecycle,
                    &[ResourceAccess::new(
                        FrameResource::Composite,
                        ResourceState::ShaderRead,
                    )],
                );
            }
            state = state.next(cascade_count);
        }
        ctx.remove::<CascadeIndex>();

        log::trace!(
            "PassSequencer: {} passes, {} skipped, {} barriers",
            report.visited.len() - 1,
            report.skipped.len(),
            report.barrier_count
        );
        report
    }

    fn transition(
        &mut self,
        ctx: &LaneContext,
        lifecycle: &ResourceLifecycle,
        accesses: &[ResourceAccess],
    ) -> usize {
        let mut barriers = Vec::new();
        for access in accesses {
            let current = &mut self.states[access.resource.index()];
            if *current == access.state {
                continue;
            }
            barriers.extend(
                lifecycle
                    .barrier_targets(access.resource)
                    .into_iter()
                    .map(|target| ResourceBarrier {
                        target,
                        before: *current,
                        after: access.state,
                    }),
            );
            *current = access.state;
        }
        if barriers.is_empty() {
            return 0;
        }
        match ctx.get::<Slot<dyn CommandEncoder>>() {
            Some(encoder) => encoder.get().resource_barrier(&barriers),
            None => log::warn!(
                "PassSequencer: no command encoder in context; {} barriers dropped",
                barriers.len()
            ),
        }
        barriers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_with_cascades() {
        assert_eq!(
            PassState::sequence(2),
            vec![
                PassState::PreDepth,
                PassState::LightCulling,
                PassState::ShadowCascade(0),
                PassState::ShadowCascade(1),
                PassState::Geometry,
                PassState::Bloom,
                PassState::Composite,
                PassState::Idle,
            ]
        );
    }

    #[test]
    fn test_sequence_without_shadows_skips_cascades() {
        let states = PassState::sequence(0);
        assert!(!states
            .iter()
            .any(|state| matches!(state, PassState::ShadowCascade(_))));
        assert_eq!(states.len(), 6);
    }

    #[test]
    fn test_idle_restarts_at_pre_depth() {
        assert_eq!(PassState::Idle.next(4), PassState::PreDepth);
        assert_eq!(PassState::Composite.next(4), PassState::Idle);
    }

    #[test]
    fn test_report_completeness() {
        let report = FrameReport {
            visited: PassState::sequence(1),
            ..Default::default()
        };
        assert!(report.is_complete());
        assert!(!FrameReport::default().is_complete());
    }

    #[test]
    fn test_invalidate_resets_one_resource() {
        let mut sequencer = PassSequencer::new();
        sequencer.states[FrameResource::Hdr.index()] = ResourceState::ColorTarget;
        sequencer.states[FrameResource::Depth.index()] = ResourceState::DepthRead;
        sequencer.invalidate(FrameResource::Hdr);
        assert_eq!(sequencer.state(FrameResource::Hdr), ResourceState::Undefined);
        assert_eq!(sequencer.state(FrameResource::Depth), ResourceState::DepthRead);
    }
}
