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

//! Context key types for [`LaneContext`](super::LaneContext).
//!
//! These newtypes are inserted into a `LaneContext` by the renderer and
//! extracted by lanes. Placing them in `saturn-core` keeps `saturn-lanes`
//! free of any dependency on `saturn-agents`.
//!
//! | Key                          | Meaning                                          |
//! |------------------------------|--------------------------------------------------|
//! | [`FrameSlot`]                | Frame-in-flight slot of the frame being recorded |
//! | [`ViewportExtent`]           | Current viewport size in pixels                  |
//! | [`CameraView`]               | Camera matrices for the frame                    |
//! | [`ClearColor`]               | HDR clear colour                                 |
//! | [`DepthTarget`]              | Pre-depth buffer view                            |
//! | [`HdrTarget`]                | HDR colour target written by the geometry pass   |
//! | [`BloomChain`]               | Bloom mip views, largest first                   |
//! | [`CompositeTarget`]          | Final LDR colour target                          |
//! | [`LightGridBuffers`]         | Tile grid and light index buffers                |
//! | [`PointLightBuffer`]         | This frame's point lights in a storage buffer    |
//! | [`ShadowAtlasView`]          | Array view over every cascade layer              |
//! | [`ShadowLayerViews`]         | One render view per cascade layer                |
//! | [`ShadowComparisonSampler`]  | PCF comparison sampler for shadow sampling       |
//! | [`CascadeIndex`]             | Cascade a shadow lane renders this execution     |

use crate::math::{Extent2D, LinearRgba};
use crate::renderer::api::{BufferId, SamplerId, TextureId, TextureViewId};
use crate::renderer::ViewInfo;

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// Frame-in-flight slot (`frame_index % MAX_FRAMES_IN_FLIGHT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot(pub usize);

/// Viewport size for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportExtent(pub Extent2D);

/// Camera matrices for the current frame.
#[derive(Debug, Clone, Copy)]
pub struct CameraView(pub ViewInfo);

/// Clear colour of the HDR target.
#[derive(Debug, Clone, Copy)]
pub struct ClearColor(pub LinearRgba);

// ─────────────────────────────────────────────────────────────────────────────
// Size-dependent targets
// ─────────────────────────────────────────────────────────────────────────────

/// Depth buffer written by the pre-depth pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthTarget(pub TextureViewId);

/// HDR colour target written by the geometry pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdrTarget(pub TextureViewId);

/// Bloom mip chain. `views[0]` is half the viewport size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomChain {
    /// The texture holding every mip, for per-mip barriers.
    pub texture: TextureId,
    /// One view per mip, largest first.
    pub views: Vec<TextureViewId>,
}

/// The final colour target handed back to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeTarget(pub TextureViewId);

/// Buffers produced by light culling and read by the geometry pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightGridBuffers {
    /// `(offset, count)` per tile.
    pub grid: BufferId,
    /// Light indices, `max_lights_per_tile` per tile.
    pub indices: BufferId,
}

/// Storage buffer holding the frame's point lights as `GpuPointLight`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointLightBuffer {
    /// The buffer of the current frame slot.
    pub buffer: BufferId,
    /// Number of lights written this frame.
    pub count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shadows
// ─────────────────────────────────────────────────────────────────────────────

/// Depth-array view over every cascade layer of the shadow atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowAtlasView(pub TextureViewId);

/// One single-layer view per cascade, used as depth attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowLayerViews(pub Vec<TextureViewId>);

/// Comparison sampler for PCF shadow lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowComparisonSampler(pub SamplerId);

/// Cascade rendered by the current shadow lane execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeIndex(pub u32);
