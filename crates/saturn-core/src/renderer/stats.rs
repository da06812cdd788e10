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

//! Performance statistics for the frame renderer.

/// Statistics for the most recently rendered frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    /// A sequential counter for submitted frames.
    pub frame_number: u64,
    /// CPU time spent flushing draw lists and uploading per-frame data.
    pub cpu_preparation_time_ms: f32,
    /// CPU time spent recording and submitting the pass sequence.
    pub cpu_render_submission_time_ms: f32,
    /// Instanced draw calls recorded by the geometry pass.
    pub draw_calls: u32,
    /// Instances covered by those draw calls.
    pub instances: u32,
    /// Triangles submitted by the geometry pass.
    pub triangles_rendered: u64,
    /// Passes whose contribution was skipped because they failed.
    pub skipped_passes: u32,
}
