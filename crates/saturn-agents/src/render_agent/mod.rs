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

//! Acts as the **[A]gent** for the frame renderer.
//!
//! This module holds the tactical side of rendering: it decides *when* each
//! pass runs and *which* resources it sees, and delegates the command
//! recording itself to the lanes.
//!
//! - [`FrameSync`] recycles the frame-in-flight slots behind a submission wait.
//! - [`ResourceLifecycle`] owns the size- and shadow-dependent targets and
//!   rebuilds them on resize.
//! - [`PassSequencer`] walks the fixed pass order and places the barriers.
//! - [`SceneRenderer`] ties the three together behind the scene-facing API.

mod frame_sync;
mod pass_sequencer;
mod resource_lifecycle;
mod scene_renderer;

pub use frame_sync::*;
pub use pass_sequencer::*;
pub use resource_lifecycle::*;
pub use scene_renderer::*;
