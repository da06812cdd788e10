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

//! # Saturn Agents
//!
//! The orchestration layer of the frame renderer. [`render_agent::SceneRenderer`]
//! is the object an application owns: it collects the scene's draw
//! submissions, drives the pass lanes of `saturn-lanes` in their fixed order
//! and keeps every GPU resource alive exactly as long as the GPU needs it.

pub mod render_agent;

pub use render_agent::*;
