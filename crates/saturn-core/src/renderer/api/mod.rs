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

//! Backend-agnostic handles and descriptors of the graphics wrapper.
//!
//! Every GPU object is referenced through a plain `Copy` ID newtype. The IDs
//! are only meaningful to the [`GraphicsDevice`](crate::renderer::GraphicsDevice)
//! that created them.

pub mod bind_group;
pub mod buffer;
pub mod command;
pub mod pipeline;
pub mod scene;
pub mod shader;
pub mod texture;
pub mod uniform_ring_buffer;

pub use bind_group::*;
pub use buffer::*;
pub use command::*;
pub use pipeline::*;
pub use scene::*;
pub use shader::*;
pub use texture::*;
pub use uniform_ring_buffer::*;

/// Number of frames the CPU may record ahead of the GPU.
///
/// Every per-frame writable resource (transform buffers, light lists,
/// uniforms) exists once per frame in flight and is indexed by
/// `frame_index % MAX_FRAMES_IN_FLIGHT`.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
