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

//! Defines data structures used for recording and describing GPU commands.

use crate::math::LinearRgba;
use crate::renderer::api::{BufferId, TextureId, TextureViewId};

/// An opaque handle to a recorded command buffer that is ready for submission.
///
/// This ID is returned by [`CommandEncoder::finish`](crate::renderer::CommandEncoder::finish)
/// and consumed by [`GraphicsDevice::submit_command_buffer`](crate::renderer::GraphicsDevice::submit_command_buffer).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommandBufferId(pub u64);

/// A monotonically increasing index identifying one queue submission.
///
/// Waiting on a submission index blocks until the GPU has finished every
/// command buffer submitted up to and including it. This is the fence the
/// frames-in-flight arena waits on before reusing a slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionIndex(pub u64);

/// Describes the operation to perform on an attachment at the start of a render pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LoadOp<V> {
    /// The existing contents of the attachment will be loaded into the pass.
    Load,
    /// The attachment will be cleared to the specified value before the pass begins.
    Clear(V),
}

/// Describes the operation to perform on an attachment at the end of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    /// The results of the render pass will be stored to the attachment's memory.
    Store,
    /// The results will be discarded, leaving the attachment's memory undefined.
    Discard,
}

/// Defines the load and store operations for a single render pass attachment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Operations<V> {
    /// The operation to perform at the beginning of the pass.
    pub load: LoadOp<V>,
    /// The operation to perform at the end of the pass.
    pub store: StoreOp,
}

/// A colour attachment of a render pass.
#[derive(Clone, Copy, Debug)]
pub struct RenderPassColorAttachment {
    /// The view that will be rendered to.
    pub view: TextureViewId,
    /// The load and store operations for this attachment.
    pub ops: Operations<LinearRgba>,
}

/// A depth attachment of a render pass.
///
/// If `depth_ops` is `None` the attachment is bound read-only: depth testing
/// still happens but nothing is written.
#[derive(Clone, Copy, Debug)]
pub struct RenderPassDepthStencilAttachment {
    /// The depth view.
    pub view: TextureViewId,
    /// The load and store operations for the depth aspect.
    pub depth_ops: Option<Operations<f32>>,
}

/// A descriptor for a render pass.
#[derive(Debug, Default)]
pub struct RenderPassDescriptor<'a> {
    /// An optional debug label for the render pass.
    pub label: Option<&'a str>,
    /// Colour attachments of the pass.
    pub color_attachments: &'a [RenderPassColorAttachment],
    /// An optional depth attachment for this pass.
    pub depth_stencil_attachment: Option<RenderPassDepthStencilAttachment>,
}

/// A descriptor for a compute pass.
#[derive(Debug, Default)]
pub struct ComputePassDescriptor<'a> {
    /// An optional debug label for the compute pass.
    pub label: Option<&'a str>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Barriers
// ─────────────────────────────────────────────────────────────────────────────

/// The way a pass accesses a resource.
///
/// A barrier moves a resource from one state to the next and makes the
/// writes of the previous state visible to the reads of the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents are undefined; nothing has been written this frame.
    #[default]
    Undefined,
    /// Written as a colour attachment.
    ColorTarget,
    /// Written as a depth attachment.
    DepthWrite,
    /// Bound as a read-only depth attachment.
    DepthRead,
    /// Sampled from a shader.
    ShaderRead,
    /// Written from a compute shader.
    StorageWrite,
    /// Read from a shader as a storage buffer.
    StorageRead,
}

impl ResourceState {
    /// Returns `true` if the state writes to the resource.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            ResourceState::ColorTarget | ResourceState::DepthWrite | ResourceState::StorageWrite
        )
    }
}

/// The GPU object a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierTarget {
    /// All subresources of a texture.
    Texture(TextureId),
    /// A single mip level of a texture.
    TextureMip {
        /// The texture.
        texture: TextureId,
        /// The transitioned level.
        mip: u32,
    },
    /// A whole buffer.
    Buffer(BufferId),
}

/// A single state transition recorded into a command encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBarrier {
    /// The transitioned object.
    pub target: BarrierTarget,
    /// The state the previous pass left it in.
    pub before: ResourceState,
    /// The state the next pass needs.
    pub after: ResourceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_op_variants() {
        let clear_color: LoadOp<LinearRgba> = LoadOp::Clear(LinearRgba::new(0.1, 0.1, 0.1, 1.0));
        assert!(matches!(clear_color, LoadOp::Clear(_)));

        let clear_depth: LoadOp<f32> = LoadOp::Clear(1.0);
        assert!(matches!(clear_depth, LoadOp::Clear(v) if (v - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn test_read_only_depth_attachment() {
        let attachment = RenderPassDepthStencilAttachment {
            view: TextureViewId(7),
            depth_ops: None,
        };
        assert_eq!(attachment.view, TextureViewId(7));
        assert!(attachment.depth_ops.is_none());
    }

    #[test]
    fn test_write_states() {
        assert!(ResourceState::DepthWrite.is_write());
        assert!(ResourceState::StorageWrite.is_write());
        assert!(!ResourceState::ShaderRead.is_write());
        assert!(!ResourceState::DepthRead.is_write());
    }

    #[test]
    fn test_mip_barrier_is_distinct_from_whole_texture() {
        let whole = BarrierTarget::Texture(TextureId(4));
        let mip = BarrierTarget::TextureMip {
            texture: TextureId(4),
            mip: 2,
        };
        assert_ne!(whole, mip);
        assert_ne!(
            mip,
            BarrierTarget::TextureMip {
                texture: TextureId(4),
                mip: 1,
            }
        );
    }

    #[test]
    fn test_submission_indices_are_ordered() {
        assert!(SubmissionIndex(3) > SubmissionIndex(2));
    }
}
