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

//! Instance batching: turns per-entity draw submissions into instanced draws.
//!
//! The scene layer submits one [`DrawCommand`] per visible entity. At flush
//! time the [`InstanceBatcher`] groups them by [`StaticMeshKey`], the
//! [`TransformPacker`] lays each group's transforms out contiguously, and one
//! [`InstancedDraw`] is recorded per group. Draw calls therefore scale with the
//! number of distinct (mesh, submesh) pairs, not with the number of entities.
//!
//! Every frame-in-flight slot owns its own [`TransformBuffer`], so packing
//! frame N+1 never touches memory the GPU may still be reading for frame N.

use ahash::AHashMap;
use saturn_core::math::Mat4;
use saturn_core::renderer::api::{
    BufferDescriptor, BufferId, BufferUsage, EntityId, MaterialHandle, MeshHandle, RenderAssets,
    SubmissionIndex, VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode,
    MAX_FRAMES_IN_FLIGHT,
};
use saturn_core::renderer::error::{RenderError, ResourceError};
use saturn_core::renderer::traits::GraphicsDevice;
use std::borrow::Cow;
use std::ops::Range;

/// Smallest transform buffer ever allocated, in instances.
pub const MIN_TRANSFORM_CAPACITY: u32 = 1024;

/// Identity of a (mesh, submesh) pair. Draws with equal keys share one instanced draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaticMeshKey {
    /// The mesh.
    pub mesh: MeshHandle,
    /// Index into the mesh's submesh list.
    pub submesh: u32,
}

/// One entity's draw request for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    /// The entity the draw belongs to.
    pub entity: EntityId,
    /// The mesh to draw.
    pub mesh: MeshHandle,
    /// Material registry entry of the mesh.
    pub material: MaterialHandle,
    /// World transform.
    pub transform: Mat4,
    /// Submesh to draw.
    pub submesh: u32,
}

impl DrawCommand {
    /// The batching key of this draw.
    #[inline]
    pub fn key(&self) -> StaticMeshKey {
        StaticMeshKey {
            mesh: self.mesh,
            submesh: self.submesh,
        }
    }
}

/// The draw commands submitted during one frame, in submission order.
#[derive(Debug, Default)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    /// Appends a command.
    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    /// The commands in submission order.
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drops every command, keeping the allocation.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// A packed instance transform: the first three rows of an affine matrix.
///
/// The fourth row of an affine transform is always `(0, 0, 0, 1)`, so it is
/// not stored. The shader rebuilds the matrix from locations 4, 5 and 6.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceTransform {
    /// Matrix rows 0 to 2.
    pub rows: [[f32; 4]; 3],
}

static INSTANCE_ATTRIBUTES: [VertexAttribute; 3] = [
    VertexAttribute {
        format: VertexFormat::Float32x4,
        offset: 0,
        shader_location: 4,
    },
    VertexAttribute {
        format: VertexFormat::Float32x4,
        offset: 16,
        shader_location: 5,
    },
    VertexAttribute {
        format: VertexFormat::Float32x4,
        offset: 32,
        shader_location: 6,
    },
];

impl InstanceTransform {
    /// Packs an affine world matrix.
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let rows = matrix.transpose();
        Self {
            rows: [
                rows.x_axis.to_array(),
                rows.y_axis.to_array(),
                rows.z_axis.to_array(),
            ],
        }
    }

    /// Rebuilds the affine matrix.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&[self.rows[0], self.rows[1], self.rows[2], [0.0, 0.0, 0.0, 1.0]])
            .transpose()
    }

    /// The per-instance vertex buffer layout, bound at slot 1.
    pub fn layout() -> VertexBufferLayout<'static> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceTransform>() as u64,
            step_mode: VertexStepMode::Instance,
            attributes: Cow::Borrowed(&INSTANCE_ATTRIBUTES[..]),
        }
    }
}

/// One instanced draw produced by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancedDraw {
    /// What to draw.
    pub key: StaticMeshKey,
    /// Material of the group's first submission.
    pub material: MaterialHandle,
    /// First row of the group in the frame's transform buffer.
    pub first_instance: u32,
    /// Number of instances in the group.
    pub instance_count: u32,
}

impl InstancedDraw {
    /// The instance range to pass to `draw_indexed`.
    #[inline]
    pub fn instances(&self) -> Range<u32> {
        self.first_instance..self.first_instance + self.instance_count
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TransformPacker
// ─────────────────────────────────────────────────────────────────────────────

/// Packs groups of world transforms into one contiguous CPU-side array.
///
/// `offset` marks where the next group begins. It only grows within a frame
/// and goes back to zero in [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct TransformPacker {
    staging: Vec<InstanceTransform>,
    offset: u32,
    resets: u64,
}

impl TransformPacker {
    /// Creates an empty packer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new frame.
    pub fn reset(&mut self) {
        self.staging.clear();
        self.offset = 0;
        self.resets += 1;
    }

    /// How many times the offset went back to zero.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Where the next group will start.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Appends a group and returns the row range it occupies.
    pub fn pack<'a>(&mut self, transforms: impl IntoIterator<Item = &'a Mat4>) -> Range<u32> {
        let start = self.offset;
        self.staging
            .extend(transforms.into_iter().map(InstanceTransform::from_matrix));
        self.offset = self.staging.len() as u32;
        start..self.offset
    }

    /// The packed rows.
    pub fn rows(&self) -> &[InstanceTransform] {
        &self.staging
    }

    /// The packed rows as bytes, ready for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.staging)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TransformBuffer
// ─────────────────────────────────────────────────────────────────────────────

/// The GPU side of one frame slot's instance transforms.
///
/// The buffer grows to the next power of two of the required instance count
/// and never shrinks. Growth is atomic: the old buffer is only released once
/// the new one exists.
#[derive(Debug)]
pub struct TransformBuffer {
    buffer: Option<BufferId>,
    capacity: u32,
    last_submission: Option<SubmissionIndex>,
    label: String,
}

impl TransformBuffer {
    /// Creates an unallocated buffer. Storage is created on first use.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            buffer: None,
            capacity: 0,
            last_submission: None,
            label: label.into(),
        }
    }

    /// Capacity in instances.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The GPU buffer, once allocated.
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Grows the buffer so that it holds at least `required` instances.
    ///
    /// Returns `Ok(true)` if a new buffer was allocated.
    ///
    /// # Errors
    ///
    /// Returns the device error if the new buffer cannot be allocated. The
    /// previous buffer is kept in that case.
    pub fn ensure_capacity(
        &mut self,
        device: &dyn GraphicsDevice,
        required: usize,
    ) -> Result<bool, ResourceError> {
        if self.buffer.is_some() && required <= self.capacity as usize {
            return Ok(false);
        }
        let row_size = std::mem::size_of::<InstanceTransform>() as u64;
        let capacity = required
            .max(1)
            .checked_next_power_of_two()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ResourceError::OutOfMemory {
                label: self.label.clone(),
                requested: required as u64 * row_size,
            })?
            .max(MIN_TRANSFORM_CAPACITY);
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed(self.label.as_str())),
            size: capacity as u64 * row_size,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })?;
        if let Some(old) = self.buffer.replace(buffer) {
            if let Err(e) = device.destroy_buffer(old) {
                log::warn!("TransformBuffer({}): Failed to destroy buffer: {:?}", self.label, e);
            }
        }
        log::debug!(
            "TransformBuffer({}): grew from {} to {} instances",
            self.label,
            self.capacity,
            capacity
        );
        self.capacity = capacity;
        Ok(true)
    }

    /// Uploads packed rows to the start of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::OutOfBounds`] if the rows do not fit, or the
    /// device error if the write fails.
    pub fn upload(&self, device: &dyn GraphicsDevice, rows: &[u8]) -> Result<(), ResourceError> {
        debug_assert!(
            self.last_submission
                .map_or(true, |index| device.is_submission_complete(index)),
            "TransformBuffer({}) written while its frame is still in flight",
            self.label
        );
        let buffer = self.buffer.ok_or(ResourceError::NotFound)?;
        let capacity_bytes = self.capacity as u64 * std::mem::size_of::<InstanceTransform>() as u64;
        if rows.len() as u64 > capacity_bytes {
            return Err(ResourceError::OutOfBounds);
        }
        if rows.is_empty() {
            return Ok(());
        }
        device.write_buffer(buffer, 0, rows)
    }

    /// Records the submission that reads this buffer.
    pub fn mark_submitted(&mut self, index: SubmissionIndex) {
        self.last_submission = Some(index);
    }

    /// Releases the GPU buffer.
    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        if let Some(buffer) = self.buffer.take() {
            if let Err(e) = device.destroy_buffer(buffer) {
                log::warn!("TransformBuffer({}): Failed to destroy buffer: {:?}", self.label, e);
            }
        }
        self.capacity = 0;
        self.last_submission = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InstanceBatcher
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatcherState {
    /// Outside `begin_frame` .. `flush`.
    Idle,
    /// Accepting submissions.
    Recording,
    /// Flushed; batches are valid until the next `begin_frame`.
    Flushed,
}

/// A group of draws sharing a key, in first-submission order.
struct Group {
    key: StaticMeshKey,
    material: MaterialHandle,
    members: Vec<usize>,
}

/// Collects a frame's draw submissions and flushes them into instanced draws.
pub struct InstanceBatcher {
    draw_list: DrawList,
    selected_list: DrawList,
    packer: TransformPacker,
    buffers: Vec<TransformBuffer>,
    batches: Vec<InstancedDraw>,
    selected_batches: Vec<InstancedDraw>,
    slot: usize,
    state: BatcherState,
}

impl Default for InstanceBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceBatcher {
    /// Creates a batcher with one unallocated transform buffer per frame in flight.
    pub fn new() -> Self {
        Self {
            draw_list: DrawList::default(),
            selected_list: DrawList::default(),
            packer: TransformPacker::new(),
            buffers: (0..MAX_FRAMES_IN_FLIGHT)
                .map(|i| TransformBuffer::new(format!("Instance Transforms [slot {i}]")))
                .collect(),
            batches: Vec::new(),
            selected_batches: Vec::new(),
            slot: 0,
            state: BatcherState::Idle,
        }
    }

    /// Opens the submission window for a frame using transform buffer `slot`.
    ///
    /// Resets the transform offset to zero and clears the previous frame's batches.
    pub fn begin_frame(&mut self, slot: usize) {
        if self.state == BatcherState::Recording {
            log::warn!(
                "InstanceBatcher: begin_frame called with {} unflushed draws; discarding them",
                self.draw_list.len() + self.selected_list.len()
            );
        }
        self.draw_list.clear();
        self.selected_list.clear();
        self.batches.clear();
        self.selected_batches.clear();
        self.packer.reset();
        self.slot = slot % self.buffers.len();
        self.state = BatcherState::Recording;
    }

    /// Returns `true` between `begin_frame` and `flush`.
    pub fn is_recording(&self) -> bool {
        self.state == BatcherState::Recording
    }

    /// Appends a draw to the main list.
    ///
    /// Returns `false` and ignores the draw outside the submission window.
    pub fn submit(&mut self, command: DrawCommand) -> bool {
        if !self.accepts("submit") {
            return false;
        }
        self.draw_list.push(command);
        true
    }

    /// Appends a draw to the selection overlay list.
    ///
    /// Returns `false` and ignores the draw outside the submission window.
    pub fn submit_selected(&mut self, command: DrawCommand) -> bool {
        if !self.accepts("submit_selected") {
            return false;
        }
        self.selected_list.push(command);
        true
    }

    fn accepts(&self, operation: &str) -> bool {
        if self.state == BatcherState::Recording {
            return true;
        }
        log::warn!("InstanceBatcher: {operation} called outside begin_frame/flush; ignored");
        debug_assert!(
            false,
            "InstanceBatcher::{operation} called outside the submission window"
        );
        false
    }

    /// Drops the frame's submissions without producing batches.
    pub fn discard(&mut self) {
        self.draw_list.clear();
        self.selected_list.clear();
        self.batches.clear();
        self.selected_batches.clear();
        self.packer.reset();
        self.state = BatcherState::Idle;
    }

    /// Groups, packs and uploads the frame's submissions.
    ///
    /// Groups whose (mesh, submesh) does not resolve in `assets` are skipped
    /// with a warning. Both draw lists are cleared afterwards, whether the
    /// flush succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::AllocationFailed`] if the transform buffer
    /// cannot grow to hold the frame's instances. No batches are produced in
    /// that case.
    pub fn flush(
        &mut self,
        device: &dyn GraphicsDevice,
        assets: &RenderAssets,
    ) -> Result<(), RenderError> {
        if self.state != BatcherState::Recording {
            log::warn!("InstanceBatcher: flush called outside begin_frame; ignored");
            return Ok(());
        }
        self.state = BatcherState::Flushed;

        // 1. Group both lists by key, in first-submission order.
        let main_groups = group_by_key(self.draw_list.commands(), assets);
        let selected_groups = group_by_key(self.selected_list.commands(), assets);

        // 2. Make room before packing anything, so a failure leaves no batches behind.
        let required: usize = main_groups
            .iter()
            .chain(selected_groups.iter())
            .map(|group| group.members.len())
            .sum();
        if let Err(e) = self.buffers[self.slot].ensure_capacity(device, required) {
            self.draw_list.clear();
            self.selected_list.clear();
            return Err(RenderError::allocation("instance transform buffer", e));
        }

        // 3. Pack each group's transforms contiguously and record one draw per
        // group. begin_frame already reset the offset.
        self.batches = pack_groups(&mut self.packer, &main_groups, self.draw_list.commands());
        self.selected_batches =
            pack_groups(&mut self.packer, &selected_groups, self.selected_list.commands());

        // 4. Upload.
        let upload = self.buffers[self.slot].upload(device, self.packer.as_bytes());
        self.draw_list.clear();
        self.selected_list.clear();
        if let Err(e) = upload {
            self.batches.clear();
            self.selected_batches.clear();
            return Err(RenderError::ResourceError(e));
        }

        log::trace!(
            "InstanceBatcher: flushed {} instances into {} + {} batches",
            self.packer.offset(),
            self.batches.len(),
            self.selected_batches.len()
        );
        Ok(())
    }

    /// Instanced draws of the main list, valid after a successful flush.
    pub fn draws(&self) -> &[InstancedDraw] {
        &self.batches
    }

    /// Instanced draws of the selection overlay list.
    pub fn selected_draws(&self) -> &[InstancedDraw] {
        &self.selected_batches
    }

    /// Number of instances packed this frame.
    pub fn instance_count(&self) -> u32 {
        self.packer.offset()
    }

    /// The frame's packed transforms.
    pub fn packer(&self) -> &TransformPacker {
        &self.packer
    }

    /// The transform buffer of the current frame slot.
    pub fn transform_buffer(&self) -> Option<BufferId> {
        self.buffers[self.slot].buffer()
    }

    /// The transform buffer of `slot`, for inspection.
    pub fn slot_buffer(&self, slot: usize) -> &TransformBuffer {
        &self.buffers[slot % self.buffers.len()]
    }

    /// Records the submission that reads the current slot's transforms.
    pub fn mark_submitted(&mut self, index: SubmissionIndex) {
        self.buffers[self.slot].mark_submitted(index);
    }

    /// Releases every transform buffer.
    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        for buffer in &mut self.buffers {
            buffer.destroy(device);
        }
        self.discard();
    }
}

fn group_by_key(commands: &[DrawCommand], assets: &RenderAssets) -> Vec<Group> {
    let mut index: AHashMap<StaticMeshKey, usize> = AHashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for (i, command) in commands.iter().enumerate() {
        let key = command.key();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Group {
                key,
                material: command.material,
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].members.push(i);
    }
    groups.retain(|group| {
        let resolves = assets.submesh(group.key.mesh, group.key.submesh).is_some();
        if !resolves {
            log::warn!(
                "InstanceBatcher: mesh {:?} submesh {} does not resolve; skipping {} instances",
                group.key.mesh,
                group.key.submesh,
                group.members.len()
            );
        }
        resolves
    });
    groups
}

fn pack_groups(
    packer: &mut TransformPacker,
    groups: &[Group],
    commands: &[DrawCommand],
) -> Vec<InstancedDraw> {
    groups
        .iter()
        .map(|group| {
            let range = packer.pack(group.members.iter().map(|&i| &commands[i].transform));
            InstancedDraw {
                key: group.key,
                material: group.material,
                first_instance: range.start,
                instance_count: range.end - range.start,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_core::math::{Quat, Vec3};

    #[test]
    fn test_instance_transform_keeps_affine_matrix() {
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.7),
            Vec3::new(-4.0, 5.0, 6.0),
        );
        let packed = InstanceTransform::from_matrix(&matrix);
        assert_eq!(packed.rows[0][3], -4.0);
        assert_eq!(packed.rows[1][3], 5.0);
        assert_eq!(packed.rows[2][3], 6.0);
        assert!(packed.to_matrix().abs_diff_eq(matrix, 1e-6));
    }

    #[test]
    fn test_instance_layout_locations() {
        let layout = InstanceTransform::layout();
        assert_eq!(layout.array_stride, 48);
        assert_eq!(layout.step_mode, VertexStepMode::Instance);
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.shader_location).collect();
        assert_eq!(locations, vec![4, 5, 6]);
    }

    #[test]
    fn test_packer_offsets_increase_and_reset() {
        let mut packer = TransformPacker::new();
        let transforms = vec![Mat4::IDENTITY; 5];

        let a = packer.pack(&transforms[..2]);
        let b = packer.pack(&transforms[2..]);
        assert_eq!(a, 0..2);
        assert_eq!(b, 2..5);
        assert_eq!(packer.offset(), 5);
        assert_eq!(packer.as_bytes().len(), 5 * 48);

        packer.reset();
        assert_eq!(packer.offset(), 0);
        assert_eq!(packer.resets(), 1);
        assert_eq!(packer.pack(&transforms[..1]), 0..1);
    }

    #[test]
    fn test_group_by_key_keeps_first_submission_order() {
        use saturn_core::renderer::api::{GpuMesh, IndexFormat, Submesh};

        let mut assets = RenderAssets::new();
        for id in [1, 2] {
            assets.insert_mesh(
                MeshHandle(id),
                GpuMesh {
                    vertex_buffer: BufferId(10),
                    index_buffer: BufferId(11),
                    index_format: IndexFormat::Uint32,
                    submeshes: vec![Submesh {
                        base_index: 0,
                        index_count: 3,
                        base_vertex: 0,
                    }],
                },
            );
        }
        let draw = |entity: u64, mesh: u64, material: u64| DrawCommand {
            entity: EntityId(entity),
            mesh: MeshHandle(mesh),
            material: MaterialHandle(material),
            transform: Mat4::from_translation(Vec3::splat(entity as f32)),
            submesh: 0,
        };
        let commands = [draw(0, 2, 7), draw(1, 1, 8), draw(2, 2, 9), draw(3, 3, 1)];

        let groups = group_by_key(&commands, &assets);
        assert_eq!(groups.len(), 2, "mesh 3 does not resolve");
        assert_eq!(groups[0].key.mesh, MeshHandle(2));
        assert_eq!(groups[0].material, MaterialHandle(7));
        assert_eq!(groups[0].members, vec![0, 2]);
        assert_eq!(groups[1].members, vec![1]);

        let mut packer = TransformPacker::new();
        let batches = pack_groups(&mut packer, &groups, &commands);
        assert_eq!(batches[0].instances(), 0..2);
        assert_eq!(batches[1].instances(), 2..3);
        assert_eq!(packer.rows()[1].rows[0][3], 2.0, "entity 2 follows entity 0");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside the submission window")]
    fn test_submit_outside_window_asserts() {
        let mut batcher = InstanceBatcher::new();
        batcher.submit(DrawCommand {
            entity: EntityId(0),
            mesh: MeshHandle(0),
            material: MaterialHandle(0),
            transform: Mat4::IDENTITY,
            submesh: 0,
        });
    }
}
