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

//! Per-frame ring of GPU uniform buffers.
//!
//! The [`UniformRingBuffer`] pre-allocates one buffer and bind group per frame
//! in flight. The caller picks the slot with the frame's slot index
//! (`frame_index % MAX_FRAMES_IN_FLIGHT`), so the CPU always writes into the
//! slot whose previous GPU use has already been waited on.
//!
//! ```text
//! Frame N:     [Slot 0: GPU reads] ← render pass uses this bind group
//! Frame N+1:   [Slot 1: CPU writes] → write() updates this slot
//! Frame N+2:   [Slot 0: CPU writes] → slot 0 fence waited, GPU done reading
//! ```
//!
//! A slot may also hold several elements addressed through dynamic offsets,
//! which is how the shadow pass stores one view-projection per cascade.

use crate::renderer::{
    api::{
        BindGroupDescriptor, BindGroupEntry, BindGroupId, BindGroupLayoutId, BindingResource,
        BufferBinding, BufferDescriptor, BufferId, BufferUsage, MAX_FRAMES_IN_FLIGHT,
    },
    error::ResourceError,
    traits::GraphicsDevice,
};
use std::borrow::Cow;
use std::num::NonZeroU64;

/// Minimum alignment of dynamic uniform offsets on every supported backend.
pub const MIN_UNIFORM_ALIGNMENT: u64 = 256;

#[derive(Debug)]
struct RingSlot {
    buffer: BufferId,
    bind_group: BindGroupId,
}

/// A persistent ring of uniform buffers, one slot per frame in flight.
#[derive(Debug)]
pub struct UniformRingBuffer {
    slots: Vec<RingSlot>,
    element_size: u64,
    element_stride: u64,
    element_count: u32,
    label: &'static str,
}

impl UniformRingBuffer {
    /// Creates a ring whose slots hold a single element of `data_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if buffer or bind group creation fails.
    pub fn new(
        device: &dyn GraphicsDevice,
        layout: BindGroupLayoutId,
        binding: u32,
        data_size: u64,
        label: &'static str,
    ) -> Result<Self, ResourceError> {
        Self::with_elements(device, layout, binding, data_size, 1, label)
    }

    /// Creates a ring whose slots hold `element_count` elements, each aligned
    /// to [`MIN_UNIFORM_ALIGNMENT`] and addressed with a dynamic offset.
    ///
    /// The bind group binds one element wide, so the layout entry must declare
    /// `has_dynamic_offset` when `element_count > 1`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if buffer or bind group creation fails.
    /// Buffers created before the failure are released.
    pub fn with_elements(
        device: &dyn GraphicsDevice,
        layout: BindGroupLayoutId,
        binding: u32,
        element_size: u64,
        element_count: u32,
        label: &'static str,
    ) -> Result<Self, ResourceError> {
        let element_stride = element_size.div_ceil(MIN_UNIFORM_ALIGNMENT) * MIN_UNIFORM_ALIGNMENT;
        let mut ring = Self {
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            element_size,
            element_stride,
            element_count: element_count.max(1),
            label,
        };

        for i in 0..MAX_FRAMES_IN_FLIGHT {
            match ring.create_slot(device, layout, binding, i) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(device);
                    return Err(e);
                }
            }
        }

        Ok(ring)
    }

    fn create_slot(
        &self,
        device: &dyn GraphicsDevice,
        layout: BindGroupLayoutId,
        binding: u32,
        index: usize,
    ) -> Result<RingSlot, ResourceError> {
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(format!("{} [slot {index}]", self.label))),
            size: self.element_stride * self.element_count as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some(self.label),
            layout,
            entries: &[BindGroupEntry {
                binding,
                resource: BindingResource::Buffer(BufferBinding {
                    buffer,
                    offset: 0,
                    size: NonZeroU64::new(self.element_size),
                }),
            }],
        });

        match bind_group {
            Ok(bind_group) => Ok(RingSlot { buffer, bind_group }),
            Err(e) => {
                let _ = device.destroy_buffer(buffer);
                Err(e)
            }
        }
    }

    /// Writes the single element of `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the GPU write fails.
    pub fn write(
        &self,
        device: &dyn GraphicsDevice,
        slot: usize,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        self.write_element(device, slot, 0, data)
    }

    /// Writes element `element` of `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::OutOfBounds`] for an element past the ring's
    /// capacity, or the device error if the write fails.
    pub fn write_element(
        &self,
        device: &dyn GraphicsDevice,
        slot: usize,
        element: u32,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        debug_assert_eq!(
            data.len() as u64,
            self.element_size,
            "UniformRingBuffer({}) write size mismatch",
            self.label
        );
        if element >= self.element_count {
            return Err(ResourceError::OutOfBounds);
        }
        let ring_slot = self.slot(slot)?;
        device.write_buffer(ring_slot.buffer, self.dynamic_offset(element) as u64, data)
    }

    /// The dynamic offset addressing `element` within a slot.
    pub fn dynamic_offset(&self, element: u32) -> u32 {
        (element as u64 * self.element_stride) as u32
    }

    /// Returns the bind group of `slot`.
    pub fn bind_group(&self, slot: usize) -> BindGroupId {
        self.slots[slot % self.slots.len()].bind_group
    }

    /// Number of elements per slot.
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Number of slots, equal to [`MAX_FRAMES_IN_FLIGHT`] once created.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, slot: usize) -> Result<&RingSlot, ResourceError> {
        self.slots.get(slot).ok_or(ResourceError::OutOfBounds)
    }

    /// Destroys all GPU resources owned by this ring buffer.
    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        for slot in self.slots.drain(..) {
            if let Err(e) = device.destroy_bind_group(slot.bind_group) {
                log::warn!(
                    "UniformRingBuffer({}): Failed to destroy bind group: {:?}",
                    self.label,
                    e
                );
            }
            if let Err(e) = device.destroy_buffer(slot.buffer) {
                log::warn!(
                    "UniformRingBuffer({}): Failed to destroy buffer: {:?}",
                    self.label,
                    e
                );
            }
        }
    }
}

