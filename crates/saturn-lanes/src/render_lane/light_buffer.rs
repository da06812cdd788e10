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

//! Per-frame point light storage.

use saturn_core::lane::PointLightBuffer;
use saturn_core::renderer::api::{
    BufferDescriptor, BufferId, BufferUsage, SubmissionIndex, MAX_FRAMES_IN_FLIGHT,
};
use saturn_core::renderer::error::{RenderError, ResourceError};
use saturn_core::renderer::traits::GraphicsDevice;
use saturn_core::renderer::{GpuPointLight, PointLight};
use std::borrow::Cow;

/// Smallest light buffer ever allocated, in lights.
pub const MIN_LIGHT_CAPACITY: u32 = 64;

#[derive(Debug, Default)]
struct LightSlot {
    buffer: Option<BufferId>,
    capacity: u32,
    last_submission: Option<SubmissionIndex>,
}

/// Storage buffers holding each frame's point lights, one per frame in flight.
///
/// The light culling and geometry passes bind the buffer of the frame being
/// recorded. A buffer always exists once [`upload`](Self::upload) has run,
/// even for a frame without lights, so the bindings stay valid.
#[derive(Debug)]
pub struct PointLightStorage {
    slots: Vec<LightSlot>,
    staging: Vec<GpuPointLight>,
}

impl Default for PointLightStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl PointLightStorage {
    /// Creates the storage. Buffers are allocated on first upload.
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_FRAMES_IN_FLIGHT).map(|_| LightSlot::default()).collect(),
            staging: Vec::new(),
        }
    }

    /// Capacity of `slot`, in lights.
    pub fn capacity(&self, slot: usize) -> u32 {
        self.slots[slot % self.slots.len()].capacity
    }

    /// Writes `lights` into the buffer of `slot`, growing it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::AllocationFailed`] if a larger buffer cannot be
    /// created; the previous buffer is kept. A failed write is returned as a
    /// [`RenderError::ResourceError`].
    pub fn upload(
        &mut self,
        device: &dyn GraphicsDevice,
        slot: usize,
        lights: &[PointLight],
    ) -> Result<PointLightBuffer, RenderError> {
        let slot_index = slot % self.slots.len();
        let light_slot = &mut self.slots[slot_index];
        debug_assert!(
            light_slot
                .last_submission
                .map_or(true, |index| device.is_submission_complete(index)),
            "point lights of slot {slot_index} written while the frame is in flight"
        );

        let count = lights.len() as u32;
        if light_slot.buffer.is_none() || count > light_slot.capacity {
            let capacity = count.max(1).next_power_of_two().max(MIN_LIGHT_CAPACITY);
            let buffer = device
                .create_buffer(&BufferDescriptor {
                    label: Some(Cow::Owned(format!("Point Lights [slot {slot_index}]"))),
                    size: capacity as u64 * std::mem::size_of::<GpuPointLight>() as u64,
                    usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                })
                .map_err(|e| RenderError::allocation("point light buffer", e))?;
            if let Some(old) = light_slot.buffer.replace(buffer) {
                if let Err(e) = device.destroy_buffer(old) {
                    log::warn!("PointLightStorage: Failed to destroy buffer: {:?}", e);
                }
            }
            light_slot.capacity = capacity;
        }
        let buffer = light_slot
            .buffer
            .ok_or(RenderError::ResourceError(ResourceError::NotFound))?;

        if !lights.is_empty() {
            self.staging.clear();
            self.staging.extend(lights.iter().map(GpuPointLight::from));
            device
                .write_buffer(buffer, 0, bytemuck::cast_slice(&self.staging))
                .map_err(RenderError::ResourceError)?;
        }

        Ok(PointLightBuffer { buffer, count })
    }

    /// Records the submission that reads the buffer of `slot`.
    pub fn mark_submitted(&mut self, slot: usize, index: SubmissionIndex) {
        let slot = slot % self.slots.len();
        self.slots[slot].last_submission = Some(index);
    }

    /// Releases every buffer.
    pub fn destroy(&mut self, device: &dyn GraphicsDevice) {
        for slot in &mut self.slots {
            if let Some(buffer) = slot.buffer.take() {
                if let Err(e) = device.destroy_buffer(buffer) {
                    log::warn!("PointLightStorage: Failed to destroy buffer: {:?}", e);
                }
            }
            slot.capacity = 0;
            slot.last_submission = None;
        }
    }
}
