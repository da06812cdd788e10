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

//! Frames-in-flight bookkeeping.

use saturn_core::renderer::api::{SubmissionIndex, MAX_FRAMES_IN_FLIGHT};
use saturn_core::renderer::error::RenderError;
use saturn_core::renderer::traits::GraphicsDevice;

/// Recycles the `MAX_FRAMES_IN_FLIGHT` per-frame slots.
///
/// Frame `n` records into slot `n % MAX_FRAMES_IN_FLIGHT`. Each slot remembers
/// the submission that last used it, and [`begin_frame`](Self::begin_frame)
/// waits for that submission before handing the slot out again. Every per-slot
/// buffer is therefore free for CPU writes once its slot has been begun.
#[derive(Debug, Default)]
pub struct FrameSync {
    frame_index: u64,
    in_flight: [Option<SubmissionIndex>; MAX_FRAMES_IN_FLIGHT],
    recording: bool,
}

impl FrameSync {
    /// Creates the arena with every slot free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the frame being recorded, or of the next one.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Slot of the frame being recorded, or of the next one.
    pub fn current_slot(&self) -> usize {
        (self.frame_index % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Returns `true` between `begin_frame` and `end_frame`.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Returns `true` while `slot` holds a submission that has not been waited on.
    pub fn is_slot_in_flight(&self, slot: usize) -> bool {
        self.in_flight[slot % MAX_FRAMES_IN_FLIGHT].is_some()
    }

    /// Returns `true` if any slot still holds a submission.
    pub fn has_pending(&self) -> bool {
        self.in_flight.iter().any(Option::is_some)
    }

    /// Claims the slot of the current frame, waiting for its previous
    /// submission to finish on the GPU.
    ///
    /// Calling it again before [`end_frame`](Self::end_frame) returns the same
    /// slot.
    pub fn begin_frame(&mut self, device: &dyn GraphicsDevice) -> Result<usize, RenderError> {
        let slot = self.current_slot();
        if let Some(index) = self.in_flight[slot] {
            if !device.is_submission_complete(index) {
                log::trace!("FrameSync: slot {} waits for submission {:?}", slot, index);
            }
            device.wait_for_submission(index)?;
            self.in_flight[slot] = None;
        }
        self.recording = true;
        Ok(slot)
    }

    /// Closes the current frame. `submission` is the command buffer that now
    /// reads the slot's resources, or `None` if nothing was submitted.
    pub fn end_frame(&mut self, submission: Option<SubmissionIndex>) {
        if !self.recording {
            log::warn!("FrameSync: end_frame called without begin_frame");
        }
        let slot = self.current_slot();
        self.in_flight[slot] = submission;
        self.frame_index += 1;
        self.recording = false;
    }

    /// Waits for every recorded submission, oldest first.
    pub fn wait_all(&mut self, device: &dyn GraphicsDevice) -> Result<(), RenderError> {
        let mut pending: Vec<(usize, SubmissionIndex)> = self
            .in_flight
            .iter()
            .enumerate()
            .filter_map(|(slot, index)| index.map(|index| (slot, index)))
            .collect();
        pending.sort_by_key(|(_, index)| *index);
        for (slot, index) in pending {
            device.wait_for_submission(index)?;
            self.in_flight[slot] = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_cycle_with_frame_index() {
        let mut sync = FrameSync::new();
        let mut slots = Vec::new();
        for i in 0..5 {
            slots.push(sync.current_slot());
            sync.end_frame(Some(SubmissionIndex(i)));
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(sync.frame_index(), 5);
    }

    #[test]
    fn test_empty_frame_leaves_slot_free() {
        let mut sync = FrameSync::new();
        sync.end_frame(None);
        assert!(!sync.is_slot_in_flight(0));
        assert!(!sync.has_pending());

        sync.end_frame(Some(SubmissionIndex(1)));
        assert!(sync.is_slot_in_flight(1));
        assert!(sync.has_pending());
    }
}
