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

//! # Lane Abstraction
//!
//! The base trait for every pass of the frame renderer.
//!
//! A **Lane** is a self-contained GPU pass: it owns its pipelines, records its
//! commands into the frame's encoder and reports failures as [`LaneError`]s
//! that the sequencer can log and skip.
//!
//! ## Lifecycle
//!
//! ```text
//! on_initialize(ctx)  →  [ execute(ctx) ]*  →  on_shutdown(ctx)
//! ```
//!
//! Lanes receive all of their inputs through a [`LaneContext`], a type-map the
//! renderer fills with the device, the frame encoder and the context keys
//! from [`context_keys`].
//!
//! ```rust,ignore
//! use saturn_core::lane::{Lane, LaneContext, LaneError, LaneKind};
//!
//! struct ClearLane;
//!
//! impl Lane for ClearLane {
//!     fn strategy_name(&self) -> &'static str { "Clear" }
//!     fn lane_kind(&self) -> LaneKind { LaneKind::Render }
//!
//!     fn execute(&self, ctx: &mut LaneContext) -> Result<(), LaneError> {
//!         let target = ctx.get::<HdrTarget>().ok_or(LaneError::missing("HdrTarget"))?;
//!         // record the clear into the frame encoder
//!         Ok(())
//!     }
//!
//!     fn as_any(&self) -> &dyn std::any::Any { self }
//!     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

pub mod context_keys;
pub use context_keys::*;

/// Error type for lane operations.
#[derive(Debug)]
pub enum LaneError {
    /// The lane has not been initialized yet.
    NotInitialized,
    /// A context entry the lane needs is missing or has the wrong type.
    InvalidContext {
        /// What the lane expected.
        expected: &'static str,
        /// Description of what was received.
        received: String,
    },
    /// A domain-specific error occurred during execution.
    ExecutionFailed(Box<dyn std::error::Error + Send + Sync>),
    /// A domain-specific error occurred during initialization.
    InitializationFailed(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for LaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneError::NotInitialized => write!(f, "Lane not initialized"),
            LaneError::InvalidContext { expected, received } => {
                write!(
                    f,
                    "Invalid lane context: expected {expected}, got {received}"
                )
            }
            LaneError::ExecutionFailed(e) => write!(f, "Lane execution failed: {e}"),
            LaneError::InitializationFailed(e) => write!(f, "Lane initialization failed: {e}"),
        }
    }
}

impl std::error::Error for LaneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaneError::ExecutionFailed(e) | LaneError::InitializationFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl LaneError {
    /// Convenience constructor for a missing context entry.
    pub fn missing(type_name: &'static str) -> Self {
        LaneError::InvalidContext {
            expected: type_name,
            received: "not found in LaneContext".into(),
        }
    }

    /// Wraps an execution error.
    pub fn execution(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        LaneError::ExecutionFailed(Box::new(error))
    }

    /// Wraps an initialization error.
    pub fn initialization(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        LaneError::InitializationFailed(Box::new(error))
    }
}

/// Classification of lanes, used for logging and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Rasterizes scene geometry (pre-depth, geometry).
    Render,
    /// Shadow map generation.
    Shadow,
    /// Compute-only work such as light culling.
    Compute,
    /// Full-screen passes over the HDR image (bloom, composite).
    PostProcess,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKind::Render => write!(f, "Render"),
            LaneKind::Shadow => write!(f, "Shadow"),
            LaneKind::Compute => write!(f, "Compute"),
            LaneKind::PostProcess => write!(f, "PostProcess"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LaneContext: type map for passing data to lanes
// ─────────────────────────────────────────────────────────────────────────────

/// A type-erased context for passing data to lanes.
///
/// The renderer populates a `LaneContext` with the data its lanes need and
/// passes it to [`Lane::execute`], [`Lane::on_initialize`] and
/// [`Lane::on_shutdown`]. Lanes retrieve entries by type.
///
/// ```
/// use saturn_core::lane::LaneContext;
///
/// let mut ctx = LaneContext::new();
/// ctx.insert(42u32);
/// ctx.insert(String::from("hello"));
///
/// assert_eq!(ctx.get::<u32>(), Some(&42));
/// assert_eq!(ctx.get::<String>().unwrap(), "hello");
/// ```
///
/// Borrowed data goes in through [`Slot`] (mutable) or [`Ref`] (shared).
///
/// # Safety
///
/// `LaneContext` is `Send + Sync` through an `unsafe impl` because it may hold
/// [`Slot`] / [`Ref`] wrappers containing raw pointers. The context is
/// stack-scoped: the renderer creates it, hands it to one lane at a time and
/// drops it before the borrowed data goes away.
pub struct LaneContext {
    data: HashMap<TypeId, Box<dyn Any>>,
}

// SAFETY: values inserted via `insert<T: Send + Sync>()` are Send+Sync.
// Slot/Ref wrappers hold raw pointers but only live within one frame scope on
// the render thread, while the pointed-to data is alive.
unsafe impl Send for LaneContext {}
unsafe impl Sync for LaneContext {}

impl LaneContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Inserts a value, keyed by its concrete type. Replaces any previous value.
    pub fn insert<T: 'static + Send + Sync>(&mut self, value: T) {
        self.data.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a shared reference to a value by type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data.get(&TypeId::of::<T>())?.downcast_ref()
    }

    /// Returns a mutable reference to a value by type.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.data.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    /// Checks whether a value of the given type is present.
    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a value by type.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.data
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast().ok().map(|b| *b))
    }
}

impl Default for LaneContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LaneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneContext")
            .field("entries", &self.data.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slot / Ref: borrow wrappers for LaneContext
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a **mutable** borrow for storage in [`LaneContext`].
///
/// This erases the lifetime so the value can be stored in the type-map. The
/// `Slot` must not outlive the original reference, which the stack-scoped
/// context guarantees.
///
/// ```rust,ignore
/// let mut encoder: Box<dyn CommandEncoder> = device.create_command_encoder(None);
/// ctx.insert(Slot::new(encoder.as_mut()));
/// // in a lane: ctx.get::<Slot<dyn CommandEncoder>>()?.get()
/// ```
pub struct Slot<T: ?Sized>(*mut T);

// SAFETY: Slot is used only within single-threaded frame scopes.
unsafe impl<T: ?Sized> Send for Slot<T> {}
unsafe impl<T: ?Sized> Sync for Slot<T> {}

impl<T: ?Sized> Slot<T> {
    /// Creates a `Slot` from a mutable reference.
    pub fn new(value: &mut T) -> Self {
        Self(value as *mut T)
    }

    /// Returns a mutable reference to the wrapped value.
    ///
    /// # Safety contract
    ///
    /// Sound while the original reference is alive and no other reference to
    /// the same data is used, which holds for one-lane-at-a-time execution.
    #[allow(clippy::mut_from_ref)]
    pub fn get(&self) -> &mut T {
        // SAFETY: guaranteed by single-lane-at-a-time execution
        unsafe { &mut *self.0 }
    }

    /// Returns a shared reference to the wrapped value.
    pub fn get_ref(&self) -> &T {
        // SAFETY: same as get()
        unsafe { &*self.0 }
    }
}

/// Wraps a **shared** borrow for storage in [`LaneContext`].
pub struct Ref<T: ?Sized>(*const T);

// SAFETY: Ref is used only within single-threaded frame scopes.
unsafe impl<T: ?Sized> Send for Ref<T> {}
unsafe impl<T: ?Sized> Sync for Ref<T> {}

impl<T: ?Sized> Ref<T> {
    /// Creates a `Ref` from a shared reference.
    pub fn new(value: &T) -> Self {
        Self(value as *const T)
    }

    /// Returns a shared reference to the wrapped value.
    pub fn get(&self) -> &T {
        // SAFETY: guaranteed by frame-scoped lifetime
        unsafe { &*self.0 }
    }
}

/// Base trait for every pass lane.
///
/// - **`on_initialize`** is called once when the renderer is built, before
///   the first frame. Lanes create their pipelines here.
/// - **`execute`** records the pass into the frame encoder.
/// - **`on_shutdown`** releases everything the lane created.
pub trait Lane: Send + Sync {
    /// Human-readable name identifying this lane, used in logs and frame reports.
    fn strategy_name(&self) -> &'static str;

    /// The kind of processing this lane performs.
    fn lane_kind(&self) -> LaneKind;

    // --- Lifecycle ---

    /// Called once when the lane is registered with the renderer.
    ///
    /// Render lanes expect an `Arc<dyn GraphicsDevice>` in the context.
    fn on_initialize(&self, _ctx: &mut LaneContext) -> Result<(), LaneError> {
        Ok(())
    }

    /// Records the lane's work for the current frame.
    fn execute(&self, _ctx: &mut LaneContext) -> Result<(), LaneError> {
        Ok(())
    }

    /// Called when the renderer shuts down.
    fn on_shutdown(&self, _ctx: &mut LaneContext) {}

    // --- Downcasting ---

    /// Downcast to a concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Downcast to a concrete type (mutable).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_writes_through() {
        let mut value = 10u32;
        {
            let mut ctx = LaneContext::new();
            ctx.insert(Slot::new(&mut value));
            let slot = ctx.get::<Slot<u32>>().unwrap();
            *slot.get() = 20;
        }
        assert_eq!(value, 20);
    }

    #[test]
    fn test_insert_replaces_same_type() {
        let mut ctx = LaneContext::new();
        ctx.insert(FrameSlot(0));
        ctx.insert(FrameSlot(1));
        assert_eq!(ctx.get::<FrameSlot>().map(|s| s.0), Some(1));
        assert_eq!(ctx.remove::<FrameSlot>().map(|s| s.0), Some(1));
        assert!(!ctx.contains::<FrameSlot>());
    }

    #[test]
    fn test_missing_entry_message() {
        let err = LaneError::missing("HdrTarget");
        assert_eq!(
            err.to_string(),
            "Invalid lane context: expected HdrTarget, got not found in LaneContext"
        );
    }
}
