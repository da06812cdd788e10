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

//! Math types used across the renderer.
//!
//! Vector and matrix types come from `glam`; this module adds the integer
//! extents and the small geometric helpers that the passes share.

mod dimension;
mod geometry;

pub use dimension::*;
pub use geometry::*;
pub use glam::{Mat3, Mat4, Quat, UVec2, Vec2, Vec3, Vec4};

/// A linear-space RGBA colour, stored as four `f32` components.
pub type LinearRgba = glam::Vec4;
