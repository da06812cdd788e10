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

//! The frame renderer's backend-agnostic contract.
//!
//! [`api`] holds the handle and descriptor types, [`traits`] the device and
//! encoder traits, and the remaining modules the plain value types the scene
//! layer feeds into the renderer every frame.

pub mod api;
pub mod camera;
pub mod error;
pub mod light;
pub mod light_culling;
pub mod stats;
pub mod traits;

pub use api::*;
pub use camera::*;
pub use error::*;
pub use light::*;
pub use light_culling::*;
pub use stats::*;
pub use traits::*;
