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

//! Camera and view information supplied by the scene layer.

use crate::math::{Extent2D, Mat4, Vec3};

/// Default exposure used by the composite pass.
pub const DEFAULT_EXPOSURE: f32 = 0.8;

/// The projection half of a scene camera.
///
/// The view matrix is supplied separately through
/// `SceneRenderer::set_camera(camera, view)`, since it comes from the camera
/// entity's transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCamera {
    /// Perspective projection (view to clip space), `[0, 1]` depth.
    pub projection: Mat4,
    /// Distance to the near plane.
    pub near: f32,
    /// Distance to the far plane.
    pub far: f32,
    /// Exposure applied by the composite pass.
    pub exposure: f32,
}

impl SceneCamera {
    /// Builds a right-handed perspective camera.
    pub fn perspective(fov_y_radians: f32, aspect_ratio: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Mat4::perspective_rh(fov_y_radians, aspect_ratio, near, far),
            near,
            far,
            exposure: DEFAULT_EXPOSURE,
        }
    }
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self::perspective(45f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0)
    }
}

/// Everything the passes need to know about the active view for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewInfo {
    /// The camera's view matrix (world to view space).
    pub view_matrix: Mat4,
    /// The camera's projection matrix (view to clip space).
    pub projection_matrix: Mat4,
    /// The camera's position in world space.
    pub camera_position: Vec3,
    /// Near plane distance.
    pub near: f32,
    /// Far plane distance.
    pub far: f32,
    /// Composite exposure.
    pub exposure: f32,
}

impl ViewInfo {
    /// Combines a camera with its view matrix.
    pub fn new(camera: &SceneCamera, view_matrix: Mat4) -> Self {
        Self {
            view_matrix,
            projection_matrix: camera.projection,
            camera_position: view_matrix.inverse().w_axis.truncate(),
            near: camera.near,
            far: camera.far,
            exposure: camera.exposure,
        }
    }

    /// Calculates the combined view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix * self.view_matrix
    }
}

impl Default for ViewInfo {
    fn default() -> Self {
        Self::new(&SceneCamera::default(), Mat4::IDENTITY)
    }
}

/// The GPU-side representation of camera uniform data.
///
/// The layout must match the `Camera` struct declared in the WGSL shaders.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniformData {
    /// World to view space.
    pub view: [[f32; 4]; 4],
    /// View to clip space.
    pub projection: [[f32; 4]; 4],
    /// World to clip space.
    pub view_projection: [[f32; 4]; 4],
    /// Clip to view space, used to rebuild view positions from depth.
    pub inverse_projection: [[f32; 4]; 4],
    /// Clip to world space, used by the skybox.
    pub inverse_view_projection: [[f32; 4]; 4],
    /// World-space camera position, `w` unused.
    pub camera_position: [f32; 4],
    /// Viewport width, height, near and far.
    pub viewport: [f32; 4],
}

impl CameraUniformData {
    /// Creates camera uniform data for `view` rendered at `extent`.
    pub fn new(view: &ViewInfo, extent: Extent2D) -> Self {
        let view_projection = view.view_projection_matrix();
        Self {
            view: view.view_matrix.to_cols_array_2d(),
            projection: view.projection_matrix.to_cols_array_2d(),
            view_projection: view_projection.to_cols_array_2d(),
            inverse_projection: view.projection_matrix.inverse().to_cols_array_2d(),
            inverse_view_projection: view_projection.inverse().to_cols_array_2d(),
            camera_position: view.camera_position.extend(1.0).to_array(),
            viewport: [
                extent.width as f32,
                extent.height as f32,
                view.near,
                view.far,
            ],
        }
    }
}
