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

//! Defines the light types copied out of the scene every frame.
//!
//! Lights have no identity across frames: the scene layer rebuilds the flat
//! [`Lights`] aggregate each frame and hands it to the renderer by value.

use crate::math::{Sphere, Vec3};

/// A directional light source that illuminates from a uniform direction.
///
/// # Examples
///
/// ```
/// use saturn_core::renderer::light::DirectionalLight;
/// use saturn_core::math::Vec3;
///
/// let sun = DirectionalLight {
///     direction: Vec3::new(-0.5, -1.0, -0.3).normalize(),
///     radiance: Vec3::new(1.0, 0.95, 0.8),
///     intensity: 1.0,
///     cast_shadows: true,
/// };
/// assert!(sun.cast_shadows);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// The direction the light is pointing, from the light towards the scene.
    pub direction: Vec3,
    /// The colour of the light in linear RGB.
    pub radiance: Vec3,
    /// Intensity multiplier.
    pub intensity: f32,
    /// Whether this light may drive the shadow cascades.
    pub cast_shadows: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, -1.0, -0.5).normalize(),
            radiance: Vec3::ONE,
            intensity: 1.0,
            cast_shadows: true,
        }
    }
}

/// A point light source that emits light in all directions from a single point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// World-space position.
    pub position: Vec3,
    /// The colour of the light in linear RGB.
    pub radiance: Vec3,
    /// Intensity multiplier.
    pub intensity: f32,
    /// Distance beyond which the light contributes nothing.
    pub radius: f32,
    /// Blends the windowed falloff towards a hard cutoff (`0`) or a flat one (`1`).
    pub falloff: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            radiance: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            falloff: 1.0,
        }
    }
}

impl PointLight {
    /// The light's bounding sphere in world space.
    pub fn bounding_sphere(&self) -> Sphere {
        Sphere {
            center: self.position,
            radius: self.radius,
        }
    }

    /// Distance attenuation in `[0, 1]`. Exactly zero at and beyond `radius`.
    pub fn attenuation(&self, distance: f32) -> f32 {
        if self.radius <= 0.0 || distance >= self.radius {
            return 0.0;
        }
        let ratio = distance / self.radius;
        let window = (1.0 - ratio * ratio).clamp(0.0, 1.0);
        window * (window + (1.0 - window) * self.falloff.clamp(0.0, 1.0))
    }

    /// Radiance reaching `point`, ignoring surface orientation.
    pub fn radiance_at(&self, point: Vec3) -> Vec3 {
        self.radiance * self.intensity * self.attenuation(self.position.distance(point))
    }
}

/// The per-frame light aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lights {
    /// Directional lights. The first shadow-casting one drives the cascades.
    pub directional: Vec<DirectionalLight>,
    /// Point lights, culled per tile by the light culling pass.
    pub point: Vec<PointLight>,
}

impl Lights {
    /// Returns the light used for shadow cascades, if any.
    pub fn dominant_directional(&self) -> Option<&DirectionalLight> {
        self.directional.iter().find(|light| light.cast_shadows)
    }

    /// Clears both lists.
    pub fn clear(&mut self) {
        self.directional.clear();
        self.point.clear();
    }
}

/// Maximum number of directional lights uploaded to the geometry pass.
pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;

/// GPU layout of a directional light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuDirectionalLight {
    /// Light direction.
    pub direction: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
    /// Linear RGB radiance.
    pub radiance: [f32; 3],
    /// `1.0` if this light casts the cascaded shadows.
    pub shadowed: f32,
}

impl From<&DirectionalLight> for GpuDirectionalLight {
    fn from(light: &DirectionalLight) -> Self {
        Self {
            direction: light.direction.normalize_or_zero().to_array(),
            intensity: light.intensity,
            radiance: light.radiance.to_array(),
            shadowed: if light.cast_shadows { 1.0 } else { 0.0 },
        }
    }
}

/// GPU layout of a point light, as read by the culling and geometry shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPointLight {
    /// World-space position.
    pub position: [f32; 3],
    /// Influence radius.
    pub radius: f32,
    /// Linear RGB radiance.
    pub radiance: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
    /// Falloff blend factor.
    pub falloff: f32,
    /// Padding to a 16-byte multiple.
    pub _padding: [f32; 3],
}

impl From<&PointLight> for GpuPointLight {
    fn from(light: &PointLight) -> Self {
        Self {
            position: light.position.to_array(),
            radius: light.radius,
            radiance: light.radiance.to_array(),
            intensity: light.intensity,
            falloff: light.falloff,
            _padding: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_attenuation_is_zero_outside_radius() {
        let light = PointLight {
            radius: 5.0,
            ..Default::default()
        };
        assert_relative_eq!(light.attenuation(0.0), 1.0);
        assert_relative_eq!(light.attenuation(5.0), 0.0);
        assert_relative_eq!(light.attenuation(7.5), 0.0);
        assert!(light.attenuation(4.99) > 0.0);
    }

    #[test]
    fn test_hard_falloff_is_steeper() {
        let soft = PointLight {
            falloff: 1.0,
            ..Default::default()
        };
        let hard = PointLight {
            falloff: 0.0,
            ..Default::default()
        };
        assert!(hard.attenuation(5.0) < soft.attenuation(5.0));
    }

    #[test]
    fn test_dominant_directional_skips_non_casters() {
        let lights = Lights {
            directional: vec![
                DirectionalLight {
                    cast_shadows: false,
                    ..Default::default()
                },
                DirectionalLight {
                    direction: Vec3::NEG_Y,
                    ..Default::default()
                },
            ],
            point: Vec::new(),
        };
        assert_eq!(lights.dominant_directional().unwrap().direction, Vec3::NEG_Y);
    }

    #[test]
    fn test_gpu_layout_sizes() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 48);
        assert_eq!(std::mem::size_of::<GpuDirectionalLight>(), 32);
    }
}
