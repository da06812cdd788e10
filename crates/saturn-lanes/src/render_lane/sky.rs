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

//! Analytic daylight sky (Preetham et al.).
//!
//! The sky is described by turbidity and the sun's position. From those the
//! model derives the zenith colour in Yxy plus five Perez distribution
//! coefficients per channel. The geometry pass evaluates the distribution per
//! pixel in `geometry.wgsl`; [`PreethamSky::radiance`] is the same evaluation
//! on the CPU.

use saturn_core::math::{Vec3, Vec4};

/// Zenith luminance is given in kcd/m², far above the HDR range the rest of
/// the frame uses.
const LUMINANCE_SCALE: f32 = 0.05;

/// Parameters of the dynamic sky.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyParameters {
    /// Atmospheric haziness, roughly `2` (clear) to `10` (hazy).
    pub turbidity: f32,
    /// Sun azimuth around the Y axis, in radians.
    pub azimuth: f32,
    /// Angle between the sun and the zenith, in radians.
    pub inclination: f32,
}

impl Default for SkyParameters {
    fn default() -> Self {
        Self {
            turbidity: 2.0,
            azimuth: 0.0,
            inclination: 0.9,
        }
    }
}

impl SkyParameters {
    /// Unit vector pointing from the ground towards the sun.
    pub fn sun_direction(&self) -> Vec3 {
        let (sin_theta, cos_theta) = self.inclination.sin_cos();
        let (sin_phi, cos_phi) = self.azimuth.sin_cos();
        Vec3::new(sin_theta * cos_phi, cos_theta, sin_theta * sin_phi)
    }
}

/// The Perez sky distribution for a view zenith angle `theta` and a view to
/// sun angle `gamma`.
pub fn perez(theta: f32, gamma: f32, a: f32, b: f32, c: f32, d: f32, e: f32) -> f32 {
    let cos_gamma = gamma.cos();
    (1.0 + a * (b / (theta.cos() + 0.01)).exp())
        * (1.0 + c * (d * gamma).exp() + e * cos_gamma * cos_gamma)
}

/// Zenith luminance in kcd/m² for a sun zenith angle and turbidity.
pub fn zenith_luminance(sun_theta: f32, turbidity: f32) -> f32 {
    let chi = (4.0 / 9.0 - turbidity / 120.0) * (std::f32::consts::PI - 2.0 * sun_theta);
    (4.0453 * turbidity - 4.9710) * chi.tan() - 0.2155 * turbidity + 2.4192
}

/// One zenith chromaticity coordinate.
///
/// `c0`, `c1` and `c2` are the cubic-in-`sun_theta` polynomials weighted by
/// `turbidity²`, `turbidity` and `1`.
pub fn zenith_chromaticity(c0: Vec4, c1: Vec4, c2: Vec4, sun_theta: f32, turbidity: f32) -> f32 {
    let theta = Vec4::new(sun_theta.powi(3), sun_theta * sun_theta, sun_theta, 1.0);
    Vec3::new(turbidity * turbidity, turbidity, 1.0).dot(Vec3::new(
        theta.dot(c0),
        theta.dot(c1),
        theta.dot(c2),
    ))
}

fn chromaticity(c: &[Vec4; 3], sun_theta: f32, turbidity: f32) -> f32 {
    zenith_chromaticity(c[0], c[1], c[2], sun_theta, turbidity)
}

const CHROMATICITY_X: [Vec4; 3] = [
    Vec4::new(0.00166, -0.00375, 0.00209, 0.0),
    Vec4::new(-0.02903, 0.06377, -0.03202, 0.00394),
    Vec4::new(0.11693, -0.21196, 0.06052, 0.25886),
];

const CHROMATICITY_Y: [Vec4; 3] = [
    Vec4::new(0.00275, -0.00610, 0.00317, 0.0),
    Vec4::new(-0.04214, 0.08970, -0.04153, 0.00516),
    Vec4::new(0.15346, -0.26756, 0.06670, 0.26688),
];

/// Perez coefficients `A..E` of the three Yxy channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerezCoefficients {
    /// Luminance.
    pub luminance: [f32; 5],
    /// x chromaticity.
    pub x: [f32; 5],
    /// y chromaticity.
    pub y: [f32; 5],
}

impl PerezCoefficients {
    /// Coefficients for a turbidity.
    pub fn new(t: f32) -> Self {
        Self {
            luminance: [
                0.1787 * t - 1.4630,
                -0.3554 * t + 0.4275,
                -0.0227 * t + 5.3251,
                0.1206 * t - 2.5771,
                -0.0670 * t + 0.3703,
            ],
            x: [
                -0.0193 * t - 0.2592,
                -0.0665 * t + 0.0008,
                -0.0004 * t + 0.2125,
                -0.0641 * t - 0.8989,
                -0.0033 * t + 0.0452,
            ],
            y: [
                -0.0167 * t - 0.2608,
                -0.0950 * t + 0.0092,
                -0.0079 * t + 0.2102,
                -0.0441 * t - 1.6537,
                -0.0109 * t + 0.0529,
            ],
        }
    }

    /// Coefficient `i` of every channel, packed as `(Y, x, y, 0)`.
    fn column(&self, i: usize) -> [f32; 4] {
        [self.luminance[i], self.x[i], self.y[i], 0.0]
    }
}

/// Sky data read by the geometry shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkyUniform {
    /// Sun direction, `w` is `1.0` when the sky is drawn.
    pub sun_direction: [f32; 4],
    /// Zenith colour as `(Y, x, y, 0)`.
    pub zenith: [f32; 4],
    /// Perez coefficients `A..E`, each packed as `(Y, x, y, 0)`.
    pub perez: [[f32; 4]; 5],
}

/// An evaluated Preetham sky.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreethamSky {
    parameters: SkyParameters,
    sun_direction: Vec3,
    zenith: Vec3,
    coefficients: PerezCoefficients,
}

impl PreethamSky {
    /// Evaluates the model for `parameters`.
    pub fn new(parameters: SkyParameters) -> Self {
        let t = parameters.turbidity;
        let sun_theta = parameters.inclination;
        let zenith = Vec3::new(
            zenith_luminance(sun_theta, t),
            chromaticity(&CHROMATICITY_X, sun_theta, t),
            chromaticity(&CHROMATICITY_Y, sun_theta, t),
        );
        Self {
            parameters,
            sun_direction: parameters.sun_direction(),
            zenith,
            coefficients: PerezCoefficients::new(t),
        }
    }

    /// The parameters this sky was built from.
    pub fn parameters(&self) -> SkyParameters {
        self.parameters
    }

    /// Unit vector towards the sun.
    pub fn sun_direction(&self) -> Vec3 {
        self.sun_direction
    }

    /// Zenith colour as `(Y, x, y)`, `Y` in kcd/m².
    pub fn zenith(&self) -> Vec3 {
        self.zenith
    }

    /// The Perez coefficients.
    pub fn coefficients(&self) -> &PerezCoefficients {
        &self.coefficients
    }

    /// Linear RGB radiance seen along `direction`.
    ///
    /// Directions below the horizon reuse the horizon value.
    pub fn radiance(&self, direction: Vec3) -> Vec3 {
        let direction = direction.try_normalize().unwrap_or(Vec3::Y);
        let theta = direction.y.max(0.0).acos();
        let gamma = direction.dot(self.sun_direction).clamp(-1.0, 1.0).acos();
        let sun_theta = self.parameters.inclination;

        let channel = |zenith: f32, k: &[f32; 5]| {
            zenith * perez(theta, gamma, k[0], k[1], k[2], k[3], k[4])
                / perez(0.0, sun_theta, k[0], k[1], k[2], k[3], k[4])
        };
        let yxy = Vec3::new(
            channel(self.zenith.x, &self.coefficients.luminance),
            channel(self.zenith.y, &self.coefficients.x),
            channel(self.zenith.z, &self.coefficients.y),
        );
        yxy_to_linear_rgb(yxy)
    }

    /// Packs the sky for the geometry pass.
    pub fn uniform(&self) -> SkyUniform {
        SkyUniform {
            sun_direction: self.sun_direction.extend(1.0).to_array(),
            zenith: self.zenith.extend(0.0).to_array(),
            perez: std::array::from_fn(|i| self.coefficients.column(i)),
        }
    }
}

/// Converts `(Y, x, y)` to linear sRGB, scaling luminance into the HDR range.
pub fn yxy_to_linear_rgb(yxy: Vec3) -> Vec3 {
    let luminance = yxy.x * LUMINANCE_SCALE;
    if yxy.z.abs() <= f32::EPSILON {
        return Vec3::ZERO;
    }
    let x = yxy.y * luminance / yxy.z;
    let z = (1.0 - yxy.y - yxy.z) * luminance / yxy.z;
    Vec3::new(
        3.2406 * x - 1.5372 * luminance - 0.4986 * z,
        -0.9689 * x + 1.8758 * luminance + 0.0415 * z,
        0.0557 * x - 0.2040 * luminance + 1.0570 * z,
    )
    .max(Vec3::ZERO)
}
