//! Edge-preserving depth smoothing.
//!
//! A bilateral filter over the raw depth buffer, applied before
//! unprojection. The range term keeps depth discontinuities sharp so that
//! object silhouettes do not bleed into the background.

use serde::{Deserialize, Serialize};

/// Configuration for the bilateral depth filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Half-width of the filter window in pixels.
    #[serde(default = "default_window_radius")]
    pub window_radius: usize,

    /// Spatial Gaussian sigma in pixels.
    #[serde(default = "default_sigma_space")]
    pub sigma_space: f32,

    /// Range Gaussian sigma in meters. Neighbors whose depth differs by more
    /// than a few sigma contribute almost nothing.
    #[serde(default = "default_sigma_range")]
    pub sigma_range: f32,
}

fn default_window_radius() -> usize {
    2
}
fn default_sigma_space() -> f32 {
    2.0
}
fn default_sigma_range() -> f32 {
    0.05
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_radius: default_window_radius(),
            sigma_space: default_sigma_space(),
            sigma_range: default_sigma_range(),
        }
    }
}

/// Bilateral-filter a depth buffer in place of a copy.
///
/// `is_valid` gates which samples participate; invalid pixels are passed
/// through untouched and never contribute to their neighbors.
pub fn bilateral_depth<F: Fn(f32) -> bool>(
    depth: &[f32],
    width: usize,
    height: usize,
    config: &SmoothingConfig,
    is_valid: F,
) -> Vec<f32> {
    let r = config.window_radius as isize;
    let inv_2ss = 1.0 / (2.0 * config.sigma_space * config.sigma_space);
    let inv_2sr = 1.0 / (2.0 * config.sigma_range * config.sigma_range);

    // Precompute the spatial kernel for the window.
    let side = (2 * r + 1) as usize;
    let mut spatial = vec![0.0f32; side * side];
    for dv in -r..=r {
        for du in -r..=r {
            let d2 = (du * du + dv * dv) as f32;
            spatial[((dv + r) as usize) * side + (du + r) as usize] = (-d2 * inv_2ss).exp();
        }
    }

    let mut out = depth.to_vec();
    for v in 0..height as isize {
        for u in 0..width as isize {
            let center = depth[(v as usize) * width + u as usize];
            if !is_valid(center) {
                continue;
            }

            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;
            for dv in -r..=r {
                let nv = v + dv;
                if nv < 0 || nv >= height as isize {
                    continue;
                }
                for du in -r..=r {
                    let nu = u + du;
                    if nu < 0 || nu >= width as isize {
                        continue;
                    }
                    let sample = depth[(nv as usize) * width + nu as usize];
                    if !is_valid(sample) {
                        continue;
                    }
                    let diff = sample - center;
                    let w = spatial[((dv + r) as usize) * side + (du + r) as usize]
                        * (-diff * diff * inv_2sr).exp();
                    sum += sample * w;
                    weight_sum += w;
                }
            }

            if weight_sum > 0.0 {
                out[(v as usize) * width + u as usize] = sum / weight_sum;
            }
        }
    }
    out
}
