//! Depth frame preprocessing.
//!
//! Turns a `RawFrame` into a `ProcessedFrame`: per-pixel camera-space
//! points, normals, fusion weights, confidences and surfel radii. Pixels
//! with missing or out-of-gate depth are marked invalid and silently
//! skipped downstream; they are never errors.
//!
//! # Pipeline
//!
//! ```text
//! RawFrame → [bilateral smoothing] → unproject → normals → weights/confidences/radii
//! ```
//!
//! The kernel is a pure function behind the [`FrameProcessor`] capability
//! trait so a GPU compute backend can replace the CPU reference
//! implementation without touching the callers.

mod smoothing;

pub use smoothing::{bilateral_depth, SmoothingConfig};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::types::{ProcessedFrame, RawFrame};

/// Configuration for depth preprocessing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Minimum accepted depth in meters; closer returns are invalid.
    #[serde(default = "default_min_depth")]
    pub min_depth: f32,

    /// Maximum accepted depth in meters; farther returns are invalid.
    #[serde(default = "default_max_depth")]
    pub max_depth: f32,

    /// Relative depth discontinuity between grid neighbors above which a
    /// normal is considered unreliable and the pixel invalidated.
    #[serde(default = "default_depth_jump")]
    pub depth_jump: f32,

    /// Sigma of the depth-gradient stability term used for confidence,
    /// in meters per pixel.
    #[serde(default = "default_grad_sigma")]
    pub grad_sigma: f32,

    /// Lower bound on the incidence cosine used when sizing surfel radii,
    /// preventing blow-up at grazing angles.
    #[serde(default = "default_min_incidence_cos")]
    pub min_incidence_cos: f32,

    /// Upper bound on surfel radii in meters.
    #[serde(default = "default_max_radius")]
    pub max_radius: f32,

    /// Bilateral smoothing parameters.
    #[serde(default)]
    pub smoothing: SmoothingConfig,
}

fn default_min_depth() -> f32 {
    0.2
}
fn default_max_depth() -> f32 {
    3.0
}
fn default_depth_jump() -> f32 {
    0.05
}
fn default_grad_sigma() -> f32 {
    0.01
}
fn default_min_incidence_cos() -> f32 {
    0.26
}
fn default_max_radius() -> f32 {
    0.05
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_depth: default_min_depth(),
            max_depth: default_max_depth(),
            depth_jump: default_depth_jump(),
            grad_sigma: default_grad_sigma(),
            min_incidence_cos: default_min_incidence_cos(),
            max_radius: default_max_radius(),
            smoothing: SmoothingConfig::default(),
        }
    }
}

/// Capability interface for the preprocessing kernel.
///
/// Implementations must be pure: same frame in, same geometry out, no side
/// effects. The CPU reference implementation is [`CpuFrameProcessor`].
pub trait FrameProcessor: Send + Sync {
    /// Process a raw frame. `smooth` enables edge-preserving depth
    /// smoothing before unprojection.
    fn process(&self, frame: &RawFrame, smooth: bool) -> ProcessedFrame;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// CPU reference implementation of the preprocessing kernel.
#[derive(Debug, Clone, Default)]
pub struct CpuFrameProcessor {
    config: PreprocessConfig,
}

impl CpuFrameProcessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Depth gate: finite and inside [min_depth, max_depth].
    #[inline]
    fn is_valid_depth(&self, d: f32) -> bool {
        d.is_finite() && d >= self.config.min_depth && d <= self.config.max_depth
    }
}

impl FrameProcessor for CpuFrameProcessor {
    fn process(&self, frame: &RawFrame, smooth: bool) -> ProcessedFrame {
        let width = frame.width;
        let height = frame.height;
        let mut out = ProcessedFrame::invalid(width, height);
        if frame.is_empty() {
            return out;
        }

        let depth: std::borrow::Cow<'_, [f32]> = if smooth {
            std::borrow::Cow::Owned(bilateral_depth(
                &frame.depth,
                width,
                height,
                &self.config.smoothing,
                |d| self.is_valid_depth(d),
            ))
        } else {
            std::borrow::Cow::Borrowed(&frame.depth)
        };

        let k = frame.camera.intrinsics;

        // Pass 1: gate + unproject. The gate mask is kept separate from the
        // output validity so pass 2's neighbor checks see the raw gating,
        // not earlier pass-2 invalidations.
        let mut gate = vec![false; width * height];
        for v in 0..height {
            for u in 0..width {
                let i = v * width + u;
                let d = depth[i];
                if !self.is_valid_depth(d) {
                    continue;
                }
                out.points[i] = k.unproject(u as f32, v as f32, d);
                gate[i] = true;
            }
        }

        // Pass 2: normals from grid-neighbor finite differences, then the
        // derived weight, confidence and radius. Border pixels and pixels
        // without a stable neighborhood stay invalid.
        let depth_range = (self.config.max_depth - self.config.min_depth).max(1e-6);
        let mut n_valid = 0usize;
        for v in 0..height {
            for u in 0..width {
                let i = v * width + u;
                if !gate[i] {
                    continue;
                }
                if u == 0 || v == 0 || u + 1 >= width || v + 1 >= height {
                    continue;
                }

                let il = i - 1;
                let ir = i + 1;
                let iu = i - width;
                let id = i + width;
                if !(gate[il] && gate[ir] && gate[iu] && gate[id]) {
                    continue;
                }

                let d = depth[i];
                let jump = self.config.depth_jump * d;
                if (depth[ir] - depth[il]).abs() > jump || (depth[id] - depth[iu]).abs() > jump {
                    // Depth discontinuity: the finite-difference normal
                    // would straddle two surfaces.
                    continue;
                }

                let dx = out.points[ir] - out.points[il];
                let dy = out.points[id] - out.points[iu];
                let mut normal = dx.cross(&dy);
                let norm = normal.norm();
                if norm < 1e-12 {
                    continue;
                }
                normal /= norm;

                let p = out.points[i];
                // Orient toward the camera at the origin.
                if normal.dot(&p) > 0.0 {
                    normal = -normal;
                }

                let view = -p / p.norm();
                let cos_incidence = normal.dot(&view).max(0.0);
                if cos_incidence <= 0.0 {
                    continue;
                }

                // Central-difference depth gradient in meters per pixel.
                let gx = (depth[ir] - depth[il]) * 0.5;
                let gy = (depth[id] - depth[iu]) * 0.5;
                let grad = (gx * gx + gy * gy).sqrt();

                let range_t = ((d - self.config.min_depth) / depth_range).clamp(0.0, 1.0);
                let weight = (cos_incidence * (1.0 - 0.8 * range_t)).clamp(0.0, 1.0);

                let stability = (-(grad / self.config.grad_sigma).powi(2)).exp();
                let confidence = (cos_incidence * stability).clamp(0.0, 1.0);

                // Pixel footprint back-projected to the surface, inflated at
                // grazing incidence.
                let radius = (std::f32::consts::SQRT_2 * d / k.fx)
                    / cos_incidence.max(self.config.min_incidence_cos);

                let c = frame.color[i];
                out.normals[i] = normal;
                out.colors[i] = [
                    c[0] as f32 / 255.0,
                    c[1] as f32 / 255.0,
                    c[2] as f32 / 255.0,
                ];
                out.weights[i] = weight;
                out.confidences[i] = confidence;
                out.radii[i] = radius.min(self.config.max_radius);
                out.valid[i] = true;
                n_valid += 1;
            }
        }

        log::trace!(
            "preprocessed frame: {}/{} valid pixels",
            n_valid,
            width * height
        );
        out
    }

    fn name(&self) -> &'static str {
        "CpuFrameProcessor"
    }
}
