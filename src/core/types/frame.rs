//! Raw and processed frame types.
//!
//! `RawFrame` is the immutable sensor input: a depth buffer, a color buffer
//! and the camera that captured them. `ProcessedFrame` is the derived
//! per-pixel geometry produced by the depth preprocessor, aligned 1:1 with
//! the raw frame's pixel grid.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::Camera;
use crate::error::{FusionError, Result};

/// A raw depth+color frame. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    /// Camera that captured this frame (intrinsics + sensor-provided pose).
    pub camera: Camera,
    pub width: usize,
    pub height: usize,
    /// Metric depth per pixel, row-major. Non-finite or non-positive values
    /// mark missing returns.
    pub depth: Vec<f32>,
    /// RGB color per pixel, row-major.
    pub color: Vec<[u8; 3]>,
    /// Capture time in microseconds.
    pub timestamp_us: u64,
}

impl RawFrame {
    /// Build a frame, validating that both buffers hold exactly
    /// `width * height` entries.
    pub fn new(
        camera: Camera,
        width: usize,
        height: usize,
        depth: Vec<f32>,
        color: Vec<[u8; 3]>,
        timestamp_us: u64,
    ) -> Result<Self> {
        let expected = width * height;
        if depth.len() != expected {
            return Err(FusionError::BufferSize {
                buffer: "depth",
                len: depth.len(),
                expected,
                width,
                height,
            });
        }
        if color.len() != expected {
            return Err(FusionError::BufferSize {
                buffer: "color",
                len: color.len(),
                expected,
                width,
                height,
            });
        }
        Ok(Self {
            camera,
            width,
            height,
            depth,
            color,
            timestamp_us,
        })
    }

    /// Row-major index of pixel (u, v).
    #[inline]
    pub fn index(&self, u: usize, v: usize) -> usize {
        v * self.width + u
    }

    /// Number of pixels.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-pixel geometry derived from a `RawFrame`.
///
/// Every vector holds exactly `width * height` entries; entries with
/// `valid[i] == false` carry unspecified placeholder values and must be
/// skipped by consumers.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub width: usize,
    pub height: usize,
    /// Camera-space points.
    pub points: Vec<Vector3<f32>>,
    /// Camera-space unit normals, oriented toward the camera.
    pub normals: Vec<Vector3<f32>>,
    /// Linear RGB in [0, 1].
    pub colors: Vec<[f32; 3]>,
    /// Fusion weight penalizing grazing incidence and long range.
    pub weights: Vec<f32>,
    /// Measurement confidence from sensor and geometric stability.
    pub confidences: Vec<f32>,
    /// Surfel radius estimate per pixel, in meters.
    pub radii: Vec<f32>,
    pub valid: Vec<bool>,
}

impl ProcessedFrame {
    /// Allocate an all-invalid frame of the given dimensions.
    pub fn invalid(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            width,
            height,
            points: vec![Vector3::zeros(); n],
            normals: vec![Vector3::zeros(); n],
            colors: vec![[0.0; 3]; n],
            weights: vec![0.0; n],
            confidences: vec![0.0; n],
            radii: vec![0.0; n],
            valid: vec![false; n],
        }
    }

    /// Row-major index of pixel (u, v).
    #[inline]
    pub fn index(&self, u: usize, v: usize) -> usize {
        v * self.width + u
    }

    /// Number of pixels (valid and invalid).
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of valid pixels.
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}
