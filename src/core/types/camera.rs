//! Pinhole camera model: intrinsics and posed camera.

use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics.
///
/// Focal lengths and principal point are in pixels. The camera looks down
/// +Z in its own frame; +X is right, +Y is down, matching the image grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length along x in pixels
    pub fx: f32,
    /// Focal length along y in pixels
    pub fy: f32,
    /// Principal point x in pixels
    pub cx: f32,
    /// Principal point y in pixels
    pub cy: f32,
}

impl Intrinsics {
    /// Create new intrinsics.
    #[inline]
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Unproject a pixel with a metric depth into a camera-space point.
    #[inline]
    pub fn unproject(&self, u: f32, v: f32, depth: f32) -> Vector3<f32> {
        Vector3::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Project a camera-space point onto the image plane.
    ///
    /// Returns `(u, v, depth)`, or `None` for points at or behind the camera.
    #[inline]
    pub fn project(&self, p: &Vector3<f32>) -> Option<(f32, f32, f32)> {
        if p.z <= 0.0 {
            return None;
        }
        Some((
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
            p.z,
        ))
    }
}

/// A camera: intrinsics plus a camera-to-world pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub intrinsics: Intrinsics,
    /// Camera-to-world transform.
    pub pose: Isometry3<f32>,
}

impl Camera {
    /// Create a camera from intrinsics and a camera-to-world pose.
    #[inline]
    pub fn new(intrinsics: Intrinsics, pose: Isometry3<f32>) -> Self {
        Self { intrinsics, pose }
    }

    /// Camera with the given intrinsics at the world origin.
    #[inline]
    pub fn at_origin(intrinsics: Intrinsics) -> Self {
        Self {
            intrinsics,
            pose: Isometry3::identity(),
        }
    }

    /// Replace the pose, keeping intrinsics.
    #[inline]
    pub fn with_pose(&self, pose: Isometry3<f32>) -> Self {
        Self {
            intrinsics: self.intrinsics,
            pose,
        }
    }
}
