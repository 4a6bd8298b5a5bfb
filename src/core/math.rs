//! Small numeric helpers shared across the reconstruction pipeline.

use nalgebra::{Isometry3, Point3, Vector3};

/// Transform a camera/world-space point (stored as a vector) by an isometry.
#[inline]
pub fn transform_point(iso: &Isometry3<f32>, p: &Vector3<f32>) -> Vector3<f32> {
    iso.transform_point(&Point3::from(*p)).coords
}

/// Rotate a direction vector by an isometry (no translation).
#[inline]
pub fn rotate_vector(iso: &Isometry3<f32>, v: &Vector3<f32>) -> Vector3<f32> {
    iso.rotation * v
}

/// Clamp a vector's magnitude to `max_norm`, preserving direction.
///
/// Returns the vector unchanged when it is already within bounds or when
/// `max_norm` is non-positive.
#[inline]
pub fn clamp_norm(v: Vector3<f32>, max_norm: f32) -> Vector3<f32> {
    if max_norm <= 0.0 {
        return v;
    }
    let norm = v.norm();
    if norm > max_norm {
        v * (max_norm / norm)
    } else {
        v
    }
}

/// Root-mean-square of a residual slice. Returns 0.0 for an empty slice.
pub fn rms(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = values.iter().map(|r| r * r).sum();
    (sum_sq / values.len() as f32).sqrt()
}

/// Mean of the absolute values of a slice. Returns 0.0 for an empty slice.
pub fn mean_abs(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|r| r.abs()).sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_transform_point_translation() {
        let iso = Isometry3::from_parts(
            Translation3::new(1.0, 2.0, 3.0),
            UnitQuaternion::identity(),
        );
        let p = transform_point(&iso, &Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 2.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(p.z, 3.0);
    }

    #[test]
    fn test_rotate_vector_ignores_translation() {
        let iso = Isometry3::from_parts(
            Translation3::new(5.0, 5.0, 5.0),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.0, FRAC_PI_2)),
        );
        let v = rotate_vector(&iso, &Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_clamp_norm_within_bounds() {
        let v = clamp_norm(Vector3::new(0.1, 0.0, 0.0), 1.0);
        assert_relative_eq!(v.x, 0.1);
    }

    #[test]
    fn test_clamp_norm_clamps() {
        let v = clamp_norm(Vector3::new(3.0, 4.0, 0.0), 1.0);
        assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-6);
        // Direction preserved
        assert_relative_eq!(v.x / v.y, 3.0 / 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rms_and_mean_abs() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(mean_abs(&[]), 0.0);
        assert_relative_eq!(rms(&[3.0, 4.0]), (12.5f32).sqrt(), epsilon = 1e-6);
        assert_relative_eq!(mean_abs(&[-1.0, 3.0]), 2.0);
    }
}
