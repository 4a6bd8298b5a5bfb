//! ICP aligner configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the projective ICP aligner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IcpConfig {
    /// Iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Convergence tolerance on the per-iteration delta: translation norm
    /// in meters and rotation angle in radians are both gated by this.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    /// Fraction of valid frame points sampled per iteration.
    #[serde(default = "default_downsample_fraction")]
    pub downsample_fraction: f32,

    /// Rebuild the surfel index map every this many iterations. Staleness
    /// between rebuilds trades accuracy for speed; it is never a race
    /// because no surfel write happens mid-alignment.
    #[serde(default = "default_index_rebuild_interval")]
    pub index_rebuild_interval: u32,

    /// Correspondences whose residual exceeds this many standard deviations
    /// (recomputed each iteration) are rejected as outliers.
    #[serde(default = "default_outlier_deviations")]
    pub outlier_deviations: f32,

    /// Candidate correspondences farther than this from their surfel are
    /// discarded before the statistical gate, in meters.
    #[serde(default = "default_max_correspondence_distance")]
    pub max_correspondence_distance: f32,

    /// Minimum used correspondences for an iteration (and for the final
    /// result to count as merged).
    #[serde(default = "default_min_correspondences")]
    pub min_correspondences: usize,

    /// Maximum plausible camera linear velocity in m/s; per-iteration
    /// motion is clamped to this times the frame interval.
    #[serde(default = "default_max_linear_velocity")]
    pub max_linear_velocity: f32,

    /// Maximum plausible camera angular velocity in rad/s.
    #[serde(default = "default_max_angular_velocity")]
    pub max_angular_velocity: f32,
}

fn default_max_iterations() -> u32 {
    30
}
fn default_tolerance() -> f32 {
    1e-4
}
fn default_downsample_fraction() -> f32 {
    0.25
}
fn default_index_rebuild_interval() -> u32 {
    4
}
fn default_outlier_deviations() -> f32 {
    2.5
}
fn default_max_correspondence_distance() -> f32 {
    0.1
}
fn default_min_correspondences() -> usize {
    40
}
fn default_max_linear_velocity() -> f32 {
    1.0
}
fn default_max_angular_velocity() -> f32 {
    2.0
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            downsample_fraction: default_downsample_fraction(),
            index_rebuild_interval: default_index_rebuild_interval(),
            outlier_deviations: default_outlier_deviations(),
            max_correspondence_distance: default_max_correspondence_distance(),
            min_correspondences: default_min_correspondences(),
            max_linear_velocity: default_max_linear_velocity(),
            max_angular_velocity: default_max_angular_velocity(),
        }
    }
}
