//! Projective ICP alignment against the surfel model.
//!
//! Refines a frame's camera pose by alternating rasterized correspondence
//! lookup with a linearized 6-DOF point-to-plane solve:
//!
//! 1. Downsample valid frame points by the configured fraction
//! 2. Rebuild the surfel index map every N iterations (staleness is a
//!    deliberate performance trade-off)
//! 3. Look up the nearest surfel per sampled point through the index map
//! 4. Reject residuals beyond the configured number of standard deviations,
//!    recomputed each iteration
//! 5. Solve the linearized 6-DOF update and compose it into the pose
//! 6. Clamp per-iteration motion to the configured velocity limits scaled
//!    by the frame interval
//! 7. Stop on tolerance or iteration budget
//!
//! Non-convergence is not fatal: the best pose and full diagnostics are
//! returned regardless. The used-correspondence fraction is the primary
//! tracking-quality signal.

mod config;
mod solve;

pub use config::IcpConfig;

use std::sync::Arc;

use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use crate::algorithms::correspondence::{RasterMode, SplatRasterizer, SurfelIndexMap};
use crate::core::math;
use crate::core::types::{Camera, Intrinsics, ProcessedFrame, SurfelModel};
use solve::{solve_point_to_plane, Correspondence};

/// Result of one alignment run.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Refined camera-to-world pose (best estimate, converged or not).
    pub pose: Isometry3<f32>,
    /// Whether the tolerance was reached within the iteration budget.
    pub converged: bool,
    /// Iterations executed.
    pub iterations: u32,
    /// Used correspondences in the last iteration.
    pub used_correspondences: usize,
    /// Used correspondences over sampled points in the last iteration.
    pub used_fraction: f32,
    /// Mean absolute point-to-plane residual of the last iteration, meters.
    pub final_residual: f32,
    /// Mean absolute residual per iteration.
    pub residual_history: Vec<f32>,
    /// Used-correspondence fraction per iteration.
    pub used_fraction_history: Vec<f32>,
    /// Whether any iteration's motion hit the velocity clamp.
    pub motion_clamped: bool,
}

impl IcpResult {
    /// Bootstrap result for an empty model: the initial pose is accepted
    /// verbatim.
    fn bootstrap(pose: Isometry3<f32>, used: usize) -> Self {
        Self {
            pose,
            converged: true,
            iterations: 0,
            used_correspondences: used,
            used_fraction: 1.0,
            final_residual: 0.0,
            residual_history: Vec::new(),
            used_fraction_history: Vec::new(),
            motion_clamped: false,
        }
    }

    fn failed(pose: Isometry3<f32>) -> Self {
        Self {
            pose,
            converged: false,
            iterations: 0,
            used_correspondences: 0,
            used_fraction: 0.0,
            final_residual: f32::MAX,
            residual_history: Vec::new(),
            used_fraction_history: Vec::new(),
            motion_clamped: false,
        }
    }
}

/// Projective ICP aligner.
pub struct IcpAligner {
    config: IcpConfig,
    rasterizer: Arc<dyn SplatRasterizer>,
    /// Sampled pixel indices, reused across iterations.
    sample_buffer: Vec<usize>,
    /// Inlier correspondences, reused across iterations.
    correspondence_buffer: Vec<Correspondence>,
}

impl IcpAligner {
    pub fn new(config: IcpConfig, rasterizer: Arc<dyn SplatRasterizer>) -> Self {
        Self {
            config,
            rasterizer,
            sample_buffer: Vec::with_capacity(4096),
            correspondence_buffer: Vec::with_capacity(4096),
        }
    }

    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Stride-sample the valid pixels by the configured fraction.
    fn sample_points(&mut self, frame: &ProcessedFrame) {
        self.sample_buffer.clear();
        let fraction = self.config.downsample_fraction.clamp(1e-3, 1.0);
        let stride = (1.0 / fraction).round().max(1.0) as usize;
        let mut seen = 0usize;
        for i in 0..frame.len() {
            if !frame.valid[i] {
                continue;
            }
            if seen % stride == 0 {
                self.sample_buffer.push(i);
            }
            seen += 1;
        }
    }

    /// Refine `initial_pose` (camera-to-world) for `frame` against `model`.
    ///
    /// `dt` is the elapsed time since the previous frame in seconds; it
    /// scales the velocity clamp.
    pub fn align(
        &mut self,
        frame: &ProcessedFrame,
        intrinsics: &Intrinsics,
        model: &SurfelModel,
        initial_pose: &Isometry3<f32>,
        dt: f32,
    ) -> IcpResult {
        if model.is_empty() {
            return IcpResult::bootstrap(*initial_pose, frame.valid_count());
        }

        self.sample_points(frame);
        let sampled = self.sample_buffer.len();
        if sampled < self.config.min_correspondences {
            log::debug!("icp: only {sampled} sampled points, skipping alignment");
            return IcpResult::failed(*initial_pose);
        }

        let allowed_translation = self.config.max_linear_velocity * dt.max(1e-3);
        let allowed_rotation = self.config.max_angular_velocity * dt.max(1e-3);
        let max_dist_sq = self.config.max_correspondence_distance.powi(2);

        let mut pose = *initial_pose;
        let mut index_map: Option<SurfelIndexMap> = None;
        let mut result = IcpResult::failed(*initial_pose);
        let mut residuals: Vec<f32> = Vec::with_capacity(sampled);

        // Move the buffer out so iterating does not fight the borrow of self.
        let mut correspondences = std::mem::take(&mut self.correspondence_buffer);

        for iter in 0..self.config.max_iterations {
            result.iterations = iter + 1;

            if index_map.is_none() || iter % self.config.index_rebuild_interval == 0 {
                let camera = Camera::new(*intrinsics, pose);
                index_map =
                    Some(self.rasterizer.rasterize(model, &camera, RasterMode::Alignment(pose)));
            }
            let map = index_map.as_ref().expect("index map rebuilt above");

            // Candidate correspondences through the index map.
            residuals.clear();
            correspondences.clear();
            for &pixel in &self.sample_buffer {
                let Some(surfel_idx) = map.at(pixel) else {
                    continue;
                };
                let Some(surfel) = model.get(surfel_idx) else {
                    continue;
                };
                let point_world = math::transform_point(&pose, &frame.points[pixel]);
                let offset = point_world - surfel.position;
                if offset.norm_squared() > max_dist_sq {
                    continue;
                }
                let residual = surfel.normal.dot(&offset);
                residuals.push(residual);
                correspondences.push(Correspondence {
                    point_world,
                    normal: surfel.normal,
                    residual,
                });
            }

            if correspondences.len() < self.config.min_correspondences {
                result.used_correspondences = correspondences.len();
                result.used_fraction = correspondences.len() as f32 / sampled as f32;
                break;
            }

            // Robust gate: reject residuals beyond k sigma, recomputed from
            // this iteration's distribution.
            let sigma = math::rms(&residuals).max(1e-6);
            let threshold = self.config.outlier_deviations * sigma;
            correspondences.retain(|c| c.residual.abs() <= threshold);

            let used = correspondences.len();
            result.used_correspondences = used;
            result.used_fraction = used as f32 / sampled as f32;
            result.used_fraction_history.push(result.used_fraction);

            if used < self.config.min_correspondences {
                result
                    .residual_history
                    .push(math::mean_abs(&residuals));
                break;
            }

            let mean_residual: f32 =
                correspondences.iter().map(|c| c.residual.abs()).sum::<f32>() / used as f32;
            result.residual_history.push(mean_residual);
            result.final_residual = mean_residual;

            let Some((omega, v)) = solve_point_to_plane(&correspondences) else {
                log::debug!("icp: singular normal equations at iteration {iter}");
                break;
            };

            // Velocity clamp: implausible per-iteration jumps are scaled
            // back to the configured motion budget.
            let clamped_v = math::clamp_norm(v, allowed_translation);
            let clamped_omega = math::clamp_norm(omega, allowed_rotation);
            if clamped_v != v || clamped_omega != omega {
                result.motion_clamped = true;
            }

            let delta = Isometry3::from_parts(
                Translation3::from(clamped_v),
                UnitQuaternion::from_scaled_axis(clamped_omega),
            );
            pose = delta * pose;

            if clamped_v.norm() < self.config.tolerance
                && clamped_omega.norm() < self.config.tolerance
            {
                result.converged = true;
                break;
            }
        }

        self.correspondence_buffer = correspondences;
        result.pose = pose;
        result
    }
}
