//! Per-frame metadata and end-of-session statistics.

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// Classification of one completed frame, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameClassification {
    /// Frame merged with healthy tracking.
    Succeeded,
    /// Frame merged but the used-correspondence fraction was low.
    PoorTracking,
    /// Frame failed to merge; the session keeps accepting frames.
    LostTracking,
    /// Frame failed to merge and exhausted the consecutive-failure budget.
    /// Terminal: the session stops accepting frames until reset.
    Failed,
}

impl FrameClassification {
    /// Whether the frame's points were assimilated into the model.
    #[inline]
    pub fn is_merged(self) -> bool {
        matches!(self, Self::Succeeded | Self::PoorTracking)
    }
}

/// Wall-clock timing of one frame's pipeline stages, in microseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FrameTiming {
    pub preprocess_us: u64,
    pub align_us: u64,
    pub assimilate_us: u64,
    pub total_us: u64,
}

/// Everything recorded about one accumulated frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub classification: FrameClassification,
    /// Sensor-provided camera-to-world pose.
    pub initial_pose: Matrix4<f32>,
    /// Pose after ICP refinement (equal to initial when unmerged).
    pub refined_pose: Matrix4<f32>,
    pub icp_iterations: u32,
    /// Used-correspondence fraction from alignment.
    pub used_fraction: f32,
    /// Mean absolute correspondence residual of the final iteration, in
    /// meters; `f32::MAX` when alignment produced none.
    pub mean_residual: f32,
    pub merged_surfels: usize,
    pub inserted_surfels: usize,
    pub pruned_surfels: usize,
    pub timing: FrameTiming,
    pub timestamp_us: u64,
}

/// Aggregated statistics for a finalized session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalStatistics {
    /// Frames whose points entered the model.
    pub merged_frame_count: u64,
    /// Frames that failed to merge (LostTracking and Failed).
    pub failed_frame_count: u64,
    /// Average framerate over the session's timestamp span, in Hz.
    pub average_framerate: f32,
    /// Average ICP iterations per frame.
    pub average_icp_iterations: f32,
    /// Average correspondence error over merged frames, in meters.
    pub average_correspondence_error: f32,
}

impl FinalStatistics {
    /// Aggregate from recorded frame metadata. Zero frames (or a single
    /// frame, for the rate) produce zeros rather than division errors.
    pub fn aggregate(frames: &[FrameMetadata]) -> Self {
        if frames.is_empty() {
            return Self::default();
        }

        let merged_frame_count = frames
            .iter()
            .filter(|f| f.classification.is_merged())
            .count() as u64;
        let failed_frame_count = frames.len() as u64 - merged_frame_count;

        let average_framerate = if frames.len() >= 2 {
            let first = frames.first().map(|f| f.timestamp_us).unwrap_or(0);
            let last = frames.last().map(|f| f.timestamp_us).unwrap_or(0);
            let span_s = last.saturating_sub(first) as f32 / 1e6;
            if span_s > 0.0 {
                (frames.len() - 1) as f32 / span_s
            } else {
                0.0
            }
        } else {
            0.0
        };

        let average_icp_iterations =
            frames.iter().map(|f| f.icp_iterations as f32).sum::<f32>() / frames.len() as f32;

        let residuals: Vec<f32> = frames
            .iter()
            .filter(|f| f.classification.is_merged() && f.mean_residual.is_finite())
            .map(|f| f.mean_residual)
            .collect();
        let average_correspondence_error = if residuals.is_empty() {
            0.0
        } else {
            residuals.iter().sum::<f32>() / residuals.len() as f32
        };

        Self {
            merged_frame_count,
            failed_frame_count,
            average_framerate,
            average_icp_iterations,
            average_correspondence_error,
        }
    }
}
