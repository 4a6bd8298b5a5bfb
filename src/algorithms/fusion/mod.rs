//! Surfel assimilation: merging aligned frames into the model.
//!
//! After alignment, the surfel index map is regenerated at the final pose.
//! Each valid frame point either updates the surfel visible at its pixel
//! (a confidence-weighted running average) or inserts a new surfel.
//! Fusion is append/merge-only: once a frame is assimilated its raw data
//! is discarded and all history lives in surfel state.
//!
//! Independently of per-frame work, a periodic maintenance pass prunes
//! surfels that never stabilized, bounding memory growth.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::algorithms::correspondence::{RasterMode, SplatRasterizer};
use crate::core::math;
use crate::core::types::{Camera, ProcessedFrame, Surfel, SurfelModel};

/// Configuration for surfel assimilation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Upper bound on accumulated surfel confidence.
    #[serde(default = "default_confidence_cap")]
    pub confidence_cap: f32,

    /// Maximum distance along the surfel normal for a point to merge into
    /// it, in meters.
    #[serde(default = "default_merge_distance")]
    pub merge_distance: f32,

    /// Minimum cosine between a point's normal and the surfel's normal for
    /// a merge.
    #[serde(default = "default_merge_normal_cos")]
    pub merge_normal_cos: f32,

    /// Run the pruning pass every this many frames.
    #[serde(default = "default_prune_interval")]
    pub prune_interval: u64,

    /// A surfel still below `stable_confidence` whose last accepted merge
    /// is older than this many frames is pruned.
    #[serde(default = "default_stale_after_frames")]
    pub stale_after_frames: u64,

    /// Confidence at which a surfel is considered part of the stable model
    /// and exempt from pruning.
    #[serde(default = "default_stable_confidence")]
    pub stable_confidence: f32,
}

fn default_confidence_cap() -> f32 {
    100.0
}
fn default_merge_distance() -> f32 {
    0.02
}
fn default_merge_normal_cos() -> f32 {
    0.82
}
fn default_prune_interval() -> u64 {
    30
}
fn default_stale_after_frames() -> u64 {
    60
}
fn default_stable_confidence() -> f32 {
    5.0
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            confidence_cap: default_confidence_cap(),
            merge_distance: default_merge_distance(),
            merge_normal_cos: default_merge_normal_cos(),
            prune_interval: default_prune_interval(),
            stale_after_frames: default_stale_after_frames(),
            stable_confidence: default_stable_confidence(),
        }
    }
}

/// Counts from one assimilation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssimilateOutcome {
    /// Points merged into existing surfels.
    pub merged: usize,
    /// Points inserted as new surfels.
    pub inserted: usize,
}

/// Merges aligned frames into the surfel model.
///
/// The only writer of the model: no concurrent reads or writes are
/// permitted while an assimilation pass runs.
pub struct SurfelIntegrator {
    config: FusionConfig,
    rasterizer: Arc<dyn SplatRasterizer>,
}

impl SurfelIntegrator {
    pub fn new(config: FusionConfig, rasterizer: Arc<dyn SplatRasterizer>) -> Self {
        Self { config, rasterizer }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Assimilate an aligned frame. `camera` carries the refined pose.
    pub fn assimilate(
        &self,
        frame: &ProcessedFrame,
        camera: &Camera,
        model: &mut SurfelModel,
        frame_index: u64,
    ) -> AssimilateOutcome {
        let map = self
            .rasterizer
            .rasterize(model, camera, RasterMode::ViewProjection);

        let mut outcome = AssimilateOutcome::default();
        for i in 0..frame.len() {
            if !frame.valid[i] {
                continue;
            }
            let weight = frame.weights[i];
            if weight <= 0.0 {
                continue;
            }

            let position = math::transform_point(&camera.pose, &frame.points[i]);
            let normal = math::rotate_vector(&camera.pose, &frame.normals[i]);

            let merged = map.at(i).and_then(|idx| model.get_mut(idx)).map(|surfel| {
                let along_normal = surfel.normal.dot(&(position - surfel.position));
                if along_normal.abs() <= self.config.merge_distance
                    && surfel.normal.dot(&normal) >= self.config.merge_normal_cos
                {
                    let c = surfel.confidence;
                    let total = c + weight;
                    surfel.position = (surfel.position * c + position * weight) / total;
                    let blended = surfel.normal * c + normal * weight;
                    let norm = blended.norm();
                    if norm > 1e-12 {
                        surfel.normal = blended / norm;
                    }
                    for ch in 0..3 {
                        surfel.color[ch] =
                            (surfel.color[ch] * c + frame.colors[i][ch] * weight) / total;
                    }
                    surfel.radius = (surfel.radius * c + frame.radii[i] * weight) / total;
                    surfel.confidence = total.min(self.config.confidence_cap);
                    surfel.merge_count += 1;
                    surfel.last_merge_frame = frame_index;
                    true
                } else {
                    false
                }
            });

            match merged {
                Some(true) => outcome.merged += 1,
                _ => {
                    model.push(Surfel {
                        position,
                        normal,
                        color: frame.colors[i],
                        radius: frame.radii[i],
                        confidence: frame.confidences[i].max(weight),
                        merge_count: 0,
                        last_merge_frame: frame_index,
                    });
                    outcome.inserted += 1;
                }
            }
        }

        log::debug!(
            "assimilated frame {}: {} merged, {} inserted, {} surfels total",
            frame_index,
            outcome.merged,
            outcome.inserted,
            model.len()
        );
        outcome
    }

    /// Periodic maintenance: prune surfels that never stabilized.
    ///
    /// Returns the number of surfels removed (0 between intervals).
    pub fn maintain(&self, model: &mut SurfelModel, frame_index: u64) -> usize {
        if frame_index == 0 || frame_index % self.config.prune_interval != 0 {
            return 0;
        }

        let stable = self.config.stable_confidence;
        let stale_after = self.config.stale_after_frames;
        let removed = model.prune(|s| {
            s.confidence >= stable || frame_index.saturating_sub(s.last_merge_frame) <= stale_after
        });

        if removed > 0 {
            log::debug!(
                "pruned {} stale surfels at frame {}, {} remain",
                removed,
                frame_index,
                model.len()
            );
        }
        removed
    }
}
