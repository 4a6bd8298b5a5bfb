//! Reconstruction session orchestrator.
//!
//! One state machine instance per scanning session. Each incoming frame is
//! preprocessed, aligned against the accumulated model, and assimilated,
//! then classified:
//!
//! 1. Unmerged and the consecutive-failure budget is exhausted → `Failed`
//!    (terminal: the session stops accepting frames)
//! 2. Unmerged → `LostTracking` (failure counter increments)
//! 3. Merged with a low used-correspondence fraction → `PoorTracking`
//! 4. Otherwise → `Succeeded`
//!
//! Frame ingestion is strictly sequential: frame k's alignment depends on
//! the surfel state left by frames 1..k−1. Reset and finalize may only
//! happen between frames.

use std::sync::Arc;
use std::time::Instant;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::algorithms::correspondence::{CpuSplatRasterizer, RasterConfig, SplatRasterizer};
use crate::algorithms::fusion::{FusionConfig, SurfelIntegrator};
use crate::algorithms::icp::{IcpAligner, IcpConfig};
use crate::core::types::{RawFrame, SurfelModel, SurfelSnapshot};
use crate::error::{FusionError, Result};
use crate::preprocess::{CpuFrameProcessor, FrameProcessor, PreprocessConfig};
use crate::workers::WorkerPool;

use super::stats::{FinalStatistics, FrameClassification, FrameMetadata, FrameTiming};

/// Pipeline stage of the current (or last) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// No frame processed yet (or just reset).
    Idle,
    Preprocessing,
    Aligning,
    Assimilating,
    /// Last frame finished with this classification.
    Complete(FrameClassification),
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub preprocess: PreprocessConfig,
    pub icp: IcpConfig,
    pub fusion: FusionConfig,

    /// Apply edge-preserving depth smoothing before unprojection.
    #[serde(default = "default_smooth_depth")]
    pub smooth_depth: bool,

    /// Used-correspondence fraction below which a merged frame is
    /// classified PoorTracking.
    #[serde(default = "default_poor_tracking_fraction")]
    pub poor_tracking_fraction: f32,

    /// Consecutive unmerged frames after which the session fails.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Worker threads for parallelizable sub-tasks; 0 disables the pool.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Assumed frame interval in seconds when timestamps are missing or
    /// non-monotonic (velocity clamp scaling).
    #[serde(default = "default_frame_interval")]
    pub default_frame_interval: f32,
}

fn default_smooth_depth() -> bool {
    true
}
fn default_poor_tracking_fraction() -> f32 {
    0.1
}
fn default_max_consecutive_failures() -> u32 {
    8
}
fn default_workers() -> usize {
    4
}
fn default_frame_interval() -> f32 {
    1.0 / 30.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            icp: IcpConfig::default(),
            fusion: FusionConfig::default(),
            smooth_depth: default_smooth_depth(),
            poor_tracking_fraction: default_poor_tracking_fraction(),
            max_consecutive_failures: default_max_consecutive_failures(),
            workers: default_workers(),
            default_frame_interval: default_frame_interval(),
        }
    }
}

/// Pollable session status snapshot.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub stage: SessionStage,
    pub frames_accumulated: u64,
    pub merged_frames: u64,
    pub failed_frames: u64,
    pub consecutive_failures: u32,
    pub surfel_count: usize,
    pub last_classification: Option<FrameClassification>,
    /// Exponential moving average of the frame cycle time, microseconds.
    pub avg_cycle_us: f32,
    pub failed: bool,
    pub finalized: bool,
}

/// Online surfel reconstruction session.
///
/// Not safe for concurrent `accumulate` calls: one synchronous call per
/// frame, in order.
pub struct ReconstructionSession {
    config: SessionConfig,

    preprocessor: Box<dyn FrameProcessor>,
    aligner: IcpAligner,
    integrator: SurfelIntegrator,
    model: SurfelModel,

    stage: SessionStage,
    frames: Vec<FrameMetadata>,
    consecutive_failures: u32,
    failed: bool,
    finalized: bool,

    /// Dimensions fixed by the first frame; later frames must match.
    frame_dims: Option<(usize, usize)>,
    prev_timestamp_us: Option<u64>,
    frame_index: u64,
    avg_cycle_us: f32,

    // Kept alive for the rasterizer's fan-out path.
    pool: Option<Arc<WorkerPool>>,
}

impl ReconstructionSession {
    /// Create a session with the CPU reference backends.
    ///
    /// The rasterizer is built lazily on the first frame because its
    /// configuration needs the frame dimensions; until then the session
    /// holds placeholder backends sized 0×0 that are replaced on first use.
    pub fn new(config: SessionConfig) -> Self {
        let pool = if config.workers > 0 {
            Some(Arc::new(WorkerPool::new(config.workers)))
        } else {
            None
        };
        let raster = Self::build_rasterizer(&config, 0, 0, pool.as_ref());
        let preprocessor = Box::new(CpuFrameProcessor::new(config.preprocess));
        Self::assemble(config, preprocessor, raster, pool)
    }

    /// Create a session with injected compute backends (e.g. GPU
    /// implementations of the preprocessing and rasterization contracts).
    pub fn with_backends(
        config: SessionConfig,
        preprocessor: Box<dyn FrameProcessor>,
        rasterizer: Arc<dyn SplatRasterizer>,
    ) -> Self {
        Self::assemble(config, preprocessor, rasterizer, None)
    }

    fn assemble(
        config: SessionConfig,
        preprocessor: Box<dyn FrameProcessor>,
        rasterizer: Arc<dyn SplatRasterizer>,
        pool: Option<Arc<WorkerPool>>,
    ) -> Self {
        let aligner = IcpAligner::new(config.icp, Arc::clone(&rasterizer));
        let integrator = SurfelIntegrator::new(config.fusion, rasterizer);
        Self {
            config,
            preprocessor,
            aligner,
            integrator,
            model: SurfelModel::new(),
            stage: SessionStage::Idle,
            frames: Vec::new(),
            consecutive_failures: 0,
            failed: false,
            finalized: false,
            frame_dims: None,
            prev_timestamp_us: None,
            frame_index: 0,
            avg_cycle_us: 0.0,
            pool,
        }
    }

    fn build_rasterizer(
        config: &SessionConfig,
        width: usize,
        height: usize,
        pool: Option<&Arc<WorkerPool>>,
    ) -> Arc<dyn SplatRasterizer> {
        let raster_config = RasterConfig::new(width, height);
        match pool {
            Some(pool) => Arc::new(CpuSplatRasterizer::with_pool(
                raster_config,
                Arc::clone(pool),
            )),
            None => Arc::new(CpuSplatRasterizer::new(raster_config)),
        }
    }

    /// Rebind the CPU backends to the session's frame dimensions once the
    /// first frame arrives.
    fn bind_dimensions(&mut self, width: usize, height: usize) {
        self.frame_dims = Some((width, height));
        let raster = Self::build_rasterizer(&self.config, width, height, self.pool.as_ref());
        self.aligner = IcpAligner::new(self.config.icp, Arc::clone(&raster));
        self.integrator = SurfelIntegrator::new(self.config.fusion, raster);
    }

    /// Accumulate one frame. Synchronous; one logical call sequence per
    /// session.
    pub fn accumulate(&mut self, frame: &RawFrame) -> Result<FrameMetadata> {
        if self.failed {
            return Err(FusionError::SessionFailed);
        }
        if self.finalized {
            return Err(FusionError::SessionFinalized);
        }

        match self.frame_dims {
            None => self.bind_dimensions(frame.width, frame.height),
            Some((w, h)) if (w, h) != (frame.width, frame.height) => {
                return Err(FusionError::DimensionMismatch {
                    expected_width: w,
                    expected_height: h,
                    width: frame.width,
                    height: frame.height,
                });
            }
            Some(_) => {}
        }

        let cycle_start = Instant::now();
        let mut timing = FrameTiming::default();

        // =========== Preprocess ===========
        self.stage = SessionStage::Preprocessing;
        let preprocess_start = Instant::now();
        let processed = self.preprocessor.process(frame, self.config.smooth_depth);
        timing.preprocess_us = preprocess_start.elapsed().as_micros() as u64;

        // =========== Align ===========
        self.stage = SessionStage::Aligning;
        let align_start = Instant::now();
        let dt = match self.prev_timestamp_us {
            Some(prev) if frame.timestamp_us > prev => {
                (frame.timestamp_us - prev) as f32 / 1e6
            }
            _ => self.config.default_frame_interval,
        };
        let initial_pose: Isometry3<f32> = frame.camera.pose;
        let icp = self.aligner.align(
            &processed,
            &frame.camera.intrinsics,
            &self.model,
            &initial_pose,
            dt,
        );
        timing.align_us = align_start.elapsed().as_micros() as u64;

        let is_merged =
            icp.converged && icp.used_correspondences >= self.config.icp.min_correspondences;

        // =========== Assimilate ===========
        self.stage = SessionStage::Assimilating;
        let assimilate_start = Instant::now();
        let (outcome, pruned) = if is_merged {
            let camera = frame.camera.with_pose(icp.pose);
            let outcome =
                self.integrator
                    .assimilate(&processed, &camera, &mut self.model, self.frame_index);
            let pruned = self.integrator.maintain(&mut self.model, self.frame_index);
            (outcome, pruned)
        } else {
            (Default::default(), 0)
        };
        timing.assimilate_us = assimilate_start.elapsed().as_micros() as u64;

        // =========== Classify ===========
        let classification = if !is_merged {
            if self.consecutive_failures + 1 >= self.config.max_consecutive_failures {
                self.consecutive_failures += 1;
                self.failed = true;
                log::warn!(
                    "session failed after {} consecutive unmerged frames",
                    self.consecutive_failures
                );
                FrameClassification::Failed
            } else {
                self.consecutive_failures += 1;
                log::debug!(
                    "tracking lost at frame {} ({} consecutive)",
                    self.frame_index,
                    self.consecutive_failures
                );
                FrameClassification::LostTracking
            }
        } else if icp.used_fraction < self.config.poor_tracking_fraction {
            self.consecutive_failures = 0;
            FrameClassification::PoorTracking
        } else {
            self.consecutive_failures = 0;
            FrameClassification::Succeeded
        };
        self.stage = SessionStage::Complete(classification);

        timing.total_us = cycle_start.elapsed().as_micros() as u64;

        // Exponential moving average of the cycle time.
        let alpha = 0.1;
        self.avg_cycle_us = if self.frames.is_empty() {
            timing.total_us as f32
        } else {
            self.avg_cycle_us * (1.0 - alpha) + timing.total_us as f32 * alpha
        };

        let metadata = FrameMetadata {
            classification,
            initial_pose: initial_pose.to_homogeneous(),
            refined_pose: if is_merged {
                icp.pose.to_homogeneous()
            } else {
                initial_pose.to_homogeneous()
            },
            icp_iterations: icp.iterations,
            used_fraction: icp.used_fraction,
            mean_residual: icp.final_residual,
            merged_surfels: outcome.merged,
            inserted_surfels: outcome.inserted,
            pruned_surfels: pruned,
            timing,
            timestamp_us: frame.timestamp_us,
        };

        self.frames.push(metadata.clone());
        self.prev_timestamp_us = Some(frame.timestamp_us);
        self.frame_index += 1;

        Ok(metadata)
    }

    /// Close the session and aggregate statistics. Further `accumulate`
    /// calls are invalid until `reset()`.
    pub fn finalize(&mut self) -> FinalStatistics {
        self.finalized = true;
        FinalStatistics::aggregate(&self.frames)
    }

    /// Clear all surfels and session state. A reset session behaves
    /// identically to a freshly constructed one.
    pub fn reset(&mut self) {
        self.model.clear();
        self.frames.clear();
        self.stage = SessionStage::Idle;
        self.consecutive_failures = 0;
        self.failed = false;
        self.finalized = false;
        self.frame_dims = None;
        self.prev_timestamp_us = None;
        self.frame_index = 0;
        self.avg_cycle_us = 0.0;
    }

    /// Read-only point-cloud snapshot of the current model.
    pub fn export_snapshot(&self) -> SurfelSnapshot {
        SurfelSnapshot::from(&self.model)
    }

    /// Pollable status snapshot.
    pub fn status(&self) -> SessionStatus {
        let merged_frames = self
            .frames
            .iter()
            .filter(|f| f.classification.is_merged())
            .count() as u64;
        SessionStatus {
            stage: self.stage,
            frames_accumulated: self.frames.len() as u64,
            merged_frames,
            failed_frames: self.frames.len() as u64 - merged_frames,
            consecutive_failures: self.consecutive_failures,
            surfel_count: self.model.len(),
            last_classification: self.frames.last().map(|f| f.classification),
            avg_cycle_us: self.avg_cycle_us,
            failed: self.failed,
            finalized: self.finalized,
        }
    }

    /// Current surfel count.
    pub fn surfel_count(&self) -> usize {
        self.model.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
