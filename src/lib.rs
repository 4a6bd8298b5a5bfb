//! ShilpaFusion - Online surfel reconstruction from depth+color frames
//!
//! # Architecture
//!
//! The crate is organized into 5 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (session state machine, statistics)          │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │         (correspondence, icp, fusion)               │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  preprocess/                        │  ← Frame processing
//! │      (depth gating, smoothing, unprojection)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   workers/                          │  ← Concurrency
//! │              (fixed worker pool)                    │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                (types, math)                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Pipeline
//!
//! Each incoming `RawFrame` flows through one `accumulate` call:
//!
//! 1. **Preprocess** - gate and optionally smooth the depth buffer, then
//!    unproject into per-pixel points, normals, weights, confidences and
//!    surfel radii
//! 2. **Align** - refine the frame's camera pose against the accumulated
//!    surfel model with projective point-to-plane ICP, using the rasterized
//!    surfel index map for correspondence lookup
//! 3. **Assimilate** - merge aligned points into existing surfels or insert
//!    new ones; periodically prune surfels that never stabilized
//! 4. **Classify** - Succeeded / PoorTracking / LostTracking / Failed, with
//!    the session turning terminal after too many consecutive losses
//!
//! Frame ingestion is strictly sequential; within a frame, preprocessing
//! and rasterization are embarrassingly parallel and may fan out over the
//! worker pool or an injected GPU backend.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Worker pool (depends on nothing internal)
// ============================================================================
pub mod workers;

// ============================================================================
// Layer 3: Frame preprocessing (depends on core)
// ============================================================================
pub mod preprocess;

// ============================================================================
// Layer 4: Algorithms (depends on core, workers, preprocess)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 5: Engine (depends on all layers)
// ============================================================================
pub mod engine;

pub mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use self::core::types::{Camera, Intrinsics, ProcessedFrame, RawFrame};
pub use self::core::types::{Surfel, SurfelModel, SurfelSnapshot};

// Errors
pub use error::{FusionError, Result};

// Preprocessing
pub use preprocess::{CpuFrameProcessor, FrameProcessor, PreprocessConfig, SmoothingConfig};

// Algorithms - Correspondence
pub use algorithms::correspondence::{
    CpuSplatRasterizer, RasterConfig, RasterMode, SplatRasterizer, SurfelIndexMap, EMPTY,
};

// Algorithms - ICP
pub use algorithms::icp::{IcpAligner, IcpConfig, IcpResult};

// Algorithms - Fusion
pub use algorithms::fusion::{AssimilateOutcome, FusionConfig, SurfelIntegrator};

// Engine
pub use engine::{
    FinalStatistics, FrameClassification, FrameMetadata, FrameTiming, ReconstructionSession,
    SessionConfig, SessionStage, SessionStatus,
};

// Workers
pub use workers::WorkerPool;
