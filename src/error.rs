//! Error types for shilpa-fusion.
//!
//! Per-pixel invalid depth and per-frame tracking degradation are not errors:
//! they are reported through frame classification. The variants here are the
//! only synchronous failures surfaced to the caller, and all of them are
//! programming-contract violations or terminal session states.

use thiserror::Error;

/// shilpa-fusion error type.
#[derive(Error, Debug)]
pub enum FusionError {
    /// A frame's dimensions do not match the dimensions this session was
    /// started with.
    #[error("frame dimension mismatch: session expects {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    /// A frame buffer's length does not equal width * height.
    #[error("{buffer} buffer holds {len} entries, expected {expected} ({width}x{height})")]
    BufferSize {
        buffer: &'static str,
        len: usize,
        expected: usize,
        width: usize,
        height: usize,
    },

    /// The session reached the terminal Failed state; it must be reset
    /// before accumulating further frames.
    #[error("session has failed after repeated tracking loss; call reset() first")]
    SessionFailed,

    /// The session was finalized; it must be reset before accumulating
    /// further frames.
    #[error("session is finalized; call reset() first")]
    SessionFinalized,
}

pub type Result<T> = std::result::Result<T, FusionError>;
