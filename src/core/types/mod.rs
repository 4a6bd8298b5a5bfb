//! Core data types for online surfel reconstruction.

mod camera;
mod frame;
mod surfel;

pub use camera::{Camera, Intrinsics};
pub use frame::{ProcessedFrame, RawFrame};
pub use surfel::{Surfel, SurfelModel, SurfelSnapshot};
