//! Core reconstruction algorithms: correspondence rasterization, ICP
//! alignment, and surfel fusion.

pub mod correspondence;
pub mod fusion;
pub mod icp;
