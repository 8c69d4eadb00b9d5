//! Shared components for the streaming source extractor.
//!
//! Geometry (`ImageSize`, `AABB`), robust statistics, detection kernels and
//! deterministic synthetic fields used by the extractor and its tests.

pub mod algo;
pub mod image_proc;
pub mod image_size;

pub use image_size::ImageSize;
