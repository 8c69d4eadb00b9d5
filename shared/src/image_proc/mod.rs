//! Image processing helpers shared by the extractor.

pub mod aabb;
pub mod convolve;
pub mod noise;

pub use aabb::AABB;
pub use convolve::gaussian_kernel;
pub use noise::{add_gaussian_spot, simple_normal_array};
