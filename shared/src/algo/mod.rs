//! Numeric algorithms shared between crates.

pub mod stats;

pub use stats::{median, RunningMoments, StatsError};
