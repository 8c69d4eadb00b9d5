//! Error types for the extraction pipeline.
//!
//! Only conditions after which the run cannot continue are errors. Anything
//! an object can carry forward (edge truncation, overflow, deblend failure)
//! is recorded in its flags instead.

use shared::ImageSize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot allocate {count} entries for {what}")]
    Allocation { what: &'static str, count: usize },

    #[error(
        "Pixel arena exhausted at ({x}, {y}): no open object holds more than one pixel \
         (capacity {capacity})"
    )]
    ArenaExhausted { x: usize, y: usize, capacity: usize },

    #[error("Image is constant: no background tile has a positive sigma")]
    ConstantImage,

    #[error("Short read at row {row}: expected {expected} pixels, got {got}")]
    ShortRead {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("Image size mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: ImageSize, got: ImageSize },

    #[error("Diagnostic output failed: {0}")]
    Diagnostics(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Allocate one of the fixed-size core tables, reporting failure instead of
/// aborting the process.
pub(crate) fn filled_table<T: Clone>(what: &'static str, count: usize, fill: T) -> Result<Vec<T>> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(count)
        .map_err(|_| ExtractionError::Allocation { what, count })?;
    table.resize(count, fill);
    Ok(table)
}
