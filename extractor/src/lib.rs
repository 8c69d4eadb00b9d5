//! Single-pass source extraction for astronomical images.
//!
//! The image is read once, row by row. A tiled [`background::Background`]
//! model is subtracted in-line, the [`scanner::Scanner`] groups
//! above-threshold pixels into connected components using only the current
//! and previous row, and the [`finalize::Finalizer`] measures, optionally
//! deblends and cleans each component before it reaches an
//! [`sink::ObjectSink`]. Memory is bounded by the strip height, the pixel
//! arena capacity and the clean queue size, never by the image height.

pub mod arena;
pub mod background;
pub mod config;
pub mod deblend;
pub mod diagnostics;
pub mod error;
pub mod filter;
pub mod finalize;
pub mod object;
pub mod pipeline;
pub mod scanner;
pub mod sink;
pub mod source;
pub mod strip;

pub use background::Background;
pub use config::{ExtractionConfig, Threshold};
pub use error::{ExtractionError, Result};
pub use object::{FinalizedObject, ObjectFlags};
pub use pipeline::{extract_image, ExtractionSummary, Extractor};
