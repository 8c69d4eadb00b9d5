//! Driver tying the background model, strip, scanner and finalizer together.
//!
//! ```rust
//! use extractor::config::{ExtractionConfig, Threshold};
//! use extractor::diagnostics::NoDiagnostics;
//! use extractor::object::FinalizedObject;
//! use extractor::pipeline::extract_image;
//! use extractor::source::ArraySource;
//! use shared::image_proc::{add_gaussian_spot, simple_normal_array};
//!
//! let mut image = simple_normal_array((128, 128), 100.0, 1.0, 7);
//! add_gaussian_spot(&mut image, 64.0, 40.0, 200.0, 1.5);
//!
//! let mut config = ExtractionConfig::default();
//! config.detection.threshold = Threshold::Sigma(5.0);
//!
//! let mut catalog: Vec<FinalizedObject> = Vec::new();
//! let summary = extract_image(
//!     ArraySource::from_f64(&image),
//!     &config,
//!     None,
//!     &mut catalog,
//!     &mut NoDiagnostics,
//! )
//! .unwrap();
//! assert_eq!(summary.emitted, catalog.len());
//! ```

use crate::background::Background;
use crate::config::ExtractionConfig;
use crate::deblend::Deblender;
use crate::diagnostics::Diagnostics;
use crate::error::{filled_table, ExtractionError, Result};
use crate::filter::DetectionFilter;
use crate::finalize::{Finalizer, Outputs};
use crate::scanner::{ScanParams, Scanner};
use crate::sink::ObjectSink;
use crate::source::{BackgroundSubtracted, PixelSource};
use crate::strip::{RowWindow, Strip};
use log::info;
use serde::Serialize;

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExtractionSummary {
    /// Records passed to the sink
    pub emitted: usize,
    /// Components discarded for being smaller than the minimum area
    pub rejected: usize,
    /// Times the pixel arena had to shed an object
    pub evictions: usize,
    /// Objects split by the deblender
    pub deblended: usize,
    /// Objects absorbed by the clean queue
    pub cleaned: usize,
    /// Pixels above the detection threshold
    pub pixels_detected: usize,
    /// Detection threshold applied to the subtracted image
    pub threshold: f64,
    pub background_level: f64,
    pub background_sigma: f64,
}

/// One detection pass over a background-subtracted source.
pub struct Extractor<'c> {
    config: &'c ExtractionConfig,
    threshold: f64,
    deblend_threshold: f64,
    background: Option<&'c Background>,
}

impl<'c> Extractor<'c> {
    /// # Arguments
    /// * `config` - Validated run configuration
    /// * `threshold` - Absolute detection threshold
    /// * `deblend_threshold` - Absolute threshold deciding deblend attempts
    pub fn new(
        config: &'c ExtractionConfig,
        threshold: f64,
        deblend_threshold: f64,
    ) -> Result<Self> {
        config.validate()?;
        if !threshold.is_finite() || !deblend_threshold.is_finite() {
            return Err(ExtractionError::InvalidConfig(format!(
                "thresholds must be finite (got {threshold}, {deblend_threshold})"
            )));
        }
        Ok(Self {
            config,
            threshold,
            deblend_threshold,
            background: None,
        })
    }

    /// Attach the background model, enabling the local background annulus.
    pub fn with_background(mut self, background: &'c Background) -> Self {
        self.background = Some(background);
        self
    }

    /// Extract every object from `source`, which must already be
    /// background-subtracted.
    pub fn run<S: PixelSource + ?Sized>(
        &self,
        source: &mut S,
        deblender: Option<&mut dyn Deblender>,
        sink: &mut dyn ObjectSink,
        diagnostics: &mut dyn Diagnostics,
    ) -> Result<ExtractionSummary> {
        let size = source.size();
        let config = self.config;
        let lookahead = config.lookahead();
        let filter = config.detection.filter.as_ref().map(DetectionFilter::from_config);

        let mut strip = Strip::new(
            size.width,
            size.height,
            config.memory.strip_height,
            filter.is_some(),
        )?;
        let mut scanner = Scanner::new(
            size,
            ScanParams {
                threshold: self.threshold,
                min_area: config.detection.min_area,
            },
            config.memory.pixel_stack,
        )?;
        let mut finalizer = Finalizer::new(
            config,
            self.threshold,
            self.deblend_threshold,
            self.background,
        )?;
        let mut out = Outputs::new(sink, diagnostics);
        if let Some(d) = deblender {
            out = out.with_deblender(d);
        }

        info!(
            "Extracting {size} image: threshold {:.3}, lookahead {lookahead} rows",
            self.threshold
        );
        let mut row = filled_table("input row", size.width, 0.0f32)?;
        for y_read in 0..size.height {
            source.next_row(&mut row)?;
            out.diagnostics().subtracted_row(y_read, &row);
            strip.push_row(&row)?;
            if y_read >= lookahead {
                scan_row(
                    y_read - lookahead,
                    &mut strip,
                    filter.as_ref(),
                    &mut scanner,
                    &mut finalizer,
                    &mut out,
                )?;
            }
        }
        for y in size.height.saturating_sub(lookahead)..size.height {
            scan_row(
                y,
                &mut strip,
                filter.as_ref(),
                &mut scanner,
                &mut finalizer,
                &mut out,
            )?;
        }
        scanner.finish(|object| finalizer.finalize(object, &strip, &mut out))?;
        finalizer.flush(out.sink())?;
        out.sink().finish()?;
        out.diagnostics().finish()?;

        let scan = scanner.stats();
        let fin = finalizer.stats();
        let summary = ExtractionSummary {
            emitted: fin.emitted,
            rejected: scan.rejected,
            evictions: scan.evictions,
            deblended: fin.deblended,
            cleaned: fin.cleaned,
            pixels_detected: scan.pixels,
            threshold: self.threshold,
            background_level: self.background.map_or(0.0, Background::global_level),
            background_sigma: self.background.map_or(0.0, Background::global_sigma),
        };
        info!(
            "Extraction finished: {} objects emitted, {} rejected below minimum area, {} evictions",
            summary.emitted, summary.rejected, summary.evictions
        );
        Ok(summary)
    }
}

fn scan_row(
    y: usize,
    strip: &mut Strip,
    filter: Option<&DetectionFilter>,
    scanner: &mut Scanner,
    finalizer: &mut Finalizer<'_>,
    out: &mut Outputs<'_>,
) -> Result<()> {
    if let Some(filter) = filter {
        strip.apply_filter(filter, y);
    }
    let strip: &Strip = strip;
    let scrolled = || {
        ExtractionError::InvalidConfig(format!(
            "row {y} left the strip before it was scanned (rows {}..{} held)",
            strip.first_row(),
            strip.end_row()
        ))
    };
    let raw = strip.row(y).ok_or_else(scrolled)?;
    let filtered = match filter {
        Some(_) => Some(strip.filtered_row(y).ok_or_else(scrolled)?),
        None => None,
    };
    scanner.process_row(y, raw, filtered, |object| {
        finalizer.finalize(object, strip, out)
    })?;
    // Objects closing later end on row y + 1 or below, or below the top of
    // an object that is still open.
    let settled = scanner
        .open_first_row()
        .map_or(y + 1, |first| first.min(y + 1));
    finalizer.release_through(settled, out.sink())
}

/// Build the background model from `source`, resolve the thresholds
/// against its global sigma and run the detection pass.
pub fn extract_image<S: PixelSource>(
    mut source: S,
    config: &ExtractionConfig,
    deblender: Option<&mut dyn Deblender>,
    sink: &mut dyn ObjectSink,
    diagnostics: &mut dyn Diagnostics,
) -> Result<ExtractionSummary> {
    config.validate()?;
    let background = Background::build(&mut source, &config.background)?;
    diagnostics.background(&background);

    let sigma = background.global_sigma();
    let threshold = config.detection.threshold.resolve(sigma);
    let deblend_threshold = config.detection.deblend_threshold.resolve(sigma);

    let mut subtracted = BackgroundSubtracted::new(source, &background)?;
    Extractor::new(config, threshold, deblend_threshold)?
        .with_background(&background)
        .run(&mut subtracted, deblender, sink, diagnostics)
}
