//! Run configuration for a single extraction pass.
//!
//! One `ExtractionConfig` is built (usually from JSON) and validated before a
//! run, then passed by reference to the background model, scanner and
//! finalizer. Nothing in the pipeline mutates it.
//!
//! ```rust
//! use extractor::config::{ExtractionConfig, Threshold};
//!
//! let mut config = ExtractionConfig::default();
//! config.detection.threshold = Threshold::Sigma(3.0);
//! config.memory.pixel_stack = 50_000;
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{ExtractionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Detection threshold specification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Multiple of the global background sigma
    Sigma(f64),
    /// Absolute level above the subtracted background
    Absolute(f64),
}

impl Threshold {
    /// Resolve to an absolute level given the global background sigma.
    pub fn resolve(&self, background_sigma: f64) -> f64 {
        match *self {
            Threshold::Sigma(k) => k * background_sigma,
            Threshold::Absolute(v) => v,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            Threshold::Sigma(v) | Threshold::Absolute(v) => v,
        }
    }
}

/// Tiled background estimation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Tile width in pixels
    pub tile_width: usize,
    /// Tile height in pixels; also the number of rows read per build band
    pub tile_height: usize,
    /// Median filter width over the tile grid (odd, in tiles)
    pub filter_width: usize,
    /// Median filter height over the tile grid (odd, in tiles)
    pub filter_height: usize,
    /// Minimum difference to the local median before a tile is replaced
    pub filter_threshold: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            tile_width: 64,
            tile_height: 64,
            filter_width: 3,
            filter_height: 3,
            filter_threshold: 0.0,
        }
    }
}

/// Optional Gaussian smoothing applied before thresholding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Full width at half maximum of the Gaussian in pixels
    pub fwhm: f64,
    /// Kernel size (odd); derived from the FWHM when absent
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Threshold a pixel must exceed to belong to an object
    pub threshold: Threshold,
    /// Secondary threshold deciding whether deblending is worth attempting
    pub deblend_threshold: Threshold,
    /// Objects with fewer pixels are discarded at closure
    pub min_area: usize,
    /// Detection filter; `None` thresholds the raw subtracted pixels
    pub filter: Option<FilterConfig>,
    /// Thickness of the local background annulus; `None` disables it
    pub local_background: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::Sigma(1.5),
            deblend_threshold: Threshold::Sigma(1.5),
            min_area: 5,
            filter: None,
            local_background: None,
        }
    }
}

/// Memory bounds for the streaming pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Pixel arena capacity, including the free-list sentinel
    pub pixel_stack: usize,
    /// Number of image rows held in the ring buffer
    pub strip_height: usize,
    /// Rows read ahead of the scan line
    pub strip_margin: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            pixel_stack: 300_000,
            strip_height: 256,
            strip_margin: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    /// Merge faint detections that sit in the wings of brighter ones
    pub enabled: bool,
    /// Profile slope used by the cleaning model
    pub param: f64,
    /// Objects held back before emission
    pub stack_size: usize,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            param: 1.0,
            stack_size: 3000,
        }
    }
}

/// Immutable configuration for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub background: BackgroundConfig,
    pub detection: DetectionConfig,
    pub memory: MemoryConfig,
    pub clean: CleanConfig,
}

impl ExtractionConfig {
    /// Load and validate a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Half-size of the detection kernel, 0 without a filter.
    pub fn filter_half_size(&self) -> usize {
        self.detection
            .filter
            .as_ref()
            .map(|f| {
                f.size
                    .unwrap_or_else(|| shared::image_proc::convolve::kernel_size_for_fwhm(f.fwhm))
                    / 2
            })
            .unwrap_or(0)
    }

    /// Rows the reader must stay ahead of the scan line.
    pub fn lookahead(&self) -> usize {
        self.memory.strip_margin.max(self.filter_half_size())
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let bg = &self.background;
        if bg.tile_width == 0 || bg.tile_height == 0 {
            return Err(invalid("background tile size must be positive"));
        }
        if bg.filter_width % 2 == 0 || bg.filter_height % 2 == 0 {
            return Err(invalid("background filter size must be odd"));
        }
        if !(bg.filter_threshold >= 0.0) {
            return Err(invalid("background filter threshold must be >= 0"));
        }

        let det = &self.detection;
        for (name, t) in [
            ("threshold", det.threshold),
            ("deblend_threshold", det.deblend_threshold),
        ] {
            if !t.value().is_finite() {
                return Err(invalid(&format!("detection {name} must be finite")));
            }
        }
        if let Some(filter) = &det.filter {
            if !(filter.fwhm > 0.0) {
                return Err(invalid("filter fwhm must be positive"));
            }
            if matches!(filter.size, Some(s) if s % 2 == 0) {
                return Err(invalid("filter size must be odd"));
            }
        }

        let mem = &self.memory;
        if mem.pixel_stack < 3 {
            return Err(invalid("pixel stack must hold at least 3 slots"));
        }
        let lookahead = self.lookahead();
        if mem.strip_height < 2 * lookahead + 2 {
            return Err(invalid(&format!(
                "strip height {} too small for a lookahead of {} rows",
                mem.strip_height, lookahead
            )));
        }

        let clean = &self.clean;
        if clean.stack_size == 0 {
            return Err(invalid("clean stack size must be positive"));
        }
        if !(clean.param > 0.0) {
            return Err(invalid("clean parameter must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ExtractionError {
    ExtractionError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        ExtractionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_threshold_resolve() {
        assert_eq!(Threshold::Sigma(3.0).resolve(2.0), 6.0);
        assert_eq!(Threshold::Absolute(4.5).resolve(2.0), 4.5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "detection": { "threshold": { "absolute": 5.0 }, "min_area": 1 },
            "memory": { "pixel_stack": 1000 }
        }"#;
        let config: ExtractionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.detection.threshold, Threshold::Absolute(5.0));
        assert_eq!(config.detection.min_area, 1);
        assert_eq!(config.memory.pixel_stack, 1000);
        assert_eq!(config.memory.strip_height, 256);
        assert_eq!(config.background, BackgroundConfig::default());
    }

    #[test]
    fn test_rejects_even_filter() {
        let mut config = ExtractionConfig::default();
        config.background.filter_width = 2;
        assert!(matches!(
            config.validate(),
            Err(ExtractionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_short_strip() {
        let mut config = ExtractionConfig::default();
        config.memory.strip_height = 10;
        config.memory.strip_margin = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lookahead_covers_filter() {
        let mut config = ExtractionConfig::default();
        config.memory.strip_margin = 1;
        config.detection.filter = Some(FilterConfig {
            fwhm: 2.0,
            size: Some(9),
        });
        assert_eq!(config.filter_half_size(), 4);
        assert_eq!(config.lookahead(), 4);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extract.json");

        let mut config = ExtractionConfig::default();
        config.clean.enabled = false;
        config.detection.local_background = Some(24);
        config.save_json_file(&path).unwrap();

        let loaded = ExtractionConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
