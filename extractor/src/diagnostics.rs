//! Optional inspection planes produced alongside the catalog.

use crate::background::Background;
use crate::error::{ExtractionError, Result};
use crate::object::PixelRecord;
use crate::source::write_raw_f32;
use log::{info, warn};
use ndarray::Array2;
use shared::ImageSize;
use std::path::{Path, PathBuf};

/// Side channel for per-pixel diagnostics. Every hook defaults to a no-op.
pub trait Diagnostics {
    /// The background model, once built.
    fn background(&mut self, _background: &Background) {}

    /// A background-subtracted row as it enters the strip.
    fn subtracted_row(&mut self, _y: usize, _row: &[f32]) {}

    /// One pixel of an object passed to the finalizer.
    fn object_pixel(&mut self, _pixel: &PixelRecord) {}

    /// Called once at the end of the run.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {}

/// Full-frame check images: interpolated background, background-subtracted
/// image and the running sum of object footprints.
#[derive(Debug)]
pub struct CheckImages {
    background: Array2<f32>,
    subtracted: Array2<f32>,
    objects: Array2<f32>,
    output: Option<PathBuf>,
    required: bool,
}

impl CheckImages {
    pub fn new(size: ImageSize) -> Self {
        let shape = (size.height, size.width);
        Self {
            background: Array2::zeros(shape),
            subtracted: Array2::zeros(shape),
            objects: Array2::zeros(shape),
            output: None,
            required: false,
        }
    }

    /// Save the planes into `dir` when the run finishes.
    ///
    /// With `required` set a failed save aborts the run; otherwise it is
    /// only logged.
    pub fn with_output<P: AsRef<Path>>(mut self, dir: P, required: bool) -> Self {
        self.output = Some(dir.as_ref().to_path_buf());
        self.required = required;
        self
    }

    pub fn background_plane(&self) -> &Array2<f32> {
        &self.background
    }

    pub fn subtracted_plane(&self) -> &Array2<f32> {
        &self.subtracted
    }

    pub fn objects_plane(&self) -> &Array2<f32> {
        &self.objects
    }

    /// Write `background.raw`, `subtracted.raw` and `objects.raw` into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_raw_f32(dir.join("background.raw"), &self.background)?;
        write_raw_f32(dir.join("subtracted.raw"), &self.subtracted)?;
        write_raw_f32(dir.join("objects.raw"), &self.objects)?;
        info!("Check images written to {}", dir.display());
        Ok(())
    }
}

impl Diagnostics for CheckImages {
    fn background(&mut self, background: &Background) {
        if background.size() != ImageSize::of_array(&self.background) {
            warn!("Check image size differs from the background model; skipping");
            return;
        }
        self.background = background.to_array();
    }

    fn subtracted_row(&mut self, y: usize, row: &[f32]) {
        if y < self.subtracted.nrows() && row.len() == self.subtracted.ncols() {
            for (dst, &src) in self.subtracted.row_mut(y).iter_mut().zip(row) {
                *dst = src;
            }
        }
    }

    fn object_pixel(&mut self, pixel: &PixelRecord) {
        if let Some(v) = self.objects.get_mut([pixel.y, pixel.x]) {
            *v += pixel.value;
        }
    }

    fn finish(&mut self) -> Result<()> {
        let Some(dir) = self.output.clone() else {
            return Ok(());
        };
        match self.save(&dir) {
            Ok(()) => Ok(()),
            Err(e) if !self.required => {
                warn!("Failed to write check images to {}: {e}", dir.display());
                Ok(())
            }
            Err(e) => Err(ExtractionError::Diagnostics(e.to_string())),
        }
    }
}
