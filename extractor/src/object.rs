//! Object records produced by the extractor.

use bitflags::bitflags;
use serde::{Serialize, Serializer};
use shared::image_proc::AABB;

bitflags! {
    /// Quality flags attached to every detection.
    ///
    /// Bit values follow the usual astronomical catalog convention so the
    /// numeric column can be compared with other extraction tools.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u8 {
        /// Object was split from a larger detection by the deblender
        const MERGED = 0x02;
        /// Object touches the first/last row or column of the image
        const TRUNCATED = 0x08;
        /// Object extends above the rows still held in the strip buffer
        const ISO_BOUNDARY = 0x20;
        /// Deblending was attempted and failed
        const DEBLEND_OVERFLOW = 0x40;
        /// Pixels were shed to relieve a full pixel arena
        const OVERFLOW = 0x80;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl Serialize for ObjectFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

/// One above-threshold pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRecord {
    /// Column
    pub x: usize,
    /// Row
    pub y: usize,
    /// Background-subtracted value
    pub value: f32,
    /// Filtered value, present when a detection filter is active
    pub convolved: Option<f32>,
}

impl PixelRecord {
    /// Value the detection threshold was applied to.
    pub fn detection_value(&self) -> f32 {
        self.convolved.unwrap_or(self.value)
    }
}

/// A sub-object returned by a deblender, owning its pixels.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub pixels: Vec<PixelRecord>,
    pub flags: ObjectFlags,
}

/// Background estimated from an annulus around one object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocalBackground {
    /// Residual level relative to the subtracted global background
    pub level: f64,
    pub sigma: f64,
}

/// Catalog record for one emitted object.
///
/// Positions are absolute image coordinates (column `x`, row `y`); the
/// second moments are in pixel² and `theta` is in degrees within (-90, 90].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedObject {
    /// Sequential 1-based id, assigned at emission
    pub id: u64,
    pub bbox: AABB,
    pub npix: usize,
    pub flux: f64,
    pub peak: f64,
    pub peak_x: usize,
    pub peak_y: usize,
    pub x: f64,
    pub y: f64,
    pub x2: f64,
    pub y2: f64,
    pub xy: f64,
    pub a: f64,
    pub b: f64,
    pub theta: f64,
    pub cxx: f64,
    pub cyy: f64,
    pub cxy: f64,
    /// Isophotal area correction used by the cleaning model
    pub area_correction: f64,
    /// Detection threshold the object was extracted at
    pub threshold: f64,
    pub local_background: Option<LocalBackground>,
    pub flags: ObjectFlags,
}

impl FinalizedObject {
    /// Fold another object into this one.
    ///
    /// Pixel counts and fluxes add, the brighter peak wins and the bounding
    /// boxes are unioned. The `MERGED` bit of the absorbed object is not
    /// propagated.
    pub fn absorb(&mut self, other: &FinalizedObject) {
        self.npix += other.npix;
        self.flux += other.flux;
        if other.peak > self.peak {
            self.peak = other.peak;
            self.peak_x = other.peak_x;
            self.peak_y = other.peak_y;
        }
        self.bbox = self.bbox.merge(&other.bbox);
        self.flags |= other.flags & !ObjectFlags::MERGED;
    }
}
