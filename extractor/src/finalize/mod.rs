//! Object finalizer.
//!
//! Turns every component closed by the scanner into catalog records:
//!
//! 1. a fast pass gives the bounding box and flux;
//! 2. objects reaching above the rows still held in the strip are flagged
//!    `ISO_BOUNDARY`;
//! 3. objects with enough pixels above the deblend threshold are offered to
//!    the deblender, on an in-place or dense bitmap;
//! 4. each resulting object gets the full measurement (and optionally a
//!    local background) and, after the clean queue if one is enabled, waits
//!    in a pending buffer.
//!
//! Deblending can produce records ending above objects that closed earlier,
//! so the pending buffer only releases records up to a row no later record
//! can end above (see [`Finalizer::release_through`]). The sink therefore
//! sees records in non-decreasing `max_row` order. Ids are assigned in
//! emission order starting at 1.

pub mod bitmap;
pub mod clean;
pub mod moments;

use crate::background::Background;
use crate::config::ExtractionConfig;
use crate::deblend::Deblender;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::object::{FinalizedObject, ObjectFlags};
use crate::scanner::ClosedObject;
use crate::sink::ObjectSink;
use crate::strip::RowWindow;
use bitmap::ObjectBitmap;
use clean::CleanQueue;
use log::{debug, warn};

/// Everything an object can be handed to once it closes.
pub struct Outputs<'o> {
    deblender: Option<&'o mut dyn Deblender>,
    sink: &'o mut dyn ObjectSink,
    diagnostics: &'o mut dyn Diagnostics,
}

impl<'o> Outputs<'o> {
    pub fn new(sink: &'o mut dyn ObjectSink, diagnostics: &'o mut dyn Diagnostics) -> Self {
        Self {
            deblender: None,
            sink,
            diagnostics,
        }
    }

    pub fn with_deblender(mut self, deblender: &'o mut dyn Deblender) -> Self {
        self.deblender = Some(deblender);
        self
    }

    pub fn sink(&mut self) -> &mut dyn ObjectSink {
        &mut *self.sink
    }

    pub fn diagnostics(&mut self) -> &mut dyn Diagnostics {
        &mut *self.diagnostics
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeStats {
    /// Closed objects received from the scanner
    pub received: usize,
    /// Records passed to the sink
    pub emitted: usize,
    /// Objects the deblender split into more than one record
    pub deblended: usize,
    /// Deblender failures
    pub deblend_failures: usize,
    /// Objects absorbed by the clean queue
    pub cleaned: usize,
}

pub struct Finalizer<'b> {
    threshold: f64,
    deblend_threshold: f64,
    filtered: bool,
    background: Option<&'b Background>,
    annulus: Option<usize>,
    clean: Option<CleanQueue>,
    /// Records waiting for every earlier-ending record to be known
    pending: Vec<FinalizedObject>,
    next_id: u64,
    stats: FinalizeStats,
}

impl<'b> Finalizer<'b> {
    /// # Arguments
    /// * `config` - Run configuration (filter, annulus and clean settings)
    /// * `threshold` - Resolved detection threshold
    /// * `deblend_threshold` - Resolved deblend threshold
    /// * `background` - Model used for the local background annulus
    pub fn new(
        config: &ExtractionConfig,
        threshold: f64,
        deblend_threshold: f64,
        background: Option<&'b Background>,
    ) -> Result<Self> {
        let clean = if config.clean.enabled {
            Some(CleanQueue::new(config.clean.param, config.clean.stack_size)?)
        } else {
            None
        };
        Ok(Self {
            threshold,
            deblend_threshold,
            filtered: config.detection.filter.is_some(),
            background,
            annulus: config.detection.local_background,
            clean,
            pending: Vec::new(),
            next_id: 0,
            stats: FinalizeStats::default(),
        })
    }

    pub fn stats(&self) -> FinalizeStats {
        let mut stats = self.stats;
        stats.cleaned = self.clean.as_ref().map_or(0, CleanQueue::merged);
        stats
    }

    /// Records finalized but not yet passed to the sink.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Process one closed object while `window` still holds its last rows.
    pub fn finalize(
        &mut self,
        object: ClosedObject<'_>,
        window: &dyn RowWindow,
        out: &mut Outputs<'_>,
    ) -> Result<()> {
        self.stats.received += 1;
        let preview = moments::preview(object.pixels());
        for p in object.pixels() {
            out.diagnostics.object_pixel(p);
        }

        let mut flags = object.flags();
        if preview.bbox.min_row < window.first_row() {
            flags |= ObjectFlags::ISO_BOUNDARY;
        }

        let mut records = Vec::new();
        match out.deblender.as_deref_mut() {
            Some(deblender) if self.worth_deblending(&object, flags) => {
                let bitmap = if flags.contains(ObjectFlags::ISO_BOUNDARY) || self.filtered {
                    ObjectBitmap::dense(preview.bbox, object.pixels(), self.filtered)?
                } else {
                    ObjectBitmap::in_place(window, preview.bbox)
                };
                match deblender.parcel_out(&object, &bitmap) {
                    Ok(children) if !children.is_empty() => {
                        let split = children.len() > 1;
                        if split {
                            self.stats.deblended += 1;
                        }
                        for child in &children {
                            let mut child_flags = flags | child.flags;
                            if split {
                                child_flags |= ObjectFlags::MERGED;
                            }
                            records.push(moments::measure(
                                child.pixels.iter(),
                                self.threshold,
                                child_flags,
                            ));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "Deblending failed for object at rows {}..={}: {e}",
                            preview.bbox.min_row, preview.bbox.max_row
                        );
                        self.stats.deblend_failures += 1;
                        flags |= ObjectFlags::DEBLEND_OVERFLOW;
                    }
                }
            }
            _ => {}
        }
        if records.is_empty() {
            records.push(moments::measure(object.pixels(), self.threshold, flags));
        }

        if let (Some(background), Some(thickness)) = (self.background, self.annulus) {
            for record in &mut records {
                record.local_background =
                    Some(background.local_background(&record.bbox, window, thickness));
            }
        }

        debug!(
            "Object closed: {} pixels, flux {:.1}, {} record(s)",
            preview.npix,
            preview.flux,
            records.len()
        );
        records.sort_by_key(|r| r.bbox.max_row);
        for record in records {
            self.route(record);
        }
        Ok(())
    }

    /// Emit every pending record ending on or above row `row`.
    ///
    /// The caller guarantees that no object finalized later ends above
    /// `row`: it must not exceed the next row to be scanned nor the first
    /// row of any object still open.
    pub fn release_through(&mut self, row: usize, sink: &mut dyn ObjectSink) -> Result<()> {
        self.pending.sort_by_key(|r| r.bbox.max_row);
        let ready = self.pending.partition_point(|r| r.bbox.max_row <= row);
        let released: Vec<FinalizedObject> = self.pending.drain(..ready).collect();
        for record in released {
            self.emit(record, sink)?;
        }
        Ok(())
    }

    /// Emit everything still held in the clean queue and the pending buffer.
    pub fn flush(&mut self, sink: &mut dyn ObjectSink) -> Result<()> {
        if let Some(queue) = self.clean.as_mut() {
            self.pending.extend(queue.drain_sorted());
        }
        self.release_through(usize::MAX, sink)
    }

    fn worth_deblending(&self, object: &ClosedObject<'_>, flags: ObjectFlags) -> bool {
        if flags.contains(ObjectFlags::OVERFLOW) {
            return false;
        }
        let above = object
            .pixels()
            .filter(|p| p.detection_value() as f64 > self.deblend_threshold)
            .count();
        2 * above > object.pixnb()
    }

    fn route(&mut self, record: FinalizedObject) {
        let ready = match self.clean.as_mut() {
            Some(queue) => queue.push(record),
            None => Some(record),
        };
        self.pending.extend(ready);
    }

    fn emit(&mut self, mut record: FinalizedObject, sink: &mut dyn ObjectSink) -> Result<()> {
        self.next_id += 1;
        record.id = self.next_id;
        sink.emit(record)?;
        self.stats.emitted += 1;
        Ok(())
    }
}
