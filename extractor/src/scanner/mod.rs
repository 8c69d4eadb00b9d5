//! Row-pair connected-component scanner.
//!
//! Rows are consumed strictly in order. The only state carried from one row
//! to the next is a marker per column (what the row above left behind) and,
//! for every object whose last segment ended in the row above, its
//! accumulator stored at that object's starting column. Within a row, open
//! objects live on a stack of [`Segment`]s with a parallel stack of
//! [`AboveStatus`] values describing how the current run links upward.
//!
//! Pixels are linked into the [`PixelArena`]; when the arena is about to run
//! out, the configured [`EvictionPolicy`] picks an open object to shed its
//! pixels. An object is complete once a row passes underneath it without
//! touching it; it is then handed to the caller's `on_close` callback if it
//! has at least `min_area` pixels, and its slots are reclaimed either way.
//!
//! Runs that touch diagonally are joined (8-connectivity).

mod marker;

pub use marker::{AboveStatus, Marker, RunState, Segment};

use crate::arena::{
    Accumulator, Candidate, Chain, EvictionPolicy, LargestFirst, PixelArena, VictimRef,
};
use crate::error::{filled_table, ExtractionError, Result};
use crate::object::{ObjectFlags, PixelRecord};
use log::{debug, warn};
use shared::ImageSize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    /// A pixel belongs to an object when its detection value exceeds this
    pub threshold: f64,
    /// Closed objects with fewer pixels are discarded
    pub min_area: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Pixels above threshold
    pub pixels: usize,
    /// Objects handed to the finalizer
    pub accepted: usize,
    /// Objects discarded for being smaller than the minimum area
    pub rejected: usize,
    /// Times the arena had to shed an object's pixels
    pub evictions: usize,
}

/// A completed component, valid for the duration of the `on_close` call.
#[derive(Clone, Copy)]
pub struct ClosedObject<'a> {
    arena: &'a PixelArena,
    acc: &'a Accumulator,
}

impl<'a> ClosedObject<'a> {
    pub fn new(arena: &'a PixelArena, acc: &'a Accumulator) -> Self {
        Self { arena, acc }
    }

    pub fn pixnb(&self) -> usize {
        self.acc.pixnb
    }

    pub fn flags(&self) -> ObjectFlags {
        self.acc.flags
    }

    pub fn pixels(&self) -> Chain<'a> {
        self.arena.chain(self.acc)
    }
}

#[derive(Clone, Copy)]
struct Row<'r> {
    raw: &'r [f32],
    filtered: Option<&'r [f32]>,
}

impl Row<'_> {
    fn pixel(&self, x: usize, y: usize, threshold: f64) -> Option<PixelRecord> {
        let value = self.raw[x];
        let convolved = self.filtered.map(|f| f[x]);
        let detection = convolved.unwrap_or(value);
        if detection as f64 > threshold {
            Some(PixelRecord {
                x,
                y,
                value,
                convolved,
            })
        } else {
            None
        }
    }
}

pub struct Scanner<P: EvictionPolicy = LargestFirst> {
    size: ImageSize,
    params: ScanParams,
    arena: PixelArena,
    markers: Vec<Marker>,
    stored: Vec<Option<Accumulator>>,
    /// Open objects of the current row; index 0 is a permanent base entry
    segments: Vec<Segment>,
    above: Vec<AboveStatus>,
    policy: P,
    stats: ScanStats,
    next_row: usize,
}

impl Scanner<LargestFirst> {
    /// Scanner evicting the largest open object when the arena fills.
    pub fn new(size: ImageSize, params: ScanParams, arena_capacity: usize) -> Result<Self> {
        Self::with_policy(size, params, arena_capacity, LargestFirst)
    }
}

impl<P: EvictionPolicy> Scanner<P> {
    pub fn with_policy(
        size: ImageSize,
        params: ScanParams,
        arena_capacity: usize,
        policy: P,
    ) -> Result<Self> {
        let arena = PixelArena::new(arena_capacity)?;
        let markers = filled_table("marker row", size.width + 1, Marker::None)?;
        let stored = filled_table("stored segments", size.width + 1, None)?;
        let mut segments = Vec::with_capacity(size.width / 2 + 2);
        segments.push(Segment::new(None, 0, Accumulator::default()));
        Ok(Self {
            size,
            params,
            arena,
            markers,
            stored,
            segments,
            above: Vec::with_capacity(size.width + 2),
            policy,
            stats: ScanStats::default(),
            next_row: 0,
        })
    }

    pub fn arena(&self) -> &PixelArena {
        &self.arena
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Next row expected by [`Scanner::process_row`].
    pub fn next_row(&self) -> usize {
        self.next_row
    }

    /// Pixels currently held by objects that have not closed yet.
    pub fn resident_pixels(&self) -> usize {
        let stored: usize = self.stored.iter().flatten().map(|a| a.pixnb).sum();
        let open: usize = self.segments.iter().map(|s| s.acc.pixnb).sum();
        stored + open
    }

    /// Topmost row reached by any object that has not closed yet.
    ///
    /// Every object closed from now on, and every part a deblender carves
    /// out of it, ends on this row or below it.
    pub fn open_first_row(&self) -> Option<usize> {
        self.stored
            .iter()
            .flatten()
            .chain(self.segments.iter().map(|s| &s.acc))
            .filter_map(Accumulator::first_row)
            .min()
    }

    /// Consume row `y`.
    ///
    /// `raw` holds the background-subtracted values; `filtered`, when
    /// present, holds the values the threshold is applied to. Objects that
    /// complete while scanning this row are passed to `on_close`.
    pub fn process_row<F>(
        &mut self,
        y: usize,
        raw: &[f32],
        filtered: Option<&[f32]>,
        mut on_close: F,
    ) -> Result<()>
    where
        F: FnMut(ClosedObject<'_>) -> Result<()>,
    {
        if y != self.next_row || y >= self.size.height {
            return Err(ExtractionError::InvalidConfig(format!(
                "row {y} scanned out of order (expected {})",
                self.next_row
            )));
        }
        let width = self.size.width;
        if raw.len() != width || filtered.is_some_and(|f| f.len() != width) {
            return Err(ExtractionError::ShortRead {
                row: y,
                expected: width,
                got: raw.len().min(filtered.map_or(usize::MAX, |f| f.len())),
            });
        }
        self.scan_line(y, Some(Row { raw, filtered }), &mut on_close)?;
        self.next_row = y + 1;
        Ok(())
    }

    /// Scan an empty row below the image, closing every remaining object.
    pub fn finish<F>(&mut self, mut on_close: F) -> Result<()>
    where
        F: FnMut(ClosedObject<'_>) -> Result<()>,
    {
        self.scan_line(self.next_row, None, &mut on_close)?;
        debug_assert!(self.stored.iter().all(Option::is_none));
        debug_assert_eq!(self.segments.len(), 1);
        debug!(
            "Scan finished: {} pixels, {} objects accepted, {} rejected, {} evictions",
            self.stats.pixels, self.stats.accepted, self.stats.rejected, self.stats.evictions
        );
        Ok(())
    }

    fn top_mut(&mut self) -> &mut Segment {
        let i = self.segments.len() - 1;
        &mut self.segments[i]
    }

    fn pop_segment(&mut self) -> Option<Segment> {
        if self.segments.len() > 1 {
            self.segments.pop()
        } else {
            None
        }
    }

    fn scan_line<F>(&mut self, y: usize, row: Option<Row<'_>>, on_close: &mut F) -> Result<()>
    where
        F: FnMut(ClosedObject<'_>) -> Result<()>,
    {
        let width = self.size.width;
        let edge_row = y == 0 || y + 1 >= self.size.height;
        let mut cs = RunState::NonObject;
        let mut ps = AboveStatus::Complete;
        self.above.clear();

        for x in 0..=width {
            let incoming = std::mem::take(&mut self.markers[x]);
            let lit = match row {
                Some(r) if x < width => r.pixel(x, y, self.params.threshold),
                _ => None,
            };

            let mut pixel = None;
            if let Some(record) = lit {
                if self.arena.needs_eviction() {
                    self.evict(x, y, cs)?;
                }
                let slot = self
                    .arena
                    .allocate(record)
                    .ok_or(ExtractionError::ArenaExhausted {
                        x,
                        y,
                        capacity: self.arena.capacity(),
                    })?;
                let mut flags = ObjectFlags::empty();
                if edge_row || x == 0 || x + 1 == width {
                    flags |= ObjectFlags::TRUNCATED;
                }
                pixel = Some(Accumulator::single(slot, y, flags));
                self.stats.pixels += 1;

                if cs == RunState::NonObject {
                    cs = RunState::Object;
                    if ps == AboveStatus::Object {
                        let top = self.top_mut();
                        let marker = if top.start.is_none() {
                            top.start = Some(x);
                            Marker::SegmentStart
                        } else {
                            Marker::SegmentContinue
                        };
                        self.markers[x] = marker;
                    } else {
                        self.above.push(ps);
                        self.markers[x] = Marker::SegmentStart;
                        self.segments
                            .push(Segment::new(Some(x), x, Accumulator::default()));
                        ps = AboveStatus::Complete;
                    }
                }
            }

            match incoming {
                Marker::None => {}
                Marker::SegmentStart => {
                    self.above.push(ps);
                    let acc = self.stored[x].take().unwrap_or_default();
                    if cs == RunState::NonObject {
                        self.above.push(AboveStatus::Complete);
                        self.segments.push(Segment::new(None, x, acc));
                    } else {
                        let i = self.segments.len() - 1;
                        self.arena.append(&mut self.segments[i].acc, acc);
                    }
                    ps = AboveStatus::Object;
                }
                Marker::SegmentContinue => {
                    if cs == RunState::Object
                        && ps == AboveStatus::Complete
                        && self.segments.len() > 2
                    {
                        self.above.pop();
                        if let Some(merged) = self.segments.pop() {
                            let i = self.segments.len() - 1;
                            self.arena.append(&mut self.segments[i].acc, merged.acc);
                            match (self.segments[i].start, merged.start) {
                                (None, start) => self.segments[i].start = start,
                                (Some(_), Some(s)) => self.markers[s] = Marker::SegmentContinue,
                                (Some(_), None) => {}
                            }
                        }
                    }
                    ps = AboveStatus::Object;
                }
                Marker::SegmentTentativeEnd => ps = AboveStatus::Incomplete,
                Marker::SegmentConfirmedEnd => {
                    ps = self.above.pop().unwrap_or(AboveStatus::Complete);
                    if cs == RunState::NonObject && ps == AboveStatus::Complete {
                        if let Some(seg) = self.pop_segment() {
                            match seg.start {
                                None => self.close(seg.acc, on_close)?,
                                Some(start) => {
                                    self.markers[seg.end] = Marker::SegmentConfirmedEnd;
                                    self.stored[start] = Some(seg.acc);
                                }
                            }
                        }
                        ps = self.above.pop().unwrap_or(AboveStatus::Complete);
                    }
                }
            }

            if let Some(px) = pixel {
                let i = self.segments.len() - 1;
                self.arena.append(&mut self.segments[i].acc, px);
            } else if cs == RunState::Object {
                cs = RunState::NonObject;
                if ps != AboveStatus::Complete {
                    self.markers[x] = Marker::SegmentTentativeEnd;
                    self.top_mut().end = x;
                } else {
                    ps = self.above.pop().unwrap_or(AboveStatus::Complete);
                    self.markers[x] = Marker::SegmentConfirmedEnd;
                    if let Some(seg) = self.pop_segment() {
                        match seg.start {
                            Some(start) => self.stored[start] = Some(seg.acc),
                            None => self.close(seg.acc, on_close)?,
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn close<F>(&mut self, acc: Accumulator, on_close: &mut F) -> Result<()>
    where
        F: FnMut(ClosedObject<'_>) -> Result<()>,
    {
        debug_assert_eq!(self.arena.chain_len(&acc), acc.pixnb);
        let result = if acc.pixnb >= self.params.min_area {
            self.stats.accepted += 1;
            on_close(ClosedObject::new(&self.arena, &acc))
        } else {
            self.stats.rejected += 1;
            Ok(())
        };
        self.arena.reclaim(acc);
        result
    }

    /// Shed the pixels of one open object chosen by the policy.
    ///
    /// While a run is being extended (`cs` is `Object`) the segment on top of
    /// the stack receives the pixel being allocated and is not a candidate.
    fn evict(&mut self, x: usize, y: usize, cs: RunState) -> Result<()> {
        let mut candidates: Vec<Candidate> = self
            .stored
            .iter()
            .enumerate()
            .filter_map(|(col, entry)| {
                entry.map(|acc| Candidate {
                    location: VictimRef::Stored(col),
                    pixnb: acc.pixnb,
                })
            })
            .collect();
        let open_end = match cs {
            RunState::Object => self.segments.len() - 1,
            RunState::NonObject => self.segments.len(),
        };
        candidates.extend(
            self.segments[..open_end]
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, s)| Candidate {
                    location: VictimRef::Open(i),
                    pixnb: s.acc.pixnb,
                }),
        );

        let exhausted = ExtractionError::ArenaExhausted {
            x,
            y,
            capacity: self.arena.capacity(),
        };
        let victim = match self.policy.select(&candidates) {
            Some(v) if v.pixnb > 1 => v,
            _ => return Err(exhausted),
        };
        let acc = match victim.location {
            VictimRef::Stored(col) => self.stored.get_mut(col).and_then(Option::as_mut),
            VictimRef::Open(i) => self.segments.get_mut(i).map(|s| &mut s.acc),
        };
        let Some(acc) = acc else {
            return Err(exhausted);
        };
        let released = self.arena.shed(acc);
        self.stats.evictions += 1;
        warn!(
            "Pixel arena full at ({x}, {y}): shed {released} of {} pixels from an open object",
            victim.pixnb
        );
        Ok(())
    }
}
