//! Per-column state of the row-pair scanner.

use crate::arena::Accumulator;

/// What the previous row left at a column for the current row to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Marker {
    #[default]
    None,
    /// First segment of an object in the row above starts here
    SegmentStart,
    /// A later segment of an object already started to the left
    SegmentContinue,
    /// Segment ended here but its object was still linked upward
    SegmentTentativeEnd,
    /// Segment ended here and its object is stored at the start column
    SegmentConfirmedEnd,
}

/// Whether the current pixel run is above threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NonObject,
    Object,
}

/// Linkage of the current run to the row above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AboveStatus {
    /// No unresolved segment above
    Complete,
    /// The segment above ended tentatively
    Incomplete,
    /// Inside a segment of the row above
    Object,
}

/// An object open in the current row.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Column of the object's first segment in this row, if it has one yet
    pub start: Option<usize>,
    /// Column just past the last segment that ended tentatively
    pub end: usize,
    pub acc: Accumulator,
}

impl Segment {
    pub fn new(start: Option<usize>, end: usize, acc: Accumulator) -> Self {
        Self { start, end, acc }
    }
}
