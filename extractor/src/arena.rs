//! Fixed-capacity pixel arena.
//!
//! Every above-threshold pixel of an open object lives in exactly one slot of
//! the arena. Objects never own pixel copies; an [`Accumulator`] only holds
//! the head and tail handles of a singly linked chain threaded through the
//! arena's `next` table. Free slots form one more chain, terminated by a
//! sentinel slot that is never handed out.
//!
//! Chains are spliced in O(1) (`append`), returned wholesale to the free list
//! (`reclaim`) or trimmed down to their head slot under memory pressure
//! (`shed`). Which open object gets trimmed is decided by an
//! [`EvictionPolicy`].

use crate::error::{filled_table, Result};
use crate::object::{ObjectFlags, PixelRecord};

/// Opaque handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Running state of one open object: pixel count, flags and chain ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accumulator {
    pub pixnb: usize,
    pub flags: ObjectFlags,
    /// Topmost row the object has reached; meaningless while `pixnb` is 0
    first_row: usize,
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

impl Accumulator {
    /// A one-pixel chain for a pixel on row `row`.
    pub fn single(slot: SlotId, row: usize, flags: ObjectFlags) -> Self {
        Self {
            pixnb: 1,
            flags,
            first_row: row,
            head: Some(slot),
            tail: Some(slot),
        }
    }

    /// Topmost row reached, `None` for an empty accumulator.
    ///
    /// Shedding keeps this value, so it never lies below any pixel the
    /// object still holds.
    pub fn first_row(&self) -> Option<usize> {
        (self.pixnb > 0).then_some(self.first_row)
    }
}

#[derive(Debug)]
pub struct PixelArena {
    records: Vec<PixelRecord>,
    next: Vec<Option<SlotId>>,
    free_head: SlotId,
    free_tail: SlotId,
    free_count: usize,
}

impl PixelArena {
    /// Create an arena of `capacity` slots, one of which is the free-list
    /// sentinel.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = capacity.clamp(2, u32::MAX as usize);
        let records = filled_table("pixel arena", capacity, PixelRecord::default())?;
        let mut next = filled_table("pixel arena links", capacity, None)?;
        for (i, link) in next.iter_mut().enumerate().take(capacity - 1) {
            *link = Some(SlotId(i as u32 + 1));
        }
        Ok(Self {
            records,
            next,
            free_head: SlotId(0),
            free_tail: SlotId(capacity as u32 - 1),
            free_count: capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Slots on the free list, sentinel included.
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// True when the next allocation would leave only the sentinel free.
    pub fn needs_eviction(&self) -> bool {
        self.free_count <= 2
    }

    /// Pop the free-list head and store `record` in it.
    ///
    /// Returns `None` when only the sentinel is left.
    pub fn allocate(&mut self, record: PixelRecord) -> Option<SlotId> {
        if self.free_head == self.free_tail {
            return None;
        }
        let slot = self.free_head;
        self.free_head = self.next[slot.index()]?;
        self.next[slot.index()] = None;
        self.records[slot.index()] = record;
        self.free_count -= 1;
        Some(slot)
    }

    /// Splice `src` onto the end of `dst`, OR-ing flags and adding counts.
    pub fn append(&mut self, dst: &mut Accumulator, src: Accumulator) {
        if let Some(row) = src.first_row() {
            dst.first_row = dst.first_row().map_or(row, |r| r.min(row));
        }
        dst.flags |= src.flags;
        dst.pixnb += src.pixnb;
        match (dst.tail, src.head) {
            (_, None) => {}
            (None, Some(_)) => {
                dst.head = src.head;
                dst.tail = src.tail;
            }
            (Some(tail), Some(head)) => {
                self.next[tail.index()] = Some(head);
                dst.tail = src.tail;
            }
        }
    }

    /// Return a whole chain to the free list.
    pub fn reclaim(&mut self, acc: Accumulator) {
        if let (Some(head), Some(tail)) = (acc.head, acc.tail) {
            self.next[tail.index()] = Some(self.free_head);
            self.free_head = head;
            self.free_count += acc.pixnb;
        }
    }

    /// Release every slot of a chain except its head and mark it overflowed.
    ///
    /// Returns the number of slots released.
    pub fn shed(&mut self, acc: &mut Accumulator) -> usize {
        let Some(head) = acc.head else {
            return 0;
        };
        let released = acc.pixnb.saturating_sub(1);
        if let (Some(rest), Some(tail)) = (self.next[head.index()], acc.tail) {
            self.next[tail.index()] = Some(self.free_head);
            self.free_head = rest;
            self.free_count += released;
        }
        self.next[head.index()] = None;
        acc.tail = Some(head);
        acc.pixnb = 1;
        acc.flags |= ObjectFlags::OVERFLOW;
        released
    }

    /// Iterate over the pixels of a chain from head to tail.
    pub fn chain(&self, acc: &Accumulator) -> Chain<'_> {
        Chain {
            arena: self,
            cursor: acc.head,
        }
    }

    /// Number of slots reachable from an accumulator's head.
    pub fn chain_len(&self, acc: &Accumulator) -> usize {
        self.chain(acc).count()
    }
}

/// Iterator over one chain of the arena.
#[derive(Clone)]
pub struct Chain<'a> {
    arena: &'a PixelArena,
    cursor: Option<SlotId>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a PixelRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        self.cursor = self.arena.next[slot.index()];
        Some(&self.arena.records[slot.index()])
    }
}

/// Location of an eviction candidate inside the scanner's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimRef {
    /// Completed segment stored at this starting column
    Stored(usize),
    /// Entry of the open-segment stack
    Open(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub location: VictimRef,
    pub pixnb: usize,
}

/// Chooses which open object gives up its pixels when the arena is full.
pub trait EvictionPolicy {
    fn select(&self, candidates: &[Candidate]) -> Option<Candidate>;
}

/// Evict the object holding the most pixels; the first one wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirst;

impl EvictionPolicy for LargestFirst {
    fn select(&self, candidates: &[Candidate]) -> Option<Candidate> {
        candidates
            .iter()
            .copied()
            .fold(None, |best: Option<Candidate>, c| match best {
                Some(b) if b.pixnb >= c.pixnb => Some(b),
                _ => Some(c),
            })
    }
}
