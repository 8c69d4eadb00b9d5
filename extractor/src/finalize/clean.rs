//! Bounded queue that merges spurious detections in the wings of bright
//! objects before they are emitted.
//!
//! Each queued object carries a Moffat-like profile
//! `amp * (1 + alpha * r²)^-beta` fitted so that it reaches the object's
//! isophote at its measured area. When a newcomer lies within
//! [`CLEAN_ZONE`] combined semi-major axes of a queued object, the brighter
//! profile is evaluated at the fainter centroid; if it still exceeds the
//! fainter object's threshold, the fainter object is absorbed.

use crate::error::{ExtractionError, Result};
use crate::object::FinalizedObject;
use std::f64::consts::PI;

/// Interaction radius in units of the summed semi-major axes.
pub const CLEAN_ZONE: f64 = 10.0;

/// Profile values at larger radii count as zero.
const PROFILE_LIMIT: f64 = 1e10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Profile {
    amp: f64,
    alpha: f64,
}

impl Profile {
    fn of(obj: &FinalizedObject, beta: f64) -> Self {
        let unit_area = PI * obj.a * obj.b;
        let amp = obj.flux / (2.0 * unit_area * obj.area_correction);
        let alpha = ((amp / obj.threshold).powf(1.0 / beta) - 1.0) * unit_area / obj.npix as f64;
        if amp.is_finite() && alpha.is_finite() && amp > 0.0 {
            Self { amp, alpha }
        } else {
            Self {
                amp: 0.0,
                alpha: 0.0,
            }
        }
    }

    /// True when the profile of `obj` at offset (dx, dy) exceeds `threshold`.
    fn covers(&self, obj: &FinalizedObject, dx: f64, dy: f64, beta: f64, threshold: f64) -> bool {
        let val = 1.0 + self.alpha * (obj.cxx * dx * dx + obj.cyy * dy * dy + obj.cxy * dx * dy);
        if !(val > 1.0) {
            return false;
        }
        let level = if val < PROFILE_LIMIT {
            self.amp * val.powf(-beta)
        } else {
            0.0
        };
        level > threshold
    }
}

#[derive(Debug, Clone)]
struct Queued {
    object: FinalizedObject,
    profile: Profile,
}

#[derive(Debug)]
pub struct CleanQueue {
    beta: f64,
    capacity: usize,
    entries: Vec<Queued>,
    merged: usize,
}

impl CleanQueue {
    /// # Arguments
    /// * `beta` - Profile slope (the clean parameter)
    /// * `capacity` - Objects held before the one with the smallest
    ///   `bbox.max_row` is released
    pub fn new(beta: f64, capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| ExtractionError::Allocation {
                what: "clean queue",
                count: capacity,
            })?;
        Ok(Self {
            beta,
            capacity,
            entries,
            merged: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Objects absorbed so far.
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Offer a new object to the queue.
    ///
    /// Returns the object released to make room, if the queue was full.
    pub fn push(&mut self, mut newcomer: FinalizedObject) -> Option<FinalizedObject> {
        let beta = self.beta;
        let profile_in = Profile::of(&newcomer, beta);
        let mut victims = Vec::new();

        for (i, queued) in self.entries.iter_mut().enumerate() {
            let dx = newcomer.x - queued.object.x;
            let dy = newcomer.y - queued.object.y;
            let reach = CLEAN_ZONE * (newcomer.a + queued.object.a);
            if dx * dx + dy * dy > reach * reach {
                continue;
            }
            if newcomer.flux < queued.object.flux {
                if queued
                    .profile
                    .covers(&queued.object, dx, dy, beta, newcomer.threshold)
                {
                    queued.object.absorb(&newcomer);
                    self.merged += 1;
                    return None;
                }
            } else if profile_in.covers(&newcomer, dx, dy, beta, queued.object.threshold) {
                victims.push(i);
            }
        }

        for &i in victims.iter().rev() {
            let victim = self.entries.remove(i);
            newcomer.absorb(&victim.object);
            self.merged += 1;
        }

        let released = if self.entries.len() >= self.capacity {
            self.take_lowest()
        } else {
            None
        };
        self.entries.push(Queued {
            object: newcomer,
            profile: profile_in,
        });
        released
    }

    /// Remove every queued object, ordered by increasing `bbox.max_row`.
    pub fn drain_sorted(&mut self) -> Vec<FinalizedObject> {
        let mut out: Vec<FinalizedObject> = self.entries.drain(..).map(|q| q.object).collect();
        out.sort_by_key(|o| o.bbox.max_row);
        out
    }

    fn take_lowest(&mut self) -> Option<FinalizedObject> {
        let (i, _) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, q)| q.object.bbox.max_row)?;
        Some(self.entries.remove(i).object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::tests::object_at;
    use crate::object::ObjectFlags;

    fn bright_at(x: f64, y: f64) -> FinalizedObject {
        let mut obj = object_at(x, y, 10_000.0);
        obj.npix = 200;
        obj.a = 4.0;
        obj.b = 4.0;
        obj.cxx = 1.0 / 16.0;
        obj.cyy = 1.0 / 16.0;
        obj
    }

    #[test]
    fn test_faint_newcomer_in_wing_is_absorbed() {
        let mut queue = CleanQueue::new(1.0, 10).unwrap();
        assert!(queue.push(bright_at(50.0, 50.0)).is_none());

        let mut faint = object_at(56.0, 50.0, 20.0);
        faint.flags = ObjectFlags::MERGED | ObjectFlags::TRUNCATED;
        assert!(queue.push(faint).is_none());

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.merged(), 1);
        let out = queue.drain_sorted();
        assert_eq!(out[0].npix, 209);
        assert_eq!(out[0].flux, 10_020.0);
        assert_eq!(out[0].flags, ObjectFlags::TRUNCATED);
    }

    #[test]
    fn test_bright_newcomer_absorbs_queued() {
        let mut queue = CleanQueue::new(1.0, 10).unwrap();
        queue.push(object_at(56.0, 50.0, 20.0));
        queue.push(object_at(10.0, 10.0, 20.0));
        queue.push(bright_at(50.0, 50.0));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.merged(), 1);
        let out = queue.drain_sorted();
        assert!(out.iter().any(|o| o.npix == 209));
    }

    #[test]
    fn test_distant_objects_do_not_interact() {
        let mut queue = CleanQueue::new(1.0, 10).unwrap();
        queue.push(bright_at(50.0, 50.0));
        queue.push(object_at(200.0, 50.0, 20.0));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.merged(), 0);
    }

    #[test]
    fn test_full_queue_releases_lowest_max_row() {
        let mut queue = CleanQueue::new(1.0, 2).unwrap();
        assert!(queue.push(object_at(10.0, 30.0, 5.0)).is_none());
        assert!(queue.push(object_at(100.0, 20.0, 5.0)).is_none());

        let released = queue.push(object_at(200.0, 40.0, 5.0)).unwrap();
        assert_eq!(released.bbox.max_row, 21);
        let rest = queue.drain_sorted();
        assert_eq!(
            rest.iter().map(|o| o.bbox.max_row).collect::<Vec<_>>(),
            vec![31, 41]
        );
        assert!(queue.is_empty());
    }
}
