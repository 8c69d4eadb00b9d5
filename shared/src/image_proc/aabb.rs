//! Axis-aligned bounding boxes for detected objects.
//!
//! Objects are grown pixel by pixel while the scanner walks the image, so the
//! box starts out *invalid* (`min > max`) and is expanded in place. All bounds
//! are inclusive and expressed in image coordinates: rows grow downward,
//! columns grow rightward.
//!
//! ```rust
//! use shared::image_proc::aabb::AABB;
//!
//! let mut bbox = AABB::new();
//! bbox.expand_to_include(10, 20);
//! bbox.expand_to_include(14, 22);
//! assert_eq!(bbox.height(), 5);
//! assert_eq!(bbox.width(), 3);
//! ```

use serde::{Deserialize, Serialize};

/// Axis-Aligned Bounding Box for 2D image regions.
///
/// Both min and max coordinates are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AABB {
    /// Minimum row (y) coordinate (inclusive)
    pub min_row: usize,
    /// Minimum column (x) coordinate (inclusive)
    pub min_col: usize,
    /// Maximum row (y) coordinate (inclusive)
    pub max_row: usize,
    /// Maximum column (x) coordinate (inclusive)
    pub max_col: usize,
}

impl AABB {
    /// Create a new empty AABB with invalid bounds.
    ///
    /// Min coordinates start at `usize::MAX` and max coordinates at 0, so the
    /// first call to [`AABB::expand_to_include`] collapses it onto that point.
    pub fn new() -> Self {
        Self {
            min_row: usize::MAX,
            min_col: usize::MAX,
            max_row: 0,
            max_col: 0,
        }
    }

    /// Create an AABB from explicit coordinate bounds.
    ///
    /// # Arguments
    /// * `min_row` - Top edge (minimum y-coordinate, inclusive)
    /// * `min_col` - Left edge (minimum x-coordinate, inclusive)
    /// * `max_row` - Bottom edge (maximum y-coordinate, inclusive)
    /// * `max_col` - Right edge (maximum x-coordinate, inclusive)
    pub fn from_coords(min_row: usize, min_col: usize, max_row: usize, max_col: usize) -> Self {
        Self {
            min_row,
            min_col,
            max_row,
            max_col,
        }
    }

    /// Smallest box containing both `self` and `other`.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min_row: self.min_row.min(other.min_row),
            min_col: self.min_col.min(other.min_col),
            max_row: self.max_row.max(other.max_row),
            max_col: self.max_col.max(other.max_col),
        }
    }

    /// Grow the box to include a single pixel.
    pub fn expand_to_include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    /// Number of columns spanned (0 for an invalid box).
    pub fn width(&self) -> usize {
        if self.is_valid() {
            self.max_col - self.min_col + 1
        } else {
            0
        }
    }

    /// Number of rows spanned (0 for an invalid box).
    pub fn height(&self) -> usize {
        if self.is_valid() {
            self.max_row - self.min_row + 1
        } else {
            0
        }
    }

    /// True once at least one pixel has been included.
    pub fn is_valid(&self) -> bool {
        self.min_row <= self.max_row && self.min_col <= self.max_col
    }

    pub fn contains_point(&self, row: usize, col: usize) -> bool {
        row >= self.min_row && row <= self.max_row && col >= self.min_col && col <= self.max_col
    }
}

impl Default for AABB {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_invalid_until_expanded() {
        let mut bbox = AABB::new();
        assert!(!bbox.is_valid());
        assert_eq!(bbox.width(), 0);
        assert_eq!(bbox.height(), 0);

        bbox.expand_to_include(3, 4);
        assert!(bbox.is_valid());
        assert_eq!(bbox, AABB::from_coords(3, 4, 3, 4));
        assert_eq!((bbox.width(), bbox.height()), (1, 1));
    }

    #[test]
    fn test_merge() {
        let a = AABB::from_coords(0, 0, 4, 4);
        let c = AABB::from_coords(10, 10, 12, 12);
        assert_eq!(a.merge(&c), AABB::from_coords(0, 0, 12, 12));
    }

    #[test]
    fn test_contains_point_is_row_then_column() {
        let bbox = AABB::from_coords(10, 20, 14, 22);
        assert!(bbox.contains_point(12, 21));
        assert!(!bbox.contains_point(21, 12));
    }
}
