//! Ring buffer of recent image rows.
//!
//! The strip holds at most `capacity` consecutive rows of the
//! background-subtracted image (and, with a detection filter, the matching
//! filtered rows). Rows scroll out in order and are never revisited, which is
//! what bounds memory for arbitrarily tall images.

use crate::error::{filled_table, ExtractionError, Result};
use crate::filter::DetectionFilter;

/// Read access to a window of consecutive image rows.
pub trait RowWindow {
    fn width(&self) -> usize;
    /// First row still held (inclusive)
    fn first_row(&self) -> usize;
    /// One past the last row held
    fn end_row(&self) -> usize;
    /// Background-subtracted row `y`, if it is inside the window
    fn row(&self, y: usize) -> Option<&[f32]>;

    fn value(&self, x: usize, y: usize) -> Option<f32> {
        self.row(y).and_then(|r| r.get(x).copied())
    }
}

#[derive(Debug)]
pub struct Strip {
    width: usize,
    height: usize,
    capacity: usize,
    rows: Vec<f32>,
    filtered: Option<Vec<f32>>,
    /// Rows whose filtered values have been computed
    filtered_end: usize,
    first: usize,
    end: usize,
}

impl Strip {
    /// Create a strip for an image of `width` x `height` holding `capacity`
    /// rows. `filtered` reserves a parallel buffer for filtered rows.
    pub fn new(width: usize, height: usize, capacity: usize, filtered: bool) -> Result<Self> {
        if capacity == 0 {
            return Err(ExtractionError::InvalidConfig(
                "strip must hold at least one row".to_string(),
            ));
        }
        let rows = filled_table("strip rows", width * capacity, 0.0f32)?;
        let filtered = if filtered {
            Some(filled_table("filtered strip rows", width * capacity, 0.0f32)?)
        } else {
            None
        };
        Ok(Self {
            width,
            height,
            capacity,
            rows,
            filtered,
            filtered_end: 0,
            first: 0,
            end: 0,
        })
    }

    fn offset(&self, y: usize) -> usize {
        (y % self.capacity) * self.width
    }

    /// Append the next image row, scrolling the oldest row out when full.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.width {
            return Err(ExtractionError::ShortRead {
                row: self.end,
                expected: self.width,
                got: row.len(),
            });
        }
        if self.end >= self.height {
            return Err(ExtractionError::InvalidConfig(format!(
                "row {} pushed past the bottom of a {}-row image",
                self.end, self.height
            )));
        }
        let offset = self.offset(self.end);
        self.rows[offset..offset + self.width].copy_from_slice(row);
        self.end += 1;
        if self.end - self.first > self.capacity {
            self.first += 1;
        }
        self.filtered_end = self.filtered_end.max(self.first);
        Ok(())
    }

    /// Compute filtered values up to and including row `y`.
    ///
    /// Each row needs `filter.half_size()` rows below it to be loaded (or to
    /// lie beyond the image).
    pub fn apply_filter(&mut self, filter: &DetectionFilter, y: usize) {
        let Some(mut buffer) = self.filtered.take() else {
            return;
        };
        while self.filtered_end <= y && self.filtered_end < self.end {
            let row_y = self.filtered_end;
            let offset = self.offset(row_y);
            filter.convolve_row(self, row_y, &mut buffer[offset..offset + self.width]);
            self.filtered_end += 1;
        }
        self.filtered = Some(buffer);
    }

    /// Filtered row `y`, if computed and still held.
    pub fn filtered_row(&self, y: usize) -> Option<&[f32]> {
        let buffer = self.filtered.as_ref()?;
        if y < self.first || y >= self.filtered_end {
            return None;
        }
        let offset = self.offset(y);
        Some(&buffer[offset..offset + self.width])
    }
}

impl RowWindow for Strip {
    fn width(&self) -> usize {
        self.width
    }

    fn first_row(&self) -> usize {
        self.first
    }

    fn end_row(&self) -> usize {
        self.end
    }

    fn row(&self, y: usize) -> Option<&[f32]> {
        if y < self.first || y >= self.end {
            return None;
        }
        let offset = self.offset(y);
        Some(&self.rows[offset..offset + self.width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_scroll_out() {
        let mut strip = Strip::new(2, 10, 3, false).unwrap();
        for y in 0..5 {
            strip.push_row(&[y as f32, y as f32 + 0.5]).unwrap();
        }
        assert_eq!(strip.first_row(), 2);
        assert_eq!(strip.end_row(), 5);
        assert!(strip.row(1).is_none());
        assert_eq!(strip.row(2).unwrap(), &[2.0, 2.5]);
        assert_eq!(strip.row(4).unwrap(), &[4.0, 4.5]);
        assert_eq!(strip.value(1, 3), Some(3.5));
        assert_eq!(strip.value(2, 3), None);
    }

    #[test]
    fn test_wrong_width_is_short_read() {
        let mut strip = Strip::new(4, 4, 2, false).unwrap();
        assert!(matches!(
            strip.push_row(&[1.0, 2.0]),
            Err(ExtractionError::ShortRead {
                row: 0,
                expected: 4,
                got: 2
            })
        ));
    }

    #[test]
    fn test_rows_past_image_bottom_are_rejected() {
        let mut strip = Strip::new(2, 2, 4, false).unwrap();
        strip.push_row(&[1.0, 1.0]).unwrap();
        strip.push_row(&[2.0, 2.0]).unwrap();
        assert!(matches!(
            strip.push_row(&[3.0, 3.0]),
            Err(ExtractionError::InvalidConfig(_))
        ));
        assert_eq!(strip.end_row(), 2);
    }

    #[test]
    fn test_no_filtered_rows_without_filter() {
        let mut strip = Strip::new(2, 2, 2, false).unwrap();
        strip.push_row(&[1.0, 1.0]).unwrap();
        assert!(strip.filtered_row(0).is_none());
    }
}
