//! Pixel views of one closed object handed to the deblender.

use crate::error::{filled_table, ExtractionError, Result};
use crate::object::PixelRecord;
use crate::strip::RowWindow;
use ndarray::Array2;
use shared::image_proc::AABB;

/// Values covering an object's bounding box.
///
/// `InPlace` reads straight from the strip rows and is only valid while the
/// whole box is still held there. `Dense` is a zero-initialised copy holding
/// the object's own pixels and nothing else.
pub enum ObjectBitmap<'a> {
    InPlace {
        window: &'a dyn RowWindow,
        bbox: AABB,
    },
    Dense {
        bbox: AABB,
        values: Array2<f32>,
        convolved: Option<Array2<f32>>,
    },
}

impl<'a> ObjectBitmap<'a> {
    pub fn in_place(window: &'a dyn RowWindow, bbox: AABB) -> Self {
        ObjectBitmap::InPlace { window, bbox }
    }

    /// Scatter `pixels` into a fresh bitmap sized to `bbox`.
    pub fn dense<'p, I>(bbox: AABB, pixels: I, with_convolved: bool) -> Result<Self>
    where
        I: Iterator<Item = &'p PixelRecord>,
    {
        let shape = (bbox.height(), bbox.width());
        let mut values = zeroed("object bitmap", shape)?;
        let mut convolved = if with_convolved {
            Some(zeroed("object convolved bitmap", shape)?)
        } else {
            None
        };
        for p in pixels {
            if !bbox.contains_point(p.y, p.x) {
                continue;
            }
            let idx = [p.y - bbox.min_row, p.x - bbox.min_col];
            values[idx] = p.value;
            if let Some(plane) = convolved.as_mut() {
                plane[idx] = p.detection_value();
            }
        }
        Ok(ObjectBitmap::Dense {
            bbox,
            values,
            convolved,
        })
    }

    pub fn bbox(&self) -> AABB {
        match self {
            ObjectBitmap::InPlace { bbox, .. } | ObjectBitmap::Dense { bbox, .. } => *bbox,
        }
    }

    pub fn is_in_place(&self) -> bool {
        matches!(self, ObjectBitmap::InPlace { .. })
    }

    /// Background-subtracted value at image position (x, y) inside the box.
    pub fn value(&self, x: usize, y: usize) -> Option<f32> {
        match self {
            ObjectBitmap::InPlace { window, bbox } => {
                if bbox.contains_point(y, x) {
                    window.value(x, y)
                } else {
                    None
                }
            }
            ObjectBitmap::Dense { bbox, values, .. } => {
                if bbox.contains_point(y, x) {
                    Some(values[[y - bbox.min_row, x - bbox.min_col]])
                } else {
                    None
                }
            }
        }
    }

    /// Filtered value at (x, y); falls back to the raw value without a filter.
    pub fn detection_value(&self, x: usize, y: usize) -> Option<f32> {
        match self {
            ObjectBitmap::Dense {
                bbox,
                convolved: Some(plane),
                ..
            } if bbox.contains_point(y, x) => Some(plane[[y - bbox.min_row, x - bbox.min_col]]),
            _ => self.value(x, y),
        }
    }
}

fn zeroed(what: &'static str, shape: (usize, usize)) -> Result<Array2<f32>> {
    let count = shape.0 * shape.1;
    let data = filled_table(what, count, 0.0f32)?;
    Array2::from_shape_vec(shape, data).map_err(|_| ExtractionError::Allocation { what, count })
}
