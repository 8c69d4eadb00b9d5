//! Image dimensions and size utilities

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Width and height of a raster streamed through the extractor. Rows are
/// indexed by `y` in `0..height`, columns by `x` in `0..width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Size of an array with shape (height, width)
    pub fn of_array<T>(array: &Array2<T>) -> Self {
        let (height, width) = array.dim();
        Self { width, height }
    }

    /// Create an array of zeros with shape (height, width).
    ///
    /// Note the row-major ordering convention: rows (height) come first.
    pub fn zeros<T>(&self) -> Array2<T>
    where
        T: Clone + num_traits::Zero,
    {
        Array2::zeros((self.height, self.width))
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check whether a (column, row) coordinate lies inside the image
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Convert to tuple (width, height)
    pub fn to_tuple(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

impl From<(usize, usize)> for ImageSize {
    fn from(dimensions: (usize, usize)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
