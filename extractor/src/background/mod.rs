//! Tiled background model.
//!
//! The image is partitioned into `tile_width` x `tile_height` tiles (the last
//! row and column of tiles may be smaller). Each tile gets a robust level and
//! sigma from [`tile::BackgroundTile`]; tiles with too few valid pixels are
//! filled from their nearest good neighbours, and the grid is median
//! filtered to suppress tiles still biased by extended sources. Queries
//! interpolate bilinearly between tile centers, so `back(x, y)` is
//! continuous and defined over the whole image.
//!
//! Building reads the source one band of tile rows at a time, so memory is
//! bounded by `tile_height x width` regardless of the image height.

pub mod grid;
pub mod local;
pub mod tile;

use crate::config::BackgroundConfig;
use crate::error::{filled_table, ExtractionError, Result};
use crate::source::{ArraySource, PixelSource};
use log::{debug, info};
use ndarray::Array2;
use shared::algo::median;
use shared::ImageSize;
use tile::BackgroundTile;

#[derive(Debug, Clone)]
pub struct Background {
    size: ImageSize,
    level: Array2<f64>,
    sigma: Array2<f64>,
    centers_x: Vec<f64>,
    centers_y: Vec<f64>,
    global_level: f64,
    global_sigma: f64,
}

impl Background {
    /// Build the model from a pixel source, then rewind the source.
    ///
    /// # Errors
    /// * [`ExtractionError::ConstantImage`] if no tile has a positive sigma
    /// * [`ExtractionError::ShortRead`] if the source ends early
    pub fn build<S: PixelSource + ?Sized>(
        source: &mut S,
        config: &BackgroundConfig,
    ) -> Result<Self> {
        let size = source.size();
        if size.is_empty() {
            return Err(ExtractionError::InvalidConfig(format!(
                "cannot model the background of an empty {size} image"
            )));
        }
        if config.tile_width == 0 || config.tile_height == 0 {
            return Err(ExtractionError::InvalidConfig(
                "background tile size must be positive".to_string(),
            ));
        }

        let (tw, th) = (config.tile_width, config.tile_height);
        let nx = size.width.div_ceil(tw);
        let ny = size.height.div_ceil(th);

        let mut level = grid_table(ny, nx, 0.0)?;
        let mut sigma = grid_table(ny, nx, 0.0)?;
        let mut good = grid_table(ny, nx, false)?;

        let mut band = filled_table("background band", th * size.width, 0.0f32)?;
        let mut pixels = Vec::with_capacity(tw * th);
        for iy in 0..ny {
            let y0 = iy * th;
            let rows = th.min(size.height - y0);
            for r in 0..rows {
                source.next_row(&mut band[r * size.width..(r + 1) * size.width])?;
            }
            for ix in 0..nx {
                let x0 = ix * tw;
                let x1 = (x0 + tw).min(size.width);
                pixels.clear();
                for r in 0..rows {
                    pixels.extend_from_slice(&band[r * size.width + x0..r * size.width + x1]);
                }
                if let Some(t) = BackgroundTile::from_pixels(&pixels) {
                    let (l, s) = t.backguess();
                    level[[iy, ix]] = l;
                    sigma[[iy, ix]] = s;
                    good[[iy, ix]] = true;
                }
            }
            debug!("Background band {}/{} done", iy + 1, ny);
        }
        source.rewind()?;

        let has_sigma = good
            .iter()
            .zip(sigma.iter())
            .any(|(&g, &s)| g && s > 0.0);
        if !has_sigma {
            return Err(ExtractionError::ConstantImage);
        }

        let replaced = grid::fill_bad_tiles(&mut level, &mut sigma, &good);
        if replaced > 0 {
            debug!("Interpolated {replaced} bad background tiles");
        }
        let (level, sigma) = grid::median_filter(
            &level,
            &sigma,
            config.filter_width,
            config.filter_height,
            config.filter_threshold,
        );

        let level_values: Vec<f64> = level.iter().copied().collect();
        let sigma_values: Vec<f64> = sigma.iter().copied().collect();
        let global_level = median(&level_values).map_err(|_| ExtractionError::ConstantImage)?;
        let global_sigma = median(&sigma_values).map_err(|_| ExtractionError::ConstantImage)?;

        info!(
            "Background model: {nx}x{ny} tiles of {tw}x{th}, \
             level {global_level:.4}, sigma {global_sigma:.4}"
        );

        Ok(Self {
            size,
            level,
            sigma,
            centers_x: tile_centers(size.width, tw),
            centers_y: tile_centers(size.height, th),
            global_level,
            global_sigma,
        })
    }

    /// Build the model from an in-memory image of shape (height, width).
    pub fn from_array(data: &Array2<f32>, config: &BackgroundConfig) -> Result<Self> {
        let mut source = ArraySource::new(data.clone());
        Self::build(&mut source, config)
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Median of the filtered tile levels
    pub fn global_level(&self) -> f64 {
        self.global_level
    }

    /// Median of the filtered tile sigmas
    pub fn global_sigma(&self) -> f64 {
        self.global_sigma
    }

    /// Tile grid dimensions as (columns, rows).
    pub fn grid_size(&self) -> (usize, usize) {
        (self.level.ncols(), self.level.nrows())
    }

    pub fn tile_level(&self, ix: usize, iy: usize) -> f64 {
        self.level[[iy, ix]]
    }

    pub fn tile_sigma(&self, ix: usize, iy: usize) -> f64 {
        self.sigma[[iy, ix]]
    }

    /// Interpolated background at pixel (x, y).
    pub fn back(&self, x: usize, y: usize) -> f32 {
        let (y0, y1, ty) = bracket(&self.centers_y, y as f64);
        let (x0, x1, tx) = bracket(&self.centers_x, x as f64);
        let top = lerp(self.level[[y0, x0]], self.level[[y0, x1]], tx);
        let bottom = lerp(self.level[[y1, x0]], self.level[[y1, x1]], tx);
        lerp(top, bottom, ty) as f32
    }

    /// Interpolated sigma at pixel (x, y).
    pub fn sigma_at(&self, x: usize, y: usize) -> f32 {
        let (y0, y1, ty) = bracket(&self.centers_y, y as f64);
        let (x0, x1, tx) = bracket(&self.centers_x, x as f64);
        let top = lerp(self.sigma[[y0, x0]], self.sigma[[y0, x1]], tx);
        let bottom = lerp(self.sigma[[y1, x0]], self.sigma[[y1, x1]], tx);
        lerp(top, bottom, ty) as f32
    }

    /// Fill `out` with the interpolated background of row `y`.
    pub fn back_row(&self, y: usize, out: &mut [f32]) {
        let (y0, y1, ty) = bracket(&self.centers_y, y as f64);
        let column: Vec<f64> = (0..self.level.ncols())
            .map(|ix| lerp(self.level[[y0, ix]], self.level[[y1, ix]], ty))
            .collect();
        for (x, o) in out.iter_mut().enumerate() {
            let (x0, x1, tx) = bracket(&self.centers_x, x as f64);
            *o = lerp(column[x0], column[x1], tx) as f32;
        }
    }

    /// Render the full interpolated background, shape (height, width).
    pub fn to_array(&self) -> Array2<f32> {
        let mut out = self.size.zeros::<f32>();
        for (y, mut row) in out.rows_mut().into_iter().enumerate() {
            if let Some(slice) = row.as_slice_mut() {
                self.back_row(y, slice);
            }
        }
        out
    }
}

fn grid_table<T: Clone>(ny: usize, nx: usize, fill: T) -> Result<Array2<T>> {
    let table = filled_table("background tile grid", ny * nx, fill)?;
    Array2::from_shape_vec((ny, nx), table).map_err(|_| ExtractionError::Allocation {
        what: "background tile grid",
        count: ny * nx,
    })
}

/// Pixel coordinate of each tile center along one axis.
fn tile_centers(extent: usize, tile: usize) -> Vec<f64> {
    (0..extent.div_ceil(tile))
        .map(|i| {
            let start = i * tile;
            let end = (start + tile).min(extent);
            (start + end - 1) as f64 / 2.0
        })
        .collect()
}

/// Indices of the two centers bracketing `pos` and the fractional offset,
/// clamped to the outermost centers. A single center is reused on both sides.
fn bracket(centers: &[f64], pos: f64) -> (usize, usize, f64) {
    if centers.len() < 2 {
        return (0, 0, 0.0);
    }
    let i = centers
        .partition_point(|&c| c <= pos)
        .saturating_sub(1)
        .min(centers.len() - 2);
    let t = ((pos - centers[i]) / (centers[i + 1] - centers[i])).clamp(0.0, 1.0);
    (i, i + 1, t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::image_proc::simple_normal_array;

    fn config(tile: usize, filter: usize) -> BackgroundConfig {
        BackgroundConfig {
            tile_width: tile,
            tile_height: tile,
            filter_width: filter,
            filter_height: filter,
            filter_threshold: 0.0,
        }
    }

    fn noise(height: usize, width: usize, mean: f64, sigma: f64, seed: u64) -> Array2<f32> {
        simple_normal_array((height, width), mean, sigma, seed).mapv(|v| v as f32)
    }

    #[test]
    fn test_tile_centers_with_partial_tile() {
        assert_eq!(tile_centers(10, 4), vec![1.5, 5.5, 8.5]);
        assert_eq!(tile_centers(4, 4), vec![1.5]);
    }

    #[test]
    fn test_bracket_clamps() {
        let centers = [1.5, 5.5, 8.5];
        assert_eq!(bracket(&centers, 0.0), (0, 1, 0.0));
        assert_eq!(bracket(&centers, 3.5), (0, 1, 0.5));
        assert_eq!(bracket(&centers, 9.0), (1, 2, 1.0));
        assert_eq!(bracket(&[2.0], 7.0), (0, 0, 0.0));
    }

    #[test]
    fn test_flat_noise_field() {
        let image = noise(128, 96, 200.0, 4.0, 11);
        let bg = Background::from_array(&image, &config(32, 3)).unwrap();

        assert_eq!(bg.grid_size(), (3, 4));
        assert!((bg.global_level() - 200.0).abs() < 0.5, "level {}", bg.global_level());
        assert!((bg.global_sigma() - 4.0).abs() < 0.5, "sigma {}", bg.global_sigma());
        for (x, y) in [(0, 0), (95, 127), (47, 63)] {
            assert!((bg.back(x, y) - 200.0).abs() < 1.0);
            assert!((bg.sigma_at(x, y) - 4.0).abs() < 1.0);
        }
    }

    #[test]
    fn test_gradient_is_followed_and_continuous() {
        let mut image = noise(64, 128, 0.0, 1.0, 5);
        for ((_, x), v) in image.indexed_iter_mut() {
            *v += 0.5 * x as f32;
        }
        let bg = Background::from_array(&image, &config(16, 1)).unwrap();

        // Between tile centers the model follows the ramp.
        assert!((bg.back(40, 30) - 20.0).abs() < 1.0, "{}", bg.back(40, 30));
        assert!((bg.back(100, 10) - 50.0).abs() < 1.0, "{}", bg.back(100, 10));

        // No jumps across tile boundaries.
        for y in 0..64 {
            for x in 1..128 {
                let step = (bg.back(x, y) - bg.back(x - 1, y)).abs();
                assert!(step < 0.75, "jump of {step} at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_back_row_matches_back() {
        let image = noise(40, 50, 10.0, 2.0, 9);
        let bg = Background::from_array(&image, &config(16, 3)).unwrap();
        let mut row = vec![0.0f32; 50];
        for y in [0, 17, 39] {
            bg.back_row(y, &mut row);
            for (x, &v) in row.iter().enumerate() {
                assert_relative_eq!(v, bg.back(x, y), epsilon = 1e-4);
            }
        }
        assert_eq!(bg.to_array().dim(), (40, 50));
    }

    #[test]
    fn test_single_tile_image() {
        let image = noise(20, 30, 5.0, 1.0, 2);
        let bg = Background::from_array(&image, &config(64, 3)).unwrap();
        assert_eq!(bg.grid_size(), (1, 1));
        assert_eq!(bg.back(0, 0), bg.back(29, 19));
    }

    #[test]
    fn test_constant_image_is_fatal() {
        let image = Array2::from_elem((64, 64), 42.0f32);
        let err = Background::from_array(&image, &config(16, 3)).unwrap_err();
        assert!(matches!(err, ExtractionError::ConstantImage));
    }

    #[test]
    fn test_masked_tiles_are_filled() {
        let mut image = noise(64, 64, 30.0, 2.0, 4);
        for y in 0..16 {
            for x in 0..16 {
                image[[y, x]] = f32::NAN;
            }
        }
        let bg = Background::from_array(&image, &config(16, 1)).unwrap();
        assert!((bg.tile_level(0, 0) - 30.0).abs() < 1.0);
        assert!(bg.tile_sigma(0, 0) > 0.0);
    }

    #[test]
    fn test_build_rewinds_source() {
        let image = noise(32, 32, 1.0, 1.0, 8);
        let mut source = ArraySource::new(image.clone());
        Background::build(&mut source, &config(16, 1)).unwrap();

        let mut row = vec![0.0f32; 32];
        source.next_row(&mut row).unwrap();
        assert_eq!(row.as_slice(), image.row(0).as_slice().unwrap());
    }
}
