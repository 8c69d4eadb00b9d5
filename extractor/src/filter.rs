//! Detection filter: Gaussian smoothing of the subtracted image before
//! thresholding. Pixels outside the image, and masked (NaN) pixels,
//! contribute zero.

use crate::config::FilterConfig;
use crate::strip::RowWindow;
use ndarray::Array2;
use shared::image_proc::convolve::{gaussian_kernel, kernel_size_for_fwhm};

const FWHM_TO_SIGMA: f64 = 2.354_82;

#[derive(Debug, Clone)]
pub struct DetectionFilter {
    kernel: Array2<f32>,
    half: usize,
}

impl DetectionFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        let size = config.size.unwrap_or_else(|| kernel_size_for_fwhm(config.fwhm));
        let kernel = gaussian_kernel(size, config.fwhm / FWHM_TO_SIGMA);
        Self::from_kernel(kernel.mapv(|v| v as f32))
    }

    /// Use an arbitrary odd, square kernel.
    pub fn from_kernel(kernel: Array2<f32>) -> Self {
        let half = kernel.nrows() / 2;
        Self { kernel, half }
    }

    /// Rows needed on either side of the row being filtered.
    pub fn half_size(&self) -> usize {
        self.half
    }

    /// Filter row `y` of `window` into `out`.
    pub fn convolve_row<W: RowWindow + ?Sized>(&self, window: &W, y: usize, out: &mut [f32]) {
        let width = window.width();
        let half = self.half as isize;
        out.fill(0.0);

        for (ky, kernel_row) in self.kernel.rows().into_iter().enumerate() {
            let yy = y as isize + ky as isize - half;
            if yy < 0 {
                continue;
            }
            let Some(src) = window.row(yy as usize) else {
                continue;
            };
            for (kx, &k) in kernel_row.iter().enumerate() {
                let dx = kx as isize - half;
                for (x, o) in out.iter_mut().enumerate() {
                    let xx = x as isize + dx;
                    if xx < 0 || xx >= width as isize {
                        continue;
                    }
                    let v = src[xx as usize];
                    if !v.is_nan() {
                        *o += k * v;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::Strip;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn strip_of(rows: &[&[f32]]) -> Strip {
        let mut strip = Strip::new(rows[0].len(), rows.len(), rows.len(), false).unwrap();
        for r in rows {
            strip.push_row(r).unwrap();
        }
        strip
    }

    #[test]
    fn test_box_kernel_with_zero_padding() {
        let filter = DetectionFilter::from_kernel(array![
            [1.0, 1.0, 1.0],
            [1.0, 1.0, 1.0],
            [1.0, 1.0, 1.0]
        ]);
        let strip = strip_of(&[&[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0]]);

        let mut out = [0.0f32; 3];
        filter.convolve_row(&strip, 1, &mut out);
        assert_eq!(out, [6.0, 9.0, 6.0]);

        filter.convolve_row(&strip, 0, &mut out);
        assert_eq!(out, [4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_nan_contributes_zero() {
        let filter = DetectionFilter::from_kernel(array![
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 0.0]
        ]);
        let strip = strip_of(&[&[2.0, f32::NAN, 3.0]]);
        let mut out = [0.0f32; 3];
        filter.convolve_row(&strip, 0, &mut out);
        assert_eq!(out, [2.0, 5.0, 3.0]);
    }

    #[test]
    fn test_gaussian_filter_preserves_flat_interior() {
        let filter = DetectionFilter::from_config(&FilterConfig {
            fwhm: 2.0,
            size: Some(5),
        });
        assert_eq!(filter.half_size(), 2);
        let row = [4.0f32; 9];
        let strip = strip_of(&[&row, &row, &row, &row, &row]);
        let mut out = [0.0f32; 9];
        filter.convolve_row(&strip, 2, &mut out);
        assert_relative_eq!(out[4], 4.0, epsilon = 1e-5);
        assert!(out[0] < 4.0);
    }
}
