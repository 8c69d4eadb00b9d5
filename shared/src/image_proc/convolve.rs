//! Convolution kernels used to smooth images before thresholding.

use ndarray::Array2;

/// Create a normalized 2D Gaussian kernel.
///
/// # Arguments
/// * `size` - Kernel width and height in pixels (must be odd)
/// * `sigma` - Gaussian standard deviation in pixels
///
/// # Returns
/// A `size` x `size` kernel whose elements sum to 1.
///
/// # Panics
/// Panics if `size` is even.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Array2<f64> {
    assert!(size % 2 == 1, "Kernel size must be odd");

    let center = (size / 2) as f64;
    let mut kernel = Array2::from_shape_fn((size, size), |(i, j)| {
        let x = j as f64 - center;
        let y = i as f64 - center;
        (-(x * x + y * y) / (2.0 * sigma * sigma)).exp()
    });

    let sum = kernel.sum();
    if sum > 0.0 {
        kernel.mapv_inplace(|v| v / sum);
    }
    kernel
}

/// Kernel size covering +/- 3 sigma for a given FWHM, rounded up to odd.
pub fn kernel_size_for_fwhm(fwhm: f64) -> usize {
    let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
    let half = (3.0 * sigma).ceil().max(1.0) as usize;
    2 * half + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_kernel_normalized() {
        let kernel = gaussian_kernel(5, 1.0);
        assert_eq!(kernel.dim(), (5, 5));
        assert_relative_eq!(kernel.sum(), 1.0, epsilon = 1e-12);
        assert!(kernel[[2, 2]] > kernel[[2, 1]]);
        assert_relative_eq!(kernel[[1, 2]], kernel[[2, 1]], epsilon = 1e-15);
    }

    #[test]
    #[should_panic(expected = "Kernel size must be odd")]
    fn test_even_kernel_panics() {
        gaussian_kernel(4, 1.0);
    }

    #[test]
    fn test_kernel_size_for_fwhm() {
        assert_eq!(kernel_size_for_fwhm(2.0), 7);
        assert_eq!(kernel_size_for_fwhm(0.1), 3);
        assert_eq!(kernel_size_for_fwhm(2.0) % 2, 1);
    }
}
