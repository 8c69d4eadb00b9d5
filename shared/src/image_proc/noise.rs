//! Deterministic synthetic fields for testing detection code.
//!
//! Provides seeded Gaussian noise and simple point-source rendering so tests
//! can build reproducible star fields without any file I/O.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Generate a 2D array of normally distributed values for testing purposes.
///
/// # Arguments
/// * `size` - Tuple of (height, width) for the output array dimensions
/// * `mean` - Mean value of the normal distribution
/// * `std_dev` - Standard deviation of the normal distribution (must be >= 0)
/// * `seed` - Random seed for deterministic output
///
/// # Returns
/// A 2D array with values sampled from Normal(mean, std_dev)
///
/// # Example
/// ```
/// use shared::image_proc::noise::simple_normal_array;
///
/// let noise = simple_normal_array((10, 10), 100.0, 10.0, 42);
/// assert_eq!(noise.dim(), (10, 10));
/// ```
pub fn simple_normal_array(
    size: (usize, usize),
    mean: f64,
    std_dev: f64,
    seed: u64,
) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    match Normal::new(mean, std_dev) {
        Ok(dist) => Array2::from_shape_fn(size, |_| dist.sample(&mut rng)),
        Err(e) => {
            log::warn!("Invalid noise parameters (std_dev {std_dev}): {e}; returning a flat field");
            Array2::from_elem(size, mean)
        }
    }
}

/// Add a circular Gaussian spot to an image.
///
/// The spot is rendered out to 5 sigma around its center; pixels beyond the
/// image edges are skipped.
///
/// # Arguments
/// * `image` - Image to modify in place, shape (height, width)
/// * `x` - Spot center column (subpixel)
/// * `y` - Spot center row (subpixel)
/// * `peak` - Amplitude at the spot center
/// * `sigma` - Gaussian width in pixels
pub fn add_gaussian_spot(image: &mut Array2<f64>, x: f64, y: f64, peak: f64, sigma: f64) {
    let (height, width) = image.dim();
    if width == 0 || height == 0 || sigma <= 0.0 {
        return;
    }
    let reach = (5.0 * sigma).ceil();
    let x0 = (x - reach).floor().max(0.0) as usize;
    let y0 = (y - reach).floor().max(0.0) as usize;
    let x1 = ((x + reach).ceil() as usize).min(width - 1);
    let y1 = ((y + reach).ceil() as usize).min(height - 1);
    let two_sigma_sq = 2.0 * sigma * sigma;

    for row in y0..=y1 {
        for col in x0..=x1 {
            let dx = col as f64 - x;
            let dy = row as f64 - y;
            image[[row, col]] += peak * (-(dx * dx + dy * dy) / two_sigma_sq).exp();
        }
    }
}
