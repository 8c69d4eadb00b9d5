//! Operations on the tile grid: bad-tile interpolation and median filtering.

use ndarray::Array2;
use shared::algo::median;

/// Replace bad tiles by the mean of their nearest good tiles.
///
/// Distance is measured in tile units; all good tiles at the minimum
/// distance contribute equally. Returns the number of tiles replaced.
pub(crate) fn fill_bad_tiles(
    level: &mut Array2<f64>,
    sigma: &mut Array2<f64>,
    good: &Array2<bool>,
) -> usize {
    let good_tiles: Vec<(usize, usize)> = good
        .indexed_iter()
        .filter(|(_, &g)| g)
        .map(|(idx, _)| idx)
        .collect();
    if good_tiles.is_empty() {
        return 0;
    }

    let mut replaced = 0;
    for ((iy, ix), &is_good) in good.indexed_iter() {
        if is_good {
            continue;
        }
        let dist = |&(gy, gx): &(usize, usize)| {
            let dy = gy as i64 - iy as i64;
            let dx = gx as i64 - ix as i64;
            dx * dx + dy * dy
        };
        let Some(best) = good_tiles.iter().map(&dist).min() else {
            continue;
        };
        let nearest: Vec<&(usize, usize)> =
            good_tiles.iter().filter(|&t| dist(t) == best).collect();
        let n = nearest.len() as f64;
        level[[iy, ix]] = nearest.iter().map(|&&t| level[t]).sum::<f64>() / n;
        sigma[[iy, ix]] = nearest.iter().map(|&&t| sigma[t]).sum::<f64>() / n;
        replaced += 1;
    }
    replaced
}

/// Median-filter level and sigma over a `width` x `height` box of tiles.
///
/// The box is clipped at the grid edges. A tile is only replaced when its
/// level differs from the local median by at least `threshold`; when it is,
/// both its level and its sigma take their local medians.
pub(crate) fn median_filter(
    level: &Array2<f64>,
    sigma: &Array2<f64>,
    width: usize,
    height: usize,
    threshold: f64,
) -> (Array2<f64>, Array2<f64>) {
    let (ny, nx) = level.dim();
    let mut out_level = level.clone();
    let mut out_sigma = sigma.clone();
    if width <= 1 && height <= 1 {
        return (out_level, out_sigma);
    }

    let (hx, hy) = (width / 2, height / 2);
    let mut levels = Vec::with_capacity(width * height);
    let mut sigmas = Vec::with_capacity(width * height);
    for iy in 0..ny {
        for ix in 0..nx {
            levels.clear();
            sigmas.clear();
            for y in iy.saturating_sub(hy)..(iy + hy + 1).min(ny) {
                for x in ix.saturating_sub(hx)..(ix + hx + 1).min(nx) {
                    levels.push(level[[y, x]]);
                    sigmas.push(sigma[[y, x]]);
                }
            }
            let (Ok(med_level), Ok(med_sigma)) = (median(&levels), median(&sigmas)) else {
                continue;
            };
            if (med_level - level[[iy, ix]]).abs() >= threshold {
                out_level[[iy, ix]] = med_level;
                out_sigma[[iy, ix]] = med_sigma;
            }
        }
    }
    (out_level, out_sigma)
}
