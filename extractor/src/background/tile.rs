//! Robust statistics for one background tile.
//!
//! A tile is summarised in two passes: plain mean/sigma over every valid
//! pixel, then mean/sigma again inside the ±2σ clip window. The clipped
//! statistics set up a fine quantization of ±5σ around the mean, and the
//! histogram of the tile in that quantization feeds [`BackgroundTile::backguess`],
//! which iterates a ±3σ clip around a histogram median until the width
//! settles.

use shared::algo::RunningMoments;

/// Half-width of the quantized histogram range, in clipped sigmas
pub const QUANTIF_NSIGMA: f64 = 5.0;
/// Upper bound on histogram buckets
pub const QUANTIF_NMAXLEVELS: usize = 4096;
/// Mean number of pixels per bucket within one sigma
pub const QUANTIF_AMIN: f64 = 4.0;
/// Tiles with fewer valid pixels than this fraction are treated as bad
pub const MIN_GOOD_FRACTION: f64 = 0.5;

const CLIP_NSIGMA: f64 = 2.0;
const GUESS_NSIGMA: f64 = 3.0;
const GUESS_MAX_ITER: usize = 100;
const GUESS_EPS: f64 = 1e-4;
const GUESS_MIN_SIGMA: f64 = 0.1;
const MODE_BLEND_LIMIT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundTile {
    /// Mean of the clipped pixels
    pub mean: f64,
    /// Sigma of the clipped pixels
    pub sigma: f64,
    pub lcut: f64,
    pub hcut: f64,
    /// Pixels inside the clip window
    pub npix: usize,
    /// Value of bucket 0
    pub qzero: f64,
    /// Bucket width
    pub qscale: f64,
    pub histogram: Vec<u32>,
}

impl BackgroundTile {
    /// Summarise a tile's pixels. Non-finite values count as masked.
    ///
    /// Returns `None` when fewer than half the pixels are valid.
    pub fn from_pixels(pixels: &[f32]) -> Option<Self> {
        let valid = || pixels.iter().map(|&v| v as f64).filter(|v| v.is_finite());

        let raw = RunningMoments::from_values(valid());
        if raw.count() == 0 || (raw.count() as f64) < MIN_GOOD_FRACTION * pixels.len() as f64 {
            return None;
        }

        let lcut = raw.mean() - CLIP_NSIGMA * raw.sigma();
        let hcut = raw.mean() + CLIP_NSIGMA * raw.sigma();
        let clipped = RunningMoments::from_values(valid().filter(|&v| v >= lcut && v <= hcut));
        let (mean, sigma, npix) = if clipped.count() > 0 {
            (clipped.mean(), clipped.sigma(), clipped.count())
        } else {
            (raw.mean(), raw.sigma(), raw.count())
        };

        let step = (2.0 / std::f64::consts::PI).sqrt() * QUANTIF_NSIGMA / QUANTIF_AMIN;
        let nlevels = ((step * npix as f64 + 1.0) as usize).clamp(1, QUANTIF_NMAXLEVELS);
        let qscale = if sigma > 0.0 {
            2.0 * QUANTIF_NSIGMA * sigma / nlevels as f64
        } else {
            1.0
        };
        let qzero = mean - QUANTIF_NSIGMA * sigma;

        let mut histogram = vec![0u32; nlevels];
        for v in valid() {
            let bin = ((v - qzero) / qscale + 0.5).floor();
            if bin >= 0.0 && (bin as usize) < nlevels {
                histogram[bin as usize] += 1;
            }
        }

        Some(Self {
            mean,
            sigma,
            lcut,
            hcut,
            npix,
            qzero,
            qscale,
            histogram,
        })
    }

    /// Robust (level, sigma) estimate from the histogram.
    ///
    /// The level is the mean when the histogram width agrees with the clipped
    /// sigma, the blend `2.5·median − 1.5·mean` when mean and median are
    /// close, and the median otherwise.
    pub fn backguess(&self) -> (f64, f64) {
        let h = &self.histogram;
        let n = h.len();
        if self.sigma <= 0.0 || n < 2 {
            return (self.mean, self.sigma);
        }

        let top = n - 1;
        let (mut lcut, mut hcut) = (0usize, top);
        let mut sig = 10.0 * top as f64;
        let mut sig1 = 1.0;
        let mut mea = 0.0;
        let mut med = 0.0;

        for _ in 0..GUESS_MAX_ITER {
            if !(sig >= GUESS_MIN_SIGMA && (sig / sig1 - 1.0).abs() > GUESS_EPS) {
                break;
            }
            sig1 = sig;

            let mut sum = 0.0;
            let mut first = 0.0;
            let mut second = 0.0;
            let mut lowsum = 0u64;
            let mut highsum = 0u64;
            let mut lo = lcut as isize;
            let mut hi = hcut as isize;
            for i in lcut..=hcut {
                if lowsum < highsum {
                    lowsum += h[lo as usize] as u64;
                    lo += 1;
                } else {
                    highsum += h[hi as usize] as u64;
                    hi -= 1;
                }
                let pix = h[i] as f64;
                sum += pix;
                first += pix * i as f64;
                second += pix * (i * i) as f64;
            }

            med = if hi >= 0 {
                let at = |k: isize| h.get(k as usize).copied().unwrap_or(0) as f64;
                let denom = 2.0 * at(lo).max(at(hi));
                let shift = if denom > 0.0 {
                    (highsum as f64 - lowsum as f64) / denom
                } else {
                    0.0
                };
                hi as f64 + 0.5 + shift
            } else {
                0.0
            };

            let mut var = 0.0;
            if sum > 0.0 {
                mea = first / sum;
                var = second / sum - mea * mea;
            } else {
                mea = 0.0;
            }
            sig = if var > 0.0 { var.sqrt() } else { 0.0 };

            let low = med - GUESS_NSIGMA * sig;
            let high = med + GUESS_NSIGMA * sig;
            lcut = if low > 0.0 { (low + 0.5) as usize } else { 0 };
            hcut = if high < top as f64 {
                if high > 0.0 {
                    (high + 0.5) as usize
                } else {
                    0
                }
            } else {
                top
            };
            if lcut > hcut {
                break;
            }
        }

        let level = if sig > 0.0 {
            if (self.sigma / (sig * self.qscale) - 1.0).abs() < GUESS_EPS {
                mea
            } else if ((mea - med) / sig).abs() < MODE_BLEND_LIMIT {
                2.5 * med - 1.5 * mea
            } else {
                med
            }
        } else {
            mea
        };

        (self.qzero + level * self.qscale, sig * self.qscale)
    }
}
