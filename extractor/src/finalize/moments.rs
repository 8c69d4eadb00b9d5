//! Geometric and photometric summaries of a pixel list.
//!
//! [`preview`] is the cheap pass run on every closed object to decide how it
//! is handled; [`measure`] is the full pass run on every object (or
//! sub-object) that is about to be emitted.

use crate::object::{FinalizedObject, ObjectFlags, PixelRecord};
use shared::image_proc::AABB;
use std::f64::consts::PI;

/// Determinant below which the moment matrix is treated as singular.
const SINGULAR_DET: f64 = 0.00694;
/// Variance of a uniform pixel, added to both axes of a singular object.
const PIXEL_VARIANCE: f64 = 1.0 / 12.0;
/// Lower bound for the ellipse axes.
const MIN_AXIS: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preview {
    pub bbox: AABB,
    pub npix: usize,
    pub flux: f64,
}

pub fn preview<'p, I>(pixels: I) -> Preview
where
    I: Iterator<Item = &'p PixelRecord>,
{
    let mut bbox = AABB::new();
    let mut npix = 0;
    let mut flux = 0.0;
    for p in pixels {
        bbox.expand_to_include(p.y, p.x);
        npix += 1;
        flux += finite(p.value);
    }
    Preview { bbox, npix, flux }
}

/// Full measurement of one object.
///
/// Centroid and second moments are flux-weighted (unweighted when the total
/// flux is not positive). `threshold` is the isophote the object was
/// extracted at, used for the area correction.
pub fn measure<'p, I>(pixels: I, threshold: f64, flags: ObjectFlags) -> FinalizedObject
where
    I: Iterator<Item = &'p PixelRecord> + Clone,
{
    let mut bbox = AABB::new();
    let mut npix = 0usize;
    let mut flux = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let (mut peak_x, mut peak_y) = (0, 0);
    let mut origin = None;

    // Weighted and unweighted sums, relative to the first pixel.
    let mut w = [0.0f64; 2];
    let mut sx = [0.0f64; 2];
    let mut sy = [0.0f64; 2];
    let mut sxx = [0.0f64; 2];
    let mut syy = [0.0f64; 2];
    let mut sxy = [0.0f64; 2];

    for p in pixels.clone() {
        let (ox, oy) = *origin.get_or_insert((p.x, p.y));
        let dx = p.x as f64 - ox as f64;
        let dy = p.y as f64 - oy as f64;
        let v = finite(p.value);

        bbox.expand_to_include(p.y, p.x);
        npix += 1;
        flux += v;
        if v > peak {
            peak = v;
            peak_x = p.x;
            peak_y = p.y;
        }
        for (i, weight) in [v, 1.0].into_iter().enumerate() {
            w[i] += weight;
            sx[i] += weight * dx;
            sy[i] += weight * dy;
            sxx[i] += weight * dx * dx;
            syy[i] += weight * dy * dy;
            sxy[i] += weight * dx * dy;
        }
    }
    let (ox, oy) = origin.unwrap_or((0, 0));
    if npix == 0 {
        peak = 0.0;
    }

    let k = if w[0] > 0.0 { 0 } else { 1 };
    let norm = w[k].max(f64::MIN_POSITIVE);
    let mx = sx[k] / norm;
    let my = sy[k] / norm;
    let mut x2 = (sxx[k] / norm - mx * mx).max(0.0);
    let mut y2 = (syy[k] / norm - my * my).max(0.0);
    let xy = sxy[k] / norm - mx * my;

    let mut det = x2 * y2 - xy * xy;
    if det < SINGULAR_DET {
        x2 += PIXEL_VARIANCE;
        y2 += PIXEL_VARIANCE;
        det = x2 * y2 - xy * xy;
    }

    let diff = x2 - y2;
    let theta = if diff.abs() > 0.0 {
        (2.0 * xy).atan2(diff) / 2.0
    } else {
        PI / 4.0
    };
    let spread = (0.25 * diff * diff + xy * xy).sqrt();
    let mean = 0.5 * (x2 + y2);
    let a = (mean + spread).sqrt().max(MIN_AXIS);
    let b = (mean - spread).max(0.0).sqrt().max(MIN_AXIS);

    let half_max = (peak + threshold) / 2.0;
    let area_correction = area_correction(
        pixels.filter(|p| finite(p.value) > half_max).count(),
        npix,
        threshold,
        half_max,
        a,
        b,
    );

    FinalizedObject {
        id: 0,
        bbox,
        npix,
        flux,
        peak,
        peak_x,
        peak_y,
        x: ox as f64 + mx,
        y: oy as f64 + my,
        x2,
        y2,
        xy,
        a,
        b,
        theta: theta.to_degrees(),
        cxx: y2 / det,
        cyy: x2 / det,
        cxy: -2.0 * xy / det,
        area_correction,
        threshold,
        local_background: None,
        flags,
    }
}

/// Ratio between the measured and the Gaussian-predicted area lying between
/// the isophote and the half-peak level, capped at 1.
fn area_correction(
    area_above_half: usize,
    npix: usize,
    threshold: f64,
    half_max: f64,
    a: f64,
    b: f64,
) -> f64 {
    if !(threshold > 0.0 && half_max > 0.0) {
        return 1.0;
    }
    let ratio = (threshold / half_max).min(0.99);
    let darea = area_above_half as f64 - npix as f64;
    let darea = if darea < 0.0 { darea } else { -1.0 };
    let correction = darea / (2.0 * PI * ratio.ln() * a * b);
    if correction.is_finite() {
        correction.min(1.0)
    } else {
        1.0
    }
}

fn finite(v: f32) -> f64 {
    if v.is_finite() {
        v as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pixels_from(f: impl Fn(usize, usize) -> f32, w: usize, h: usize) -> Vec<PixelRecord> {
        let mut out = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let value = f(x, y);
                if value > 0.0 {
                    out.push(PixelRecord {
                        x,
                        y,
                        value,
                        convolved: None,
                    });
                }
            }
        }
        out
    }

    #[test]
    fn test_preview_box_and_flux() {
        let pixels = pixels_from(
            |x, y| if (2..5).contains(&x) && y == 3 { 2.0 } else { 0.0 },
            8,
            8,
        );
        let p = preview(pixels.iter());
        assert_eq!(p.bbox, AABB::from_coords(3, 2, 3, 4));
        assert_eq!(p.npix, 3);
        assert_eq!(p.flux, 6.0);
    }

    #[test]
    fn test_round_gaussian() {
        let sigma = 2.0f64;
        let pixels = pixels_from(
            |x, y| {
                let dx = x as f64 - 10.0;
                let dy = y as f64 - 12.0;
                let v = 100.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                if v > 1.0 {
                    v as f32
                } else {
                    0.0
                }
            },
            21,
            25,
        );
        let obj = measure(pixels.iter(), 1.0, ObjectFlags::empty());

        assert_relative_eq!(obj.x, 10.0, epsilon = 1e-6);
        assert_relative_eq!(obj.y, 12.0, epsilon = 1e-6);
        assert_eq!((obj.peak_x, obj.peak_y), (10, 12));
        assert_relative_eq!(obj.peak, 100.0, epsilon = 1e-3);
        assert_relative_eq!(obj.a, obj.b, epsilon = 1e-6);
        assert!(obj.a > 1.5 && obj.a < 2.1, "a = {}", obj.a);
        assert_relative_eq!(obj.xy, 0.0, epsilon = 1e-9);
        assert!(obj.area_correction > 0.5 && obj.area_correction <= 1.0);
        assert_eq!(obj.npix, pixels.len());
    }

    #[test]
    fn test_horizontal_bar() {
        let pixels = pixels_from(
            |x, y| if y == 5 && (2..12).contains(&x) { 1.0 } else { 0.0 },
            16,
            10,
        );
        let obj = measure(pixels.iter(), 0.5, ObjectFlags::TRUNCATED);
        assert_relative_eq!(obj.x, 6.5);
        assert_relative_eq!(obj.y, 5.0);
        assert!(obj.a > obj.b);
        assert_relative_eq!(obj.theta, 0.0, epsilon = 1e-9);
        assert_eq!(obj.flags, ObjectFlags::TRUNCATED);
    }

    #[test]
    fn test_diagonal_line_angle() {
        let pixels = pixels_from(|x, y| if x == y { 1.0 } else { 0.0 }, 8, 8);
        let obj = measure(pixels.iter(), 0.5, ObjectFlags::empty());
        assert_relative_eq!(obj.theta, 45.0, epsilon = 1e-9);
        assert!(obj.a > 2.0 * obj.b);
    }

    #[test]
    fn test_steep_line_angle_is_negative() {
        // Two pixels per row, drifting left as y grows.
        let pixels = pixels_from(|x, y| if x / 2 == 7 - y { 1.0 } else { 0.0 }, 16, 8);
        let obj = measure(pixels.iter(), 0.5, ObjectFlags::empty());
        assert!(obj.xy < 0.0);
        assert!(obj.theta < 0.0 && obj.theta > -90.0, "theta {}", obj.theta);
    }

    #[test]
    fn test_single_pixel_is_regularised() {
        let pixels = [PixelRecord {
            x: 3,
            y: 4,
            value: 5.0,
            convolved: None,
        }];
        let obj = measure(pixels.iter(), 1.0, ObjectFlags::empty());
        assert_relative_eq!(obj.x2, PIXEL_VARIANCE);
        assert_relative_eq!(obj.y2, PIXEL_VARIANCE);
        assert_relative_eq!(obj.a, PIXEL_VARIANCE.sqrt());
        assert_relative_eq!(obj.b, PIXEL_VARIANCE.sqrt());
        assert_relative_eq!(obj.theta, 45.0);
        assert_relative_eq!(obj.cxx, 12.0, epsilon = 1e-9);
        assert_eq!(obj.bbox, AABB::from_coords(4, 3, 4, 3));
    }

    #[test]
    fn test_negative_flux_falls_back_to_geometric_centroid() {
        let pixels: Vec<PixelRecord> = [(0usize, 0usize), (2, 0)]
            .iter()
            .map(|&(x, y)| PixelRecord {
                x,
                y,
                value: -1.0,
                convolved: Some(3.0),
            })
            .collect();
        let obj = measure(pixels.iter(), 1.0, ObjectFlags::empty());
        assert_relative_eq!(obj.x, 1.0);
        assert!(obj.a.is_finite() && obj.b.is_finite());
    }
}
