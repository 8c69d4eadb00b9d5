//! Robust statistics helpers
//!
//! `RunningMoments` accumulates count, sum and sum of squares in one pass,
//! which is all the two-pass clipped estimators need. `median` ignores NaN
//! entries, which is how masked pixels are represented.

use thiserror::Error;

/// Error types for statistics over pixel samples
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("No valid data points to compute {what}: {total} total values, all NaN or empty")]
    NoValidData { what: &'static str, total: usize },
}

/// Single-pass accumulator of first and second moments.
///
/// Sums are taken relative to the first sample so a constant input yields an
/// exactly zero sigma.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    count: usize,
    shift: f64,
    sum: f64,
    sum_sq: f64,
}

impl RunningMoments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate moments over all non-NaN values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut moments = Self::new();
        for v in values {
            moments.push(v);
        }
        moments
    }

    /// Add one sample. NaN samples are ignored.
    pub fn push(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        if self.count == 0 {
            self.shift = value;
        }
        let d = value - self.shift;
        self.count += 1;
        self.sum += d;
        self.sum_sq += d * d;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean of the accumulated samples, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.shift + self.sum / self.count as f64
        }
    }

    /// Population standard deviation, clamped at zero against round-off.
    pub fn sigma(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let offset = self.sum / n;
        let variance = self.sum_sq / n - offset * offset;
        if variance > 0.0 {
            variance.sqrt()
        } else {
            0.0
        }
    }
}

/// Calculate median of a slice of f64 values
///
/// NaN values are filtered out. For even-length data, returns the average of
/// the two middle values.
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(StatsError::NoValidData)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid.is_empty() {
        return Err(StatsError::NoValidData {
            what: "median",
            total: values.len(),
        });
    }

    valid.sort_by(|a, b| a.total_cmp(b));

    let mid = valid.len() / 2;
    let median_value = if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.0
    } else {
        valid[mid]
    };

    Ok(median_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_running_moments() {
        let m = RunningMoments::from_values([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(m.count(), 8);
        assert_relative_eq!(m.mean(), 5.0);
        assert_relative_eq!(m.sigma(), 2.0);
    }

    #[test]
    fn test_running_moments_skips_nan() {
        let m = RunningMoments::from_values([1.0, f64::NAN, 3.0]);
        assert_eq!(m.count(), 2);
        assert_relative_eq!(m.mean(), 2.0);
    }

    #[test]
    fn test_constant_sigma_is_zero() {
        let m = RunningMoments::from_values(std::iter::repeat(1234.567).take(100));
        assert_eq!(m.sigma(), 0.0);
    }

    #[test]
    fn test_median_odd_even_nan() {
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]).unwrap(), 2.5);
        assert_eq!(median(&[f64::NAN, 5.0]).unwrap(), 5.0);
    }

    #[test]
    fn test_median_all_nan_is_error() {
        let err = median(&[f64::NAN, f64::NAN]).unwrap_err();
        assert_eq!(
            err,
            StatsError::NoValidData {
                what: "median",
                total: 2
            }
        );
    }
}
