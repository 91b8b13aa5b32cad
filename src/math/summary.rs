//! Summary statistics over plain slices.

use std::cmp::Ordering;

use serde::Serialize;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Variance with `ddof` delta degrees of freedom (0 = population, 1 = sample).
pub fn variance(values: &[f64], ddof: usize) -> Option<f64> {
    let n = values.len();
    if n <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(ss / (n - ddof) as f64)
}

pub fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    variance(values, ddof).map(f64::sqrt)
}

/// Quantile with linear interpolation between order statistics (numpy's default).
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Five-number summary: min, Q1, median, Q3, max.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FiveNumber {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

pub fn five_number(values: &[f64]) -> Option<FiveNumber> {
    Some(FiveNumber {
        min: quantile(values, 0.0)?,
        q1: quantile(values, 0.25)?,
        median: quantile(values, 0.5)?,
        q3: quantile(values, 0.75)?,
        max: quantile(values, 1.0)?,
    })
}

/// Z-standardize a column in place. Returns `(mean, sd)` with the sample sd.
///
/// A constant column is centered only (sd reported as 0).
pub fn standardize_in_place(values: &mut [f64]) -> (f64, f64) {
    let m = mean(values).unwrap_or(0.0);
    let sd = std_dev(values, 1).unwrap_or(0.0);
    for v in values.iter_mut() {
        *v -= m;
        if sd > 0.0 {
            *v /= sd;
        }
    }
    (m, sd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_interpolate() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.5), Some(2.5));
        let five = five_number(&v).unwrap();
        assert_eq!(five.min, 1.0);
        assert_eq!(five.max, 4.0);
        assert!((five.q1 - 1.75).abs() < 1e-12);
    }

    #[test]
    fn standardize_gives_unit_sample_sd() {
        let mut v = vec![2.0, 4.0, 6.0, 8.0];
        let (m, sd) = standardize_in_place(&mut v);
        assert!((m - 5.0).abs() < 1e-12);
        assert!(sd > 0.0);
        assert!(mean(&v).unwrap().abs() < 1e-12);
        assert!((std_dev(&v, 1).unwrap() - 1.0).abs() < 1e-12);
    }
}
