//! Distance-decay kernels and bandwidth specification.

use std::fmt;

use serde::Serialize;

use crate::domain::KernelKind;

/// Adaptive bandwidth distances are inflated by this factor so the k-th
/// neighbor keeps a (tiny) positive weight under truncating kernels.
const ADAPTIVE_EPS: f64 = 1.000_000_1;

/// A bandwidth: a distance, or a neighbor count (self included).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Bandwidth {
    Fixed(f64),
    Adaptive(usize),
}

impl Bandwidth {
    pub fn value(self) -> f64 {
        match self {
            Bandwidth::Fixed(d) => d,
            Bandwidth::Adaptive(k) => k as f64,
        }
    }

    /// Bandwidth of the same kind with a new value (rounded for adaptive).
    pub fn with_value(self, v: f64) -> Self {
        match self {
            Bandwidth::Fixed(_) => Bandwidth::Fixed(v),
            Bandwidth::Adaptive(_) => Bandwidth::Adaptive(v.round().max(1.0) as usize),
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bandwidth::Fixed(d) => write!(f, "{d:.1} (fixed)"),
            Bandwidth::Adaptive(k) => write!(f, "{k} NN (adaptive)"),
        }
    }
}

/// Kernel weight for distance `d` at bandwidth distance `h`.
pub fn kernel_weight(kind: KernelKind, d: f64, h: f64) -> f64 {
    if h <= 0.0 {
        return if d == 0.0 { 1.0 } else { 0.0 };
    }
    let z = d / h;
    match kind {
        KernelKind::Gaussian => (-0.5 * z * z).exp(),
        KernelKind::Exponential => (-z).exp(),
        KernelKind::Bisquare => {
            if z < 1.0 {
                let t = 1.0 - z * z;
                t * t
            } else {
                0.0
            }
        }
    }
}

/// Bandwidth distance at one location.
///
/// `sorted` holds the location's distances to every location (itself
/// included) in ascending order.
pub fn bandwidth_distance(bw: Bandwidth, sorted: &[f64]) -> f64 {
    match bw {
        Bandwidth::Fixed(d) => d,
        Bandwidth::Adaptive(k) => {
            if sorted.is_empty() {
                return 0.0;
            }
            let idx = k.clamp(1, sorted.len()) - 1;
            sorted[idx] * ADAPTIVE_EPS
        }
    }
}

/// Kernel weights for one location given its row of the distance matrix.
pub fn location_weights(kind: KernelKind, bw: Bandwidth, row: &[f64], sorted: &[f64]) -> Vec<f64> {
    let h = bandwidth_distance(bw, sorted);
    row.iter().map(|&d| kernel_weight(kind, d, h)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_are_one_at_zero_and_decay() {
        for kind in [KernelKind::Gaussian, KernelKind::Bisquare, KernelKind::Exponential] {
            assert_eq!(kernel_weight(kind, 0.0, 10.0), 1.0);
            assert!(kernel_weight(kind, 5.0, 10.0) < 1.0);
            assert!(kernel_weight(kind, 5.0, 10.0) > kernel_weight(kind, 8.0, 10.0));
        }
    }

    #[test]
    fn bisquare_truncates_at_bandwidth() {
        assert_eq!(kernel_weight(KernelKind::Bisquare, 10.0, 10.0), 0.0);
        assert_eq!(kernel_weight(KernelKind::Bisquare, 12.0, 10.0), 0.0);
        assert!(kernel_weight(KernelKind::Gaussian, 12.0, 10.0) > 0.0);
    }

    #[test]
    fn adaptive_uses_kth_distance_counting_self() {
        let sorted = [0.0, 1.0, 2.0, 5.0];
        let h = bandwidth_distance(Bandwidth::Adaptive(3), &sorted);
        assert!((h - 2.0).abs() < 1e-5);
        let w = location_weights(KernelKind::Bisquare, Bandwidth::Adaptive(3), &[0.0, 1.0, 2.0, 5.0], &sorted);
        assert!(w[2] > 0.0 && w[2] < 1e-5);
        assert_eq!(w[3], 0.0);
    }

    #[test]
    fn with_value_rounds_adaptive() {
        assert_eq!(Bandwidth::Adaptive(5).with_value(7.6), Bandwidth::Adaptive(8));
        assert_eq!(Bandwidth::Fixed(1.0).with_value(7.6), Bandwidth::Fixed(7.6));
    }
}
