//! Global regression models: OLS, LM diagnostics, and ML spatial lag / error.
//!
//! The ML models share the same machinery: a concentrated log-likelihood in
//! the single spatial parameter, with `ln|I - ρW| = Σ ln(1 - ρ ω_i)` taken
//! from the eigenvalues of W, maximized by grid + golden-section search.

pub mod design;
pub mod diagnostics;
pub mod lag;
pub mod ols;
pub mod spatial_error;

pub use design::*;
pub use diagnostics::*;
pub use lag::*;
pub use ols::*;
pub use spatial_error::*;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::math::{chi2_1_sf, normal_two_sided_p};

/// Grid points for the spatial-parameter search before golden refinement.
pub(crate) const PARAM_GRID_STEPS: usize = 41;
/// Absolute tolerance for the spatial parameter.
pub(crate) const PARAM_TOL: f64 = 1e-8;

/// Likelihood-ratio test of a spatial model against OLS (χ²(1)).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LikelihoodRatio {
    pub statistic: f64,
    pub p_value: f64,
}

impl LikelihoodRatio {
    pub fn against(restricted: f64, unrestricted: f64) -> Self {
        let statistic = (2.0 * (unrestricted - restricted)).max(0.0);
        Self {
            statistic,
            p_value: chi2_1_sf(statistic),
        }
    }
}

/// Admissible open interval for the spatial parameter, `(1/ω_min, 1/ω_max)`,
/// pulled slightly inside so the log-determinant stays finite.
pub(crate) fn parameter_bounds(eigenvalues: &[f64]) -> (f64, f64) {
    let min = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    let max = eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lo = if min < 0.0 { (1.0 / min).max(-10.0) } else { -1.0 };
    let hi = if max > 0.0 { (1.0 / max).min(10.0) } else { 1.0 };
    let margin = 1e-6 * (hi - lo);
    (lo + margin, hi - margin)
}

/// `Σ ln(1 - ρ ω_i)`, or `-∞` outside the admissible range.
pub(crate) fn log_det(eigenvalues: &[f64], rho: f64) -> f64 {
    let mut acc = 0.0;
    for &w in eigenvalues {
        let v = 1.0 - rho * w;
        if v <= 0.0 {
            return f64::NEG_INFINITY;
        }
        acc += v.ln();
    }
    acc
}

/// Traces of the filtered weights `WA = W (I - ρW)⁻¹`.
pub(crate) struct FilterTraces {
    pub wa: DMatrix<f64>,
    /// `tr(WA)`
    pub tr1: f64,
    /// `tr(WA WA)`
    pub tr2: f64,
    /// `tr(WA' WA)`
    pub tr3: f64,
}

pub(crate) fn filter_traces(w: &DMatrix<f64>, rho: f64) -> Option<FilterTraces> {
    let n = w.nrows();
    let a = DMatrix::<f64>::identity(n, n) - w * rho;
    let a_inv = a.try_inverse()?;
    let wa = w * a_inv;
    let tr1 = wa.trace();
    let mut tr2 = 0.0;
    let mut tr3 = 0.0;
    for i in 0..n {
        for j in 0..n {
            let v = wa[(i, j)];
            tr2 += v * wa[(j, i)];
            tr3 += v * v;
        }
    }
    Some(FilterTraces { wa, tr1, tr2, tr3 })
}

/// Spatial-parameter row of a coefficient table (normal z inference).
pub(crate) fn z_coefficient(name: &str, estimate: f64, variance: f64) -> Coefficient {
    let se = variance.max(0.0).sqrt();
    let z = estimate / se;
    Coefficient {
        name: name.to_string(),
        estimate,
        std_error: se,
        statistic: z,
        p_value: normal_two_sided_p(z),
    }
}

/// Squared Pearson correlation, used as a pseudo R².
pub(crate) fn squared_correlation(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let ma = a.mean();
    let mb = b.mean();
    let mut sab = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma) * (x - ma);
        sbb += (y - mb) * (y - mb);
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return f64::NAN;
    }
    sab * sab / (saa * sbb)
}

/// Gaussian log-likelihood at the ML variance plus the Jacobian term.
pub(crate) fn gaussian_log_likelihood(n: usize, sigma2: f64, log_det: f64) -> f64 {
    let nf = n as f64;
    -0.5 * nf * (2.0 * std::f64::consts::PI).ln() - 0.5 * nf * sigma2.ln() - 0.5 * nf + log_det
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_row_standardized_range() {
        let (lo, hi) = parameter_bounds(&[-0.5, 0.2, 1.0]);
        assert!((lo + 2.0).abs() < 1e-4);
        assert!(hi < 1.0 && hi > 0.9999);
        assert!(log_det(&[-0.5, 0.2, 1.0], hi).is_finite());
        assert_eq!(log_det(&[1.0], 1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn lr_is_nonnegative() {
        let lr = LikelihoodRatio::against(-10.0, -12.0);
        assert_eq!(lr.statistic, 0.0);
        assert!((lr.p_value - 1.0).abs() < 1e-9);
    }
}
