//! Lagrange-multiplier tests for spatial dependence in OLS residuals.

use nalgebra::DVector;
use serde::Serialize;

use crate::error::AppError;
use crate::math::{chi2_1_sf, weighted_normal_inverse};
use crate::models::design::RegressionData;
use crate::models::ols::OlsFit;
use crate::spatial::SpatialWeights;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LmTest {
    pub statistic: f64,
    pub df: u8,
    pub p_value: f64,
}

impl LmTest {
    fn chi2(statistic: f64, df: u8) -> Self {
        let p_value = match df {
            1 => chi2_1_sf(statistic),
            // χ²(2) survival has the closed form exp(-x/2).
            _ => (-statistic.max(0.0) / 2.0).exp(),
        };
        Self { statistic, df, p_value }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LmDiagnostics {
    pub lm_lag: LmTest,
    pub robust_lm_lag: LmTest,
    pub lm_error: LmTest,
    pub robust_lm_error: LmTest,
    pub sarma: LmTest,
    /// Moran's I of the OLS residuals.
    pub residual_moran: f64,
}

impl LmDiagnostics {
    /// Model suggested by the usual decision rule at level `alpha`.
    pub fn suggestion(&self, alpha: f64) -> &'static str {
        let lag = self.lm_lag.p_value < alpha;
        let err = self.lm_error.p_value < alpha;
        match (lag, err) {
            (false, false) => "OLS (no spatial dependence detected)",
            (true, false) => "spatial lag",
            (false, true) => "spatial error",
            (true, true) => {
                let rlag = self.robust_lm_lag.p_value;
                let rerr = self.robust_lm_error.p_value;
                if rlag < alpha && rerr >= alpha {
                    "spatial lag (robust)"
                } else if rerr < alpha && rlag >= alpha {
                    "spatial error (robust)"
                } else if rlag <= rerr {
                    "spatial lag (both robust tests significant)"
                } else {
                    "spatial error (both robust tests significant)"
                }
            }
        }
    }
}

/// `T = tr(W'W + W²)` computed from the sparse structure.
pub fn trace_wtw_ww(w: &SpatialWeights) -> f64 {
    let mut t = 0.0;
    for i in 0..w.n() {
        for &j in w.neighbors(i) {
            let wij = w.weight(i, j);
            t += wij * wij + wij * w.weight(j, i);
        }
    }
    t
}

/// LM-lag, LM-error, their robust forms and SARMA from an OLS fit.
pub fn lm_diagnostics(data: &RegressionData, ols: &OlsFit, w: &SpatialWeights) -> Result<LmDiagnostics, AppError> {
    let n = data.n();
    if w.n() != n {
        return Err(AppError::data(format!(
            "Weights cover {} units but the regression has {n} observations.",
            w.n()
        )));
    }

    let e = &ols.residuals;
    let ete = e.dot(e);
    let sig2 = ete / n as f64;
    if sig2 <= 0.0 {
        return Err(AppError::numeric("OLS residuals are identically zero; LM tests are undefined."));
    }

    let we = DVector::from_vec(w.lag(e.as_slice()));
    let wy = DVector::from_vec(w.lag(data.y.as_slice()));
    let t = trace_wtw_ww(w);
    if t <= 0.0 {
        return Err(AppError::numeric("Weights have no links; LM tests are undefined."));
    }

    let ewe = e.dot(&we) / sig2;
    let ewy = e.dot(&wy) / sig2;

    // (WXβ)' M (WXβ) with M = I - X(X'X)⁻¹X'.
    let wxb = DVector::from_vec(w.lag(ols.predicted.as_slice()));
    let xtx_inv = weighted_normal_inverse(&data.x, None)
        .ok_or_else(|| AppError::numeric("Failed to invert X'X for LM tests."))?;
    let xt_wxb = data.x.transpose() * &wxb;
    let proj = &data.x * (&xtx_inv * xt_wxb);
    let m_wxb = &wxb - proj;
    let nj = (wxb.dot(&m_wxb) + t * sig2) / sig2;

    let lm_err = ewe * ewe / t;
    let lm_lag = ewy * ewy / nj;
    let robust_lag = (ewy - ewe).powi(2) / (nj - t);
    let robust_err = (ewe - t / nj * ewy).powi(2) / (t * (1.0 - t / nj));
    let sarma = robust_lag + lm_err;

    Ok(LmDiagnostics {
        lm_lag: LmTest::chi2(lm_lag, 1),
        robust_lm_lag: LmTest::chi2(robust_lag, 1),
        lm_error: LmTest::chi2(lm_err, 1),
        robust_lm_error: LmTest::chi2(robust_err, 1),
        sarma: LmTest::chi2(sarma, 2),
        residual_moran: n as f64 / w.s0() * e.dot(&we) / ete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WeightsKind;
    use crate::models::ols::fit_ols;
    use crate::spatial::weights::tests::grid_weights;

    fn smooth_surface(n: usize) -> (Vec<f64>, Vec<f64>) {
        // x varies row-wise, y carries a smooth column trend that x does not explain.
        let mut x = Vec::new();
        let mut y = Vec::new();
        for r in 0..n {
            for c in 0..n {
                let xv = ((r * 7 + c * 3) % 5) as f64;
                x.push(xv);
                y.push(1.0 + 0.5 * xv + (c as f64) * 0.8);
            }
        }
        (x, y)
    }

    #[test]
    fn spatially_structured_residuals_are_detected() {
        let n = 8;
        let (x, y) = smooth_surface(n);
        let data = RegressionData::from_parts(y, vec![x], &["x"]);
        let ols = fit_ols(&data).unwrap();
        let w = grid_weights(n, WeightsKind::Rook);
        let lm = lm_diagnostics(&data, &ols, &w).unwrap();
        assert!(lm.lm_error.p_value < 0.01, "{:?}", lm.lm_error);
        assert!(lm.residual_moran > 0.3);
        assert!(lm.sarma.statistic >= lm.lm_error.statistic - 1e-9);
        assert_ne!(lm.suggestion(0.05), "OLS (no spatial dependence detected)");
    }

    #[test]
    fn trace_matches_dense_computation() {
        let w = grid_weights(4, WeightsKind::Queen);
        let d = w.to_dense();
        let dense = (d.transpose() * &d + &d * &d).trace();
        assert!((trace_wtw_ww(&w) - dense).abs() < 1e-12);
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let (x, y) = smooth_surface(3);
        let data = RegressionData::from_parts(y, vec![x], &["x"]);
        let ols = fit_ols(&data).unwrap();
        let w = grid_weights(4, WeightsKind::Rook);
        assert!(lm_diagnostics(&data, &ols, &w).is_err());
    }
}
