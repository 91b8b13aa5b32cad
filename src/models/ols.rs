//! Ordinary least squares with the usual diagnostics.

use nalgebra::DVector;
use serde::Serialize;

use crate::error::AppError;
use crate::math::{f_sf, solve_least_squares, student_t_two_sided_p, weighted_normal_inverse};
use crate::models::design::{Coefficient, RegressionData};

/// Fitted OLS model.
#[derive(Debug, Clone, Serialize)]
pub struct OlsFit {
    pub n: usize,
    pub k: usize,
    pub coefficients: Vec<Coefficient>,
    #[serde(skip)]
    pub betas: DVector<f64>,
    #[serde(skip)]
    pub residuals: DVector<f64>,
    #[serde(skip)]
    pub predicted: DVector<f64>,
    pub rss: f64,
    /// Unbiased residual variance `RSS / (n - k)`.
    pub sigma2: f64,
    pub r2: f64,
    pub adj_r2: f64,
    pub f_stat: f64,
    pub f_p_value: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub schwarz: f64,
    pub condition_number: f64,
    pub jarque_bera: f64,
    pub jarque_bera_p: f64,
}

/// Fit `y = Xβ + ε` by least squares.
pub fn fit_ols(data: &RegressionData) -> Result<OlsFit, AppError> {
    let n = data.n();
    let k = data.k();
    if n <= k {
        return Err(AppError::data(format!("OLS is underdetermined: n={n} <= k={k}.")));
    }

    let betas = solve_least_squares(&data.x, &data.y)
        .ok_or_else(|| AppError::numeric("OLS design matrix is singular."))?;
    let predicted = &data.x * &betas;
    let residuals = &data.y - &predicted;

    let rss = residuals.dot(&residuals);
    let y_mean = data.y.mean();
    let tss: f64 = data.y.iter().map(|v| (v - y_mean) * (v - y_mean)).sum();
    let df = (n - k) as f64;
    let sigma2 = rss / df;

    let xtx_inv = weighted_normal_inverse(&data.x, None)
        .ok_or_else(|| AppError::numeric("Failed to invert X'X for OLS standard errors."))?;

    let coefficients = (0..k)
        .map(|j| {
            let se = (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt();
            let t = betas[j] / se;
            Coefficient {
                name: data.names[j].clone(),
                estimate: betas[j],
                std_error: se,
                statistic: t,
                p_value: student_t_two_sided_p(t, df),
            }
        })
        .collect();

    let r2 = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };
    let adj_r2 = 1.0 - (1.0 - r2) * (n as f64 - 1.0) / df;
    let (f_stat, f_p_value) = if k > 1 {
        let f = ((tss - rss) / (k as f64 - 1.0)) / (rss / df);
        (f, f_sf(f, k as f64 - 1.0, df))
    } else {
        (f64::NAN, f64::NAN)
    };

    let nf = n as f64;
    let log_likelihood = -0.5 * nf * (2.0 * std::f64::consts::PI).ln() - 0.5 * nf * (rss / nf).ln() - 0.5 * nf;
    let aic = -2.0 * log_likelihood + 2.0 * k as f64;
    let schwarz = -2.0 * log_likelihood + k as f64 * nf.ln();

    let (jarque_bera, jarque_bera_p) = jarque_bera(residuals.as_slice());

    Ok(OlsFit {
        n,
        k,
        coefficients,
        condition_number: condition_number(data),
        betas,
        residuals,
        predicted,
        rss,
        sigma2,
        r2,
        adj_r2,
        f_stat,
        f_p_value,
        log_likelihood,
        aic,
        schwarz,
        jarque_bera,
        jarque_bera_p,
    })
}

/// Multicollinearity condition number: ratio of extreme singular values of
/// the design with columns scaled to unit length.
fn condition_number(data: &RegressionData) -> f64 {
    let mut x = data.x.clone();
    for mut col in x.column_iter_mut() {
        let norm = col.norm();
        if norm > 0.0 {
            col /= norm;
        }
    }
    let sv = x.singular_values();
    let max = sv.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    if min > 0.0 { max / min } else { f64::INFINITY }
}

/// Jarque-Bera normality test of residuals; χ²(2) tail is `exp(-x/2)`.
fn jarque_bera(e: &[f64]) -> (f64, f64) {
    let n = e.len() as f64;
    let m = e.iter().sum::<f64>() / n;
    let m2 = e.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    let m3 = e.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    let m4 = e.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n;
    if m2 <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let skew = m3 / m2.powf(1.5);
    let kurt = m4 / (m2 * m2);
    let jb = n / 6.0 * (skew * skew + (kurt - 3.0).powi(2) / 4.0);
    (jb, (-jb / 2.0).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_coefficients() {
        let x1: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let x2: Vec<f64> = (0..20).map(|i| ((i * 7) % 5) as f64).collect();
        let y: Vec<f64> = x1.iter().zip(x2.iter()).map(|(a, b)| 1.5 + 2.0 * a - 0.5 * b).collect();
        let data = RegressionData::from_parts(y, vec![x1, x2], &["x1", "x2"]);
        let fit = fit_ols(&data).unwrap();
        assert!((fit.betas[0] - 1.5).abs() < 1e-9);
        assert!((fit.betas[1] - 2.0).abs() < 1e-9);
        assert!((fit.betas[2] + 0.5).abs() < 1e-9);
        assert!(fit.r2 > 0.999_999);
        assert_eq!(fit.coefficients[1].name, "x1");
    }

    #[test]
    fn noisy_fit_has_sane_statistics() {
        let x1: Vec<f64> = (0..50).map(|i| i as f64 / 10.0).collect();
        // Deterministic pseudo-noise.
        let y: Vec<f64> = x1
            .iter()
            .enumerate()
            .map(|(i, a)| 3.0 + a + 0.3 * ((i as f64) * 1.7).sin())
            .collect();
        let data = RegressionData::from_parts(y, vec![x1], &["x1"]);
        let fit = fit_ols(&data).unwrap();
        assert!(fit.coefficients[1].p_value < 1e-6);
        assert!(fit.f_p_value < 1e-6);
        assert!(fit.aic.is_finite() && fit.schwarz > fit.aic);
        assert!(fit.condition_number >= 1.0);
    }

    #[test]
    fn underdetermined_is_rejected() {
        let data = RegressionData::from_parts(vec![1.0, 2.0], vec![vec![0.0, 1.0]], &["x"]);
        assert_eq!(fit_ols(&data).unwrap_err().exit_code(), crate::error::EXIT_DATA);
    }
}
