//! Spatial error model `y = Xβ + u, u = λWu + ε`, fitted by maximum likelihood.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::math::{grid_then_golden_max, solve_least_squares, weighted_normal_inverse};
use crate::models::design::{Coefficient, RegressionData};
use crate::models::ols::OlsFit;
use crate::models::{
    LikelihoodRatio, PARAM_GRID_STEPS, PARAM_TOL, filter_traces, gaussian_log_likelihood, log_det,
    parameter_bounds, squared_correlation, z_coefficient,
};
use crate::spatial::SpatialWeights;

#[derive(Debug, Clone, Serialize)]
pub struct SpatialErrorFit {
    pub n: usize,
    pub k: usize,
    pub lambda: Coefficient,
    pub coefficients: Vec<Coefficient>,
    #[serde(skip)]
    pub betas: DVector<f64>,
    /// `u = y - Xβ`
    #[serde(skip)]
    pub residuals: DVector<f64>,
    /// `ε = u - λWu`
    #[serde(skip)]
    pub filtered_residuals: DVector<f64>,
    #[serde(skip)]
    pub predicted: DVector<f64>,
    pub sigma2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub schwarz: f64,
    pub pseudo_r2: f64,
    pub lr_vs_ols: LikelihoodRatio,
    pub evaluations: usize,
}

/// Spatially filtered design `(y - λWy, X - λWX)`.
fn filtered(y: &DVector<f64>, wy: &DVector<f64>, x: &DMatrix<f64>, wx: &DMatrix<f64>, lambda: f64) -> (DVector<f64>, DMatrix<f64>) {
    (y - wy * lambda, x - wx * lambda)
}

pub fn fit_spatial_error(data: &RegressionData, w: &SpatialWeights, ols: &OlsFit) -> Result<SpatialErrorFit, AppError> {
    let n = data.n();
    let k = data.k();
    if w.n() != n {
        return Err(AppError::data("Weights and regression data have different sizes."));
    }
    if n <= k + 1 {
        return Err(AppError::data(format!("Spatial error model needs more than {} observations.", k + 1)));
    }

    let eig = w.eigenvalues();
    let (lo, hi) = parameter_bounds(&eig);
    let nf = n as f64;

    let wy = DVector::from_vec(w.lag(data.y.as_slice()));
    let mut wx = DMatrix::<f64>::zeros(n, k);
    for j in 0..k {
        let col: Vec<f64> = data.x.column(j).iter().copied().collect();
        for (i, v) in w.lag(&col).into_iter().enumerate() {
            wx[(i, j)] = v;
        }
    }

    let concentrated = |lambda: f64| {
        let (ys, xs) = filtered(&data.y, &wy, &data.x, &wx, lambda);
        let Some(b) = solve_least_squares(&xs, &ys) else {
            return f64::NEG_INFINITY;
        };
        let e = &ys - &xs * b;
        let ss = e.dot(&e);
        if ss <= 0.0 {
            return f64::NEG_INFINITY;
        }
        -0.5 * nf * (ss / nf).ln() + log_det(&eig, lambda)
    };
    let opt = grid_then_golden_max(concentrated, lo, hi, PARAM_GRID_STEPS, PARAM_TOL)
        .ok_or_else(|| AppError::numeric("Spatial error likelihood search failed."))?;
    let lambda = opt.x;
    debug!(lambda, lo, hi, evaluations = opt.evaluations, "error model: lambda found");

    let (ys, xs) = filtered(&data.y, &wy, &data.x, &wx, lambda);
    let betas = solve_least_squares(&xs, &ys).ok_or_else(|| AppError::numeric("Singular filtered design."))?;
    let filtered_residuals = &ys - &xs * &betas;
    let sigma2 = filtered_residuals.dot(&filtered_residuals) / nf;
    if sigma2 <= 0.0 {
        return Err(AppError::numeric("Spatial error model fits exactly; variance is zero."));
    }
    let log_likelihood = gaussian_log_likelihood(n, sigma2, log_det(&eig, lambda));

    let xs_inv = weighted_normal_inverse(&xs, None)
        .ok_or_else(|| AppError::numeric("Failed to invert filtered X'X."))?;
    let coefficients = (0..k)
        .map(|j| z_coefficient(&data.names[j], betas[j], sigma2 * xs_inv[(j, j)]))
        .collect();

    // λ is block-diagonal from β; invert the (λ, σ²) block.
    let traces = filter_traces(&w.to_dense(), lambda).ok_or_else(|| AppError::numeric("I - λW is singular."))?;
    let a = traces.tr2 + traces.tr3;
    let b = traces.tr1 / sigma2;
    let d = nf / (2.0 * sigma2 * sigma2);
    let det = a * d - b * b;
    if det <= 0.0 {
        return Err(AppError::numeric("Error model information matrix is not positive definite."));
    }
    let lambda_coef = z_coefficient("lambda", lambda, d / det);

    let predicted = &data.x * &betas;
    let residuals = &data.y - &predicted;

    let params = (k + 1) as f64;
    Ok(SpatialErrorFit {
        n,
        k,
        lambda: lambda_coef,
        coefficients,
        pseudo_r2: squared_correlation(&data.y, &predicted),
        betas,
        residuals,
        filtered_residuals,
        predicted,
        sigma2,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * params,
        schwarz: -2.0 * log_likelihood + params * nf.ln(),
        lr_vs_ols: LikelihoodRatio::against(ols.log_likelihood, log_likelihood),
        evaluations: opt.evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WeightsKind;
    use crate::models::ols::fit_ols;
    use crate::spatial::weights::tests::grid_weights;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn simulate(n: usize, lambda: f64) -> (RegressionData, SpatialWeights) {
        let w = grid_weights(n, WeightsKind::Queen);
        let m = n * n;
        let x: Vec<f64> = (0..m).map(|i| ((i * 37) % 11) as f64 / 3.0).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let normal = Normal::new(0.0, 0.5).unwrap();
        let eps = DVector::from_iterator(m, (0..m).map(|_| normal.sample(&mut rng)));
        let b = DMatrix::<f64>::identity(m, m) - w.to_dense() * lambda;
        let u = b.lu().solve(&eps).unwrap();
        let y: Vec<f64> = (0..m).map(|i| 1.0 - 0.8 * x[i] + u[i]).collect();
        (RegressionData::from_parts(y, vec![x], &["x"]), w)
    }

    #[test]
    fn recovers_lambda_and_slope() {
        let (data, w) = simulate(10, 0.7);
        let ols = fit_ols(&data).unwrap();
        let fit = fit_spatial_error(&data, &w, &ols).unwrap();
        assert!((fit.lambda.estimate - 0.7).abs() < 0.2, "lambda={}", fit.lambda.estimate);
        assert!((fit.betas[1] + 0.8).abs() < 0.15);
        assert!(fit.log_likelihood >= ols.log_likelihood - 1e-9);
        assert!(fit.lambda.std_error > 0.0 && fit.lambda.std_error < 0.5);
    }

    #[test]
    fn residual_identity_holds() {
        let (data, w) = simulate(6, 0.4);
        let ols = fit_ols(&data).unwrap();
        let fit = fit_spatial_error(&data, &w, &ols).unwrap();
        let wu = w.lag(fit.residuals.as_slice());
        for i in 0..data.n() {
            let expected = fit.residuals[i] - fit.lambda.estimate * wu[i];
            assert!((fit.filtered_residuals[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn no_dependence_gives_small_lambda() {
        let (data, w) = simulate(10, 0.0);
        let ols = fit_ols(&data).unwrap();
        let fit = fit_spatial_error(&data, &w, &ols).unwrap();
        assert!(fit.lambda.estimate.abs() < 0.35, "lambda={}", fit.lambda.estimate);
        assert!((fit.betas[1] + 0.8).abs() < 0.15);
    }
}
