//! Spatial lag model `y = ρWy + Xβ + ε`, fitted by maximum likelihood.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::math::{grid_then_golden_max, solve_least_squares};
use crate::models::design::{Coefficient, RegressionData};
use crate::models::ols::OlsFit;
use crate::models::{
    LikelihoodRatio, PARAM_GRID_STEPS, PARAM_TOL, filter_traces, gaussian_log_likelihood, log_det,
    parameter_bounds, squared_correlation, z_coefficient,
};
use crate::spatial::SpatialWeights;

#[derive(Debug, Clone, Serialize)]
pub struct SpatialLagFit {
    pub n: usize,
    pub k: usize,
    pub rho: Coefficient,
    pub coefficients: Vec<Coefficient>,
    #[serde(skip)]
    pub betas: DVector<f64>,
    #[serde(skip)]
    pub residuals: DVector<f64>,
    /// `ρWy + Xβ`
    #[serde(skip)]
    pub predicted: DVector<f64>,
    /// ML residual variance `e'e / n`.
    pub sigma2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub schwarz: f64,
    pub pseudo_r2: f64,
    /// Pseudo R² of the reduced-form prediction `(I - ρW)⁻¹Xβ`.
    pub pseudo_r2_reduced: f64,
    pub lr_vs_ols: LikelihoodRatio,
    pub evaluations: usize,
}

pub fn fit_spatial_lag(data: &RegressionData, w: &SpatialWeights, ols: &OlsFit) -> Result<SpatialLagFit, AppError> {
    let n = data.n();
    let k = data.k();
    if w.n() != n {
        return Err(AppError::data("Weights and regression data have different sizes."));
    }
    if n <= k + 1 {
        return Err(AppError::data(format!("Spatial lag model needs more than {} observations.", k + 1)));
    }

    let eig = w.eigenvalues();
    let (lo, hi) = parameter_bounds(&eig);

    let wy = DVector::from_vec(w.lag(data.y.as_slice()));
    let b0 = solve_least_squares(&data.x, &data.y).ok_or_else(|| AppError::numeric("Singular design in lag model."))?;
    let bl = solve_least_squares(&data.x, &wy).ok_or_else(|| AppError::numeric("Singular design in lag model."))?;
    let e0 = &data.y - &data.x * &b0;
    let el = &wy - &data.x * &bl;
    let (e0e0, e0el, elel) = (e0.dot(&e0), e0.dot(&el), el.dot(&el));
    let nf = n as f64;

    let concentrated = |rho: f64| {
        let ss = e0e0 - 2.0 * rho * e0el + rho * rho * elel;
        if ss <= 0.0 {
            return f64::NEG_INFINITY;
        }
        -0.5 * nf * (ss / nf).ln() + log_det(&eig, rho)
    };
    let opt = grid_then_golden_max(concentrated, lo, hi, PARAM_GRID_STEPS, PARAM_TOL)
        .ok_or_else(|| AppError::numeric("Spatial lag likelihood search failed."))?;
    let rho = opt.x;
    debug!(rho, lo, hi, evaluations = opt.evaluations, "lag model: rho found");

    let betas = &b0 - &bl * rho;
    let xb = &data.x * &betas;
    let predicted = &wy * rho + &xb;
    let residuals = &data.y - &predicted;
    let sigma2 = residuals.dot(&residuals) / nf;
    if sigma2 <= 0.0 {
        return Err(AppError::numeric("Spatial lag model fits exactly; variance is zero."));
    }
    let log_likelihood = gaussian_log_likelihood(n, sigma2, log_det(&eig, rho));

    // Asymptotic variance from the inverse information matrix over (β, ρ, σ²).
    let wd = w.to_dense();
    let traces = filter_traces(&wd, rho).ok_or_else(|| AppError::numeric("I - ρW is singular."))?;
    let wa_xb = &traces.wa * &xb;
    let p = k + 2;
    let mut info = DMatrix::<f64>::zeros(p, p);
    let xtx = data.x.transpose() * &data.x;
    for i in 0..k {
        for j in 0..k {
            info[(i, j)] = xtx[(i, j)] / sigma2;
        }
    }
    let x_wa_xb = data.x.transpose() * &wa_xb;
    for i in 0..k {
        info[(i, k)] = x_wa_xb[i] / sigma2;
        info[(k, i)] = info[(i, k)];
    }
    info[(k, k)] = traces.tr2 + traces.tr3 + wa_xb.dot(&wa_xb) / sigma2;
    info[(k, k + 1)] = traces.tr1 / sigma2;
    info[(k + 1, k)] = info[(k, k + 1)];
    info[(k + 1, k + 1)] = nf / (2.0 * sigma2 * sigma2);
    let vcov = info
        .try_inverse()
        .ok_or_else(|| AppError::numeric("Lag model information matrix is singular."))?;

    let coefficients = (0..k)
        .map(|j| z_coefficient(&data.names[j], betas[j], vcov[(j, j)]))
        .collect();
    let rho_coef = z_coefficient(&format!("W_{}", data.y_name), rho, vcov[(k, k)]);

    // (I - ρW)⁻¹ = I + ρ WA
    let reduced = &xb + &wa_xb * rho;

    let params = (k + 1) as f64;
    Ok(SpatialLagFit {
        n,
        k,
        rho: rho_coef,
        coefficients,
        pseudo_r2: squared_correlation(&data.y, &predicted),
        pseudo_r2_reduced: squared_correlation(&data.y, &reduced),
        betas,
        residuals,
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

    /// Simulate y = (I - ρW)⁻¹ (Xβ + e) on a grid with deterministic noise.
    fn simulate(n: usize, rho: f64) -> (RegressionData, SpatialWeights) {
        let w = grid_weights(n, WeightsKind::Queen);
        let m = n * n;
        let x: Vec<f64> = (0..m).map(|i| ((i * 37) % 11) as f64 / 3.0).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let normal = Normal::new(0.0, 0.4).unwrap();
        let noise: Vec<f64> = (0..m).map(|_| normal.sample(&mut rng)).collect();
        let rhs = DVector::from_iterator(m, (0..m).map(|i| 2.0 + 1.5 * x[i] + noise[i]));
        let a = DMatrix::<f64>::identity(m, m) - w.to_dense() * rho;
        let y = a.lu().solve(&rhs).unwrap();
        (RegressionData::from_parts(y.iter().copied().collect(), vec![x], &["x"]), w)
    }

    #[test]
    fn recovers_positive_rho() {
        let (data, w) = simulate(10, 0.6);
        let ols = fit_ols(&data).unwrap();
        let fit = fit_spatial_lag(&data, &w, &ols).unwrap();
        assert!((fit.rho.estimate - 0.6).abs() < 0.15, "rho={}", fit.rho.estimate);
        assert!(fit.rho.p_value < 0.01);
        assert!((fit.betas[1] - 1.5).abs() < 0.2);
        assert!(fit.log_likelihood >= ols.log_likelihood - 1e-9);
        assert!(fit.lr_vs_ols.p_value < 0.01);
        assert!(fit.rho.std_error > 0.0);
    }

    #[test]
    fn no_dependence_gives_small_rho() {
        let (data, w) = simulate(8, 0.0);
        let ols = fit_ols(&data).unwrap();
        let fit = fit_spatial_lag(&data, &w, &ols).unwrap();
        assert!(fit.rho.estimate.abs() < 0.35);
        assert!(fit.pseudo_r2 > 0.8);
    }
}
