//! Geographically weighted regression: one weighted least-squares fit per
//! location, plus the global diagnostics derived from the hat matrix.

use geo::Point;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::domain::{BandwidthCriterion, KernelKind};
use crate::error::AppError;
use crate::gwr::kernel::{Bandwidth, location_weights};
use crate::math::{FiveNumber, five_number, mean, normal_quantile, weighted_normal_inverse};
use crate::models::RegressionData;
use crate::spatial::distance_matrix;

/// Data + geometry shared by every fit at any bandwidth.
pub struct GwrModel<'a> {
    pub data: &'a RegressionData,
    pub kernel: KernelKind,
    dist: Vec<Vec<f64>>,
    sorted: Vec<Vec<f64>>,
}

/// Per-location output of one local regression.
struct LocalFit {
    betas: DVector<f64>,
    /// `diag((X'WX)⁻¹ X'W² X (X'WX)⁻¹)`; multiplied by σ² later.
    cct: Option<DVector<f64>>,
    fitted: f64,
    influence: f64,
    local_r2: Option<f64>,
}

/// Global diagnostics for a bandwidth, without per-location standard errors.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GwrScores {
    pub rss: f64,
    pub tr_s: f64,
    pub aic: f64,
    pub aicc: f64,
    pub bic: f64,
    pub cv: f64,
}

impl GwrScores {
    fn compute(y: &DVector<f64>, fitted: &[f64], influence: &[f64]) -> Self {
        let n = y.len();
        let nf = n as f64;
        let mut rss = 0.0;
        let mut cv = 0.0;
        for i in 0..n {
            let e = y[i] - fitted[i];
            rss += e * e;
            let loo = e / (1.0 - influence[i]);
            cv += loo * loo;
        }
        let tr_s: f64 = influence.iter().sum();
        let llf = -0.5 * nf * (1.0 + (2.0 * std::f64::consts::PI).ln() + (rss / nf).ln());
        let aicc = if nf - tr_s - 2.0 > 0.0 {
            -2.0 * llf + 2.0 * nf * (tr_s + 1.0) / (nf - tr_s - 2.0)
        } else {
            f64::INFINITY
        };
        Self {
            rss,
            tr_s,
            aic: -2.0 * llf + 2.0 * (tr_s + 1.0),
            aicc,
            bic: -2.0 * llf + (tr_s + 1.0) * nf.ln(),
            cv: cv / nf,
        }
    }

    pub fn criterion(&self, criterion: BandwidthCriterion) -> f64 {
        match criterion {
            BandwidthCriterion::Aicc => self.aicc,
            BandwidthCriterion::Aic => self.aic,
            BandwidthCriterion::Bic => self.bic,
            BandwidthCriterion::Cv => self.cv,
        }
    }
}

/// Distribution of one local coefficient across locations.
#[derive(Debug, Clone, Serialize)]
pub struct CoefficientSummary {
    pub name: String,
    pub mean: f64,
    pub five: Option<FiveNumber>,
    /// Percent of locations significant at the adjusted level.
    pub pct_significant: f64,
}

/// Fitted GWR.
#[derive(Debug, Clone, Serialize)]
pub struct GwrFit {
    pub n: usize,
    pub k: usize,
    pub kernel: KernelKind,
    pub bandwidth: Bandwidth,
    pub names: Vec<String>,
    /// `n × k` local coefficients.
    #[serde(skip)]
    pub params: DMatrix<f64>,
    #[serde(skip)]
    pub std_errors: DMatrix<f64>,
    #[serde(skip)]
    pub t_values: DMatrix<f64>,
    #[serde(skip)]
    pub fitted: Vec<f64>,
    #[serde(skip)]
    pub residuals: Vec<f64>,
    #[serde(skip)]
    pub influence: Vec<f64>,
    #[serde(skip)]
    pub local_r2: Vec<f64>,
    pub scores: GwrScores,
    /// `RSS / (n - tr(S))`.
    pub sigma2: f64,
    pub r2: f64,
    pub adj_r2: f64,
    /// Effective number of parameters, `tr(S)`.
    pub enp: f64,
    /// Significance level corrected for multiple local tests.
    pub adj_alpha: f64,
    pub critical_t: f64,
}

impl GwrFit {
    /// t-values with non-significant entries (at the adjusted level) zeroed.
    pub fn filtered_t_values(&self) -> DMatrix<f64> {
        self.t_values
            .map(|t| if t.abs() < self.critical_t { 0.0 } else { t })
    }

    /// Share of locations (0..=1) whose coefficient `j` is significant.
    pub fn share_significant(&self, j: usize) -> f64 {
        let hits = self.t_values.column(j).iter().filter(|t| t.abs() >= self.critical_t).count();
        hits as f64 / self.n.max(1) as f64
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.params.column(j).iter().copied().collect()
    }

    pub fn coefficient_summaries(&self) -> Vec<CoefficientSummary> {
        (0..self.k)
            .map(|j| {
                let col = self.column(j);
                CoefficientSummary {
                    name: self.names[j].clone(),
                    mean: mean(&col).unwrap_or(f64::NAN),
                    five: five_number(&col),
                    pct_significant: 100.0 * self.share_significant(j),
                }
            })
            .collect()
    }
}

impl<'a> GwrModel<'a> {
    pub fn new(data: &'a RegressionData, coords: &[Point<f64>], geographic: bool, kernel: KernelKind) -> Result<Self, AppError> {
        if coords.len() != data.n() {
            return Err(AppError::data("GWR coordinates and regression data have different sizes."));
        }
        if data.n() <= data.k() + 1 {
            return Err(AppError::data(format!(
                "GWR needs more than {} locations, got {}.",
                data.k() + 1,
                data.n()
            )));
        }
        let dist = distance_matrix(coords, geographic);
        let sorted = dist
            .iter()
            .map(|row| {
                let mut s = row.clone();
                s.sort_by(|a, b| a.total_cmp(b));
                s
            })
            .collect();
        Ok(Self {
            data,
            kernel,
            dist,
            sorted,
        })
    }

    pub fn n(&self) -> usize {
        self.data.n()
    }

    pub fn k(&self) -> usize {
        self.data.k()
    }

    /// Smallest and largest pairwise distances (excluding self).
    pub fn distance_range(&self) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max: f64 = 0.0;
        for row in &self.sorted {
            if let Some(&d) = row.get(1) {
                min = min.min(d);
            }
            if let Some(&d) = row.last() {
                max = max.max(d);
            }
        }
        (min, max)
    }

    fn local_fit(&self, i: usize, bw: Bandwidth, full: bool) -> Result<LocalFit, AppError> {
        let x = &self.data.x;
        let y = &self.data.y;
        let n = self.n();
        let k = self.k();
        let w = location_weights(self.kernel, bw, &self.dist[i], &self.sorted[i]);

        let inv = weighted_normal_inverse(x, Some(w.as_slice()))
            .ok_or_else(|| AppError::numeric(format!("Local design at location {i} is singular (bandwidth {bw}).")))?;
        let mut xtwy = DVector::<f64>::zeros(k);
        for j in 0..n {
            if w[j] == 0.0 {
                continue;
            }
            for a in 0..k {
                xtwy[a] += x[(j, a)] * w[j] * y[j];
            }
        }
        let betas = &inv * xtwy;
        let xi = x.row(i).transpose();
        let fitted = xi.dot(&betas);
        let influence = xi.dot(&(&inv * &xi)) * w[i];

        if !full {
            return Ok(LocalFit {
                betas,
                cct: None,
                fitted,
                influence,
                local_r2: None,
            });
        }

        let mut cct = DVector::<f64>::zeros(k);
        let mut sw = 0.0;
        let mut swy = 0.0;
        for j in 0..n {
            if w[j] == 0.0 {
                continue;
            }
            let v = &inv * x.row(j).transpose();
            let w2 = w[j] * w[j];
            for a in 0..k {
                cct[a] += w2 * v[a] * v[a];
            }
            sw += w[j];
            swy += w[j] * y[j];
        }

        let ybar = swy / sw;
        let mut tss = 0.0;
        let mut rss = 0.0;
        for j in 0..n {
            if w[j] == 0.0 {
                continue;
            }
            let pred = x.row(j).transpose().dot(&betas);
            tss += w[j] * (y[j] - ybar).powi(2);
            rss += w[j] * (y[j] - pred).powi(2);
        }
        let local_r2 = if tss > 0.0 { (tss - rss) / tss } else { f64::NAN };

        Ok(LocalFit {
            betas,
            cct: Some(cct),
            fitted,
            influence,
            local_r2: Some(local_r2),
        })
    }

    fn local_fits(&self, bw: Bandwidth, full: bool) -> Result<Vec<LocalFit>, AppError> {
        (0..self.n())
            .into_par_iter()
            .map(|i| self.local_fit(i, bw, full))
            .collect()
    }

    /// Global scores at a bandwidth (no standard errors).
    pub fn score(&self, bw: Bandwidth) -> Result<GwrScores, AppError> {
        let fits = self.local_fits(bw, false)?;
        let fitted: Vec<f64> = fits.iter().map(|f| f.fitted).collect();
        let influence: Vec<f64> = fits.iter().map(|f| f.influence).collect();
        Ok(GwrScores::compute(&self.data.y, &fitted, &influence))
    }

    /// Full fit at a bandwidth.
    pub fn fit(&self, bw: Bandwidth, alpha: f64) -> Result<GwrFit, AppError> {
        let n = self.n();
        let k = self.k();
        let fits = self.local_fits(bw, true)?;

        let fitted: Vec<f64> = fits.iter().map(|f| f.fitted).collect();
        let influence: Vec<f64> = fits.iter().map(|f| f.influence).collect();
        let scores = GwrScores::compute(&self.data.y, &fitted, &influence);
        let nf = n as f64;
        if nf - scores.tr_s <= 0.0 {
            return Err(AppError::numeric(format!(
                "Bandwidth {bw} is too small: tr(S) = {:.2} >= n = {n}.",
                scores.tr_s
            )));
        }
        let sigma2 = scores.rss / (nf - scores.tr_s);

        let mut params = DMatrix::<f64>::zeros(n, k);
        let mut std_errors = DMatrix::<f64>::zeros(n, k);
        let mut t_values = DMatrix::<f64>::zeros(n, k);
        let mut local_r2 = Vec::with_capacity(n);
        for (i, f) in fits.iter().enumerate() {
            for a in 0..k {
                params[(i, a)] = f.betas[a];
                let se = f.cct.as_ref().map_or(f64::NAN, |c| (c[a] * sigma2).max(0.0).sqrt());
                std_errors[(i, a)] = se;
                t_values[(i, a)] = f.betas[a] / se;
            }
            local_r2.push(f.local_r2.unwrap_or(f64::NAN));
        }

        let y_mean = self.data.y.mean();
        let tss: f64 = self.data.y.iter().map(|v| (v - y_mean).powi(2)).sum();
        let r2 = 1.0 - scores.rss / tss;
        let adj_r2 = 1.0 - (1.0 - r2) * (nf - 1.0) / (nf - scores.tr_s - 1.0);

        let adj_alpha = alpha * k as f64 / scores.tr_s;
        let critical_t = normal_quantile(1.0 - adj_alpha / 2.0);
        debug!(bandwidth = %bw, tr_s = scores.tr_s, aicc = scores.aicc, "gwr fitted");

        let residuals = (0..n).map(|i| self.data.y[i] - fitted[i]).collect();
        Ok(GwrFit {
            n,
            k,
            kernel: self.kernel,
            bandwidth: bw,
            names: self.data.names.clone(),
            params,
            std_errors,
            t_values,
            fitted,
            residuals,
            influence,
            local_r2,
            scores,
            sigma2,
            r2,
            adj_r2,
            enp: scores.tr_s,
            adj_alpha,
            critical_t,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::fit_ols;

    /// 12×12 lattice where the slope on `x` drifts from west to east.
    pub(crate) fn drifting_slope() -> (RegressionData, Vec<Point<f64>>) {
        let side = 12;
        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut coords = Vec::new();
        for r in 0..side {
            for c in 0..side {
                let xv = ((r * 5 + c * 7) % 9) as f64 - 4.0;
                let slope = 0.5 + 2.0 * c as f64 / (side - 1) as f64;
                let noise = ((r * 13 + c * 29) % 7) as f64 * 0.01;
                x.push(xv);
                y.push(1.0 + slope * xv + noise);
                coords.push(Point::new(c as f64 * 100.0, r as f64 * 100.0));
            }
        }
        (RegressionData::from_parts(y, vec![x], &["x"]), coords)
    }

    #[test]
    fn huge_gaussian_bandwidth_matches_ols() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Gaussian).unwrap();
        let fit = model.fit(Bandwidth::Fixed(1e9), 0.05).unwrap();
        let ols = fit_ols(&data).unwrap();
        for i in 0..data.n() {
            for a in 0..data.k() {
                assert!((fit.params[(i, a)] - ols.betas[a]).abs() < 1e-6);
            }
        }
        assert!((fit.enp - data.k() as f64).abs() < 1e-6);
    }

    #[test]
    fn local_slopes_track_the_drift() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Bisquare).unwrap();
        let fit = model.fit(Bandwidth::Adaptive(30), 0.05).unwrap();
        let west = fit.params[(0, 1)];
        let east = fit.params[(11, 1)];
        assert!(east > west + 1.0, "west={west} east={east}");
        assert!(fit.r2 > 0.9);
        assert!(fit.adj_alpha < 0.05);
        assert!(fit.critical_t > 1.96);
        assert!(fit.local_r2.iter().all(|r| r.is_finite()));
        assert!(fit.std_errors.iter().all(|s| *s > 0.0));
    }

    #[test]
    fn filtered_t_values_zero_insignificant() {
        let (data, coords) = drifting_slope();
        let model = GwrModel::new(&data, &coords, false, KernelKind::Gaussian).unwrap();
        let fit = model.fit(Bandwidth::Adaptive(40), 0.05).unwrap();
        let filtered = fit.filtered_t_values();
        for (t, ft) in fit.t_values.iter().zip(filtered.iter()) {
            assert!(*ft == 0.0 || (ft - t).abs() < 1e-12);
        }
    }
}
