//! Regression design built from aggregated area records.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::domain::{AnalysisConfig, AreaRecord};
use crate::error::AppError;
use crate::math::standardize_in_place;

/// Response + design matrix (intercept first) with column names.
#[derive(Debug, Clone)]
pub struct RegressionData {
    pub y: DVector<f64>,
    pub x: DMatrix<f64>,
    /// Names of the columns of `x`, starting with `CONSTANT`.
    pub names: Vec<String>,
    pub y_name: String,
    /// Column scaling applied (`None` when raw units are used).
    pub scaling: Option<Scaling>,
}

/// Mean/sd used to z-standardize the response and each regressor.
#[derive(Debug, Clone, Serialize)]
pub struct Scaling {
    pub y_mean: f64,
    pub y_sd: f64,
    pub x_mean: Vec<f64>,
    pub x_sd: Vec<f64>,
}

impl RegressionData {
    /// Build the design for the configured response/regressors.
    ///
    /// When `standardize` is set, the response and every regressor (not the
    /// intercept) are z-scored so coefficients are comparable.
    pub fn from_records(records: &[AreaRecord], config: &AnalysisConfig, standardize: bool) -> Result<Self, AppError> {
        let n = records.len();
        let k = config.explanatory.len();
        if n == 0 {
            return Err(AppError::data("No areas available for regression."));
        }

        let mut y: Vec<f64> = Vec::with_capacity(n);
        for r in records {
            let v = if config.log_price {
                r.mean_price.ln()
            } else {
                r.mean_price
            };
            if !v.is_finite() {
                return Err(AppError::numeric(format!("Non-finite response for area {}.", r.id)));
            }
            y.push(v);
        }

        let mut cols: Vec<Vec<f64>> = (0..k).map(|j| records.iter().map(|r| r.means[j]).collect()).collect();

        let scaling = if standardize {
            let (y_mean, y_sd) = standardize_in_place(&mut y);
            let mut x_mean = Vec::with_capacity(k);
            let mut x_sd = Vec::with_capacity(k);
            for col in cols.iter_mut() {
                let (m, sd) = standardize_in_place(col);
                x_mean.push(m);
                x_sd.push(sd);
            }
            Some(Scaling {
                y_mean,
                y_sd,
                x_mean,
                x_sd,
            })
        } else {
            None
        };

        let x = DMatrix::from_fn(n, k + 1, |i, j| if j == 0 { 1.0 } else { cols[j - 1][i] });

        let mut names = vec!["CONSTANT".to_string()];
        names.extend(config.explanatory.iter().map(|v| v.label().to_string()));

        Ok(Self {
            y: DVector::from_vec(y),
            x,
            names,
            y_name: config.response_label().to_string(),
            scaling,
        })
    }

    pub fn n(&self) -> usize {
        self.x.nrows()
    }

    /// Number of columns including the intercept.
    pub fn k(&self) -> usize {
        self.x.ncols()
    }

    /// Build directly from vectors (tests, synthetic runs).
    pub fn from_parts(y: Vec<f64>, columns: Vec<Vec<f64>>, names: &[&str]) -> Self {
        let n = y.len();
        let k = columns.len();
        let x = DMatrix::from_fn(n, k + 1, |i, j| if j == 0 { 1.0 } else { columns[j - 1][i] });
        let mut all_names = vec!["CONSTANT".to_string()];
        all_names.extend(names.iter().map(|s| s.to_string()));
        Self {
            y: DVector::from_vec(y),
            x,
            names: all_names,
            y_name: "y".to_string(),
            scaling: None,
        }
    }
}

/// One row of a coefficient table.
#[derive(Debug, Clone, Serialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// t (OLS) or z (ML models).
    pub statistic: f64,
    pub p_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, price: f64, means: Vec<f64>) -> AreaRecord {
        AreaRecord {
            area_index: 0,
            id: id.to_string(),
            name: None,
            centroid: (0.0, 0.0),
            n_listings: 5,
            mean_price: price,
            means,
        }
    }

    #[test]
    fn log_response_and_intercept() {
        let config = AnalysisConfig {
            explanatory: vec![crate::domain::Variable::Bedrooms],
            ..AnalysisConfig::default()
        };
        let records = vec![record("a", 100.0, vec![1.0]), record("b", 200.0, vec![2.0])];
        let data = RegressionData::from_records(&records, &config, false).unwrap();
        assert_eq!(data.k(), 2);
        assert_eq!(data.names, vec!["CONSTANT", "bedrooms"]);
        assert!((data.y[1] - 200.0_f64.ln()).abs() < 1e-12);
        assert_eq!(data.x[(0, 0)], 1.0);
    }

    #[test]
    fn standardized_columns_have_zero_mean() {
        let config = AnalysisConfig {
            explanatory: vec![crate::domain::Variable::Bedrooms],
            log_price: false,
            ..AnalysisConfig::default()
        };
        let records = vec![
            record("a", 100.0, vec![1.0]),
            record("b", 200.0, vec![2.0]),
            record("c", 300.0, vec![4.0]),
        ];
        let data = RegressionData::from_records(&records, &config, true).unwrap();
        let col_mean: f64 = (0..3).map(|i| data.x[(i, 1)]).sum::<f64>() / 3.0;
        assert!(col_mean.abs() < 1e-12);
        assert!(data.y.iter().sum::<f64>().abs() < 1e-9);
        assert!(data.scaling.is_some());
    }
}
