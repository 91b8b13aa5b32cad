//! Least squares solvers.
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2          (OLS, spatially filtered OLS)
//! (X^T W X)^{-1}                        (coefficient covariance, GWR local fits)
//! ```
//!
//! Implementation choices:
//! - GWR builds its local estimates from `weighted_normal_inverse`, which takes
//!   the kernel weights directly.
//! - SVD handles tall design matrices and degrades gracefully when columns are
//!   nearly collinear (area means of bedrooms/accommodates often are).
//!   Nalgebra's `QR::solve` is intended for square systems and panics for
//!   non-square matrices.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// `(X^T W X)^{-1}` for diagonal weights (`None` means unit weights).
///
/// Uses Cholesky on the normal matrix and falls back to a pseudo-inverse when
/// the matrix is only semi-definite.
pub fn weighted_normal_inverse(x: &DMatrix<f64>, w: Option<&[f64]>) -> Option<DMatrix<f64>> {
    let xtwx = match w {
        None => x.transpose() * x,
        Some(w) => {
            let mut xw = x.clone();
            for (i, &wi) in w.iter().enumerate() {
                xw.row_mut(i).scale_mut(wi);
            }
            x.transpose() * xw
        }
    };
    if let Some(chol) = xtwx.clone().cholesky() {
        let inv = chol.inverse();
        if inv.iter().all(|v| v.is_finite()) {
            return Some(inv);
        }
    }
    xtwx.pseudo_inverse(1e-12).ok().filter(|m| m.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn zero_weight_rows_drop_out_of_normal_matrix() {
        // The third row carries no weight, so the inverse matches the
        // unweighted inverse of the remaining rows.
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 50.0, 1.0, 3.0]);
        let kept = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 3.0]);
        let weighted = weighted_normal_inverse(&x, Some(&[1.0, 1.0, 0.0, 1.0])).unwrap();
        let plain = weighted_normal_inverse(&kept, None).unwrap();
        assert!((weighted - plain).abs().max() < 1e-10);
    }

    #[test]
    fn normal_inverse_matches_identity() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let inv = weighted_normal_inverse(&x, None).unwrap();
        let prod = (x.transpose() * &x) * inv;
        assert!((prod[(0, 0)] - 1.0).abs() < 1e-10);
        assert!(prod[(0, 1)].abs() < 1e-10);
    }
}
