//! # Covariance Matrix Calculations
//!
//! This module provides functions for calculating covariance matrices and
//! 1-σ parameter errors from the Jacobian at a least-squares solution.

use ndarray::{Array1, Array2};

use crate::utils::linalg::spd_inverse;

/// Reduced chi-square `Σr² / (m − n)`, or `None` without degrees of freedom.
pub fn reduced_chi_square(residuals: &Array1<f64>, n_params: usize) -> Option<f64> {
    let m = residuals.len();
    if m <= n_params {
        return None;
    }
    let chisqr: f64 = residuals.iter().map(|r| r * r).sum();
    Some(chisqr / (m - n_params) as f64)
}

/// Calculate covariance matrix from Jacobian matrix.
///
/// For nonlinear least-squares problems, the covariance matrix is estimated as:
///   covar = redchi * inv(JᵀJ)
///
/// Returns `None` when JᵀJ is singular, e.g. when a peak of zero height leaves
/// its centre and width undetermined.
pub fn calculate_covariance(jacobian: &Array2<f64>, redchi: f64) -> Option<Array2<f64>> {
    let jtj = jacobian.t().dot(jacobian);
    let n = jtj.nrows();

    // Equilibrate before inverting: parameters span many orders of magnitude
    let scale: Array1<f64> = (0..n)
        .map(|i| {
            let d = jtj[[i, i]];
            if d > 0.0 {
                1.0 / d.sqrt()
            } else {
                0.0
            }
        })
        .collect();
    if scale.iter().any(|&s| s == 0.0) {
        return None;
    }

    let mut scaled = jtj.clone();
    for i in 0..n {
        for j in 0..n {
            scaled[[i, j]] *= scale[i] * scale[j];
        }
    }

    let inv = spd_inverse(&scaled)?;
    let mut covar = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            covar[[i, j]] = inv[[i, j]] * scale[i] * scale[j] * redchi;
        }
    }
    Some(covar)
}

/// Extract standard errors from the covariance matrix.
///
/// Standard errors are the square roots of the diagonal elements; a
/// non-positive or non-finite variance yields an unknown error.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Vec<Option<f64>> {
    (0..covar.nrows())
        .map(|i| {
            let v = covar[[i, i]];
            if v >= 0.0 && v.is_finite() {
                Some(v.sqrt())
            } else {
                None
            }
        })
        .collect()
}
