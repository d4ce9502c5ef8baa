//! Dense symmetric positive-definite solves.
//!
//! The parameter counts in this crate stay small (a constant plus a few dozen
//! peaks), so a plain Cholesky factorisation on ndarray is enough for both the
//! damped normal equations and the covariance inverse.

use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
///
/// Returns `None` when a pivot is not strictly positive.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));

    for k in 0..n {
        let mut diag = a[[k, k]];
        for j in 0..k {
            diag -= l[[k, j]] * l[[k, j]];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return None;
        }
        let lkk = diag.sqrt();
        l[[k, k]] = lkk;

        for i in k + 1..n {
            let mut v = a[[i, k]];
            for j in 0..k {
                v -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] = v / lkk;
        }
    }

    Some(l)
}

/// Solve `L Lᵀ x = b` given the Cholesky factor `L`.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = b.clone();

    // Forward substitution (L * y = b)
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }

    // Backward substitution (Lᵀ * x = y)
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut v = y[i];
        for j in (i + 1)..n {
            v -= l[[j, i]] * x[j];
        }
        x[i] = v / l[[i, i]];
    }

    x
}

/// Inverse of a symmetric positive-definite matrix, or `None` if it is singular.
pub fn spd_inverse(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let l = cholesky(a)?;
    let mut inv = Array2::zeros((n, n));
    let mut e = Array1::zeros(n);
    for col in 0..n {
        e.fill(0.0);
        e[col] = 1.0;
        let x = cholesky_solve(&l, &e);
        inv.column_mut(col).assign(&x);
    }
    Some(inv)
}
