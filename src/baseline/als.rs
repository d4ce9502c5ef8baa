//! Asymmetric least-squares smoothing.
//!
//! Solves `(W + λ·DᵀD) z = W y` with `D` the second-difference operator. Samples
//! above the current baseline get weight `p`, the rest `1 − p`, so the baseline
//! hugs the lower envelope of the signal.

use log::trace;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};

/// Options of [`als_baseline`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlsOptions {
    /// Smoothness penalty λ. Default: 1e4
    pub lambda: f64,

    /// Asymmetry p. Default: 0.01
    pub p: f64,

    /// Reweighting passes. Default: 20
    pub iterations: usize,
}

impl Default for AlsOptions {
    fn default() -> Self {
        Self {
            lambda: 1e4,
            p: 1e-2,
            iterations: 20,
        }
    }
}

impl AlsOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_p(mut self, p: f64) -> Self {
        self.p = p;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Bands of the symmetric pentadiagonal matrix `diag(w) + λ·DᵀD`.
fn penalised_bands(weights: &[f64], lambda: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = weights.len();
    let mut d0 = weights.to_vec();
    let mut d1 = vec![0.0; n.saturating_sub(1)];
    let mut d2 = vec![0.0; n.saturating_sub(2)];
    let stencil = [1.0, -2.0, 1.0];
    for k in 0..n.saturating_sub(2) {
        for a in 0..3 {
            d0[k + a] += lambda * stencil[a] * stencil[a];
            for b in a + 1..3 {
                let v = lambda * stencil[a] * stencil[b];
                if b - a == 1 {
                    d1[k + a] += v;
                } else {
                    d2[k + a] += v;
                }
            }
        }
    }
    (d0, d1, d2)
}

/// Solve a symmetric positive-definite pentadiagonal system by banded Cholesky.
///
/// `d0` is the diagonal, `d1` and `d2` the first and second super-diagonals.
fn solve_pentadiagonal(d0: &[f64], d1: &[f64], d2: &[f64], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = d0.len();
    // Lower factor: l0 diagonal, l1 first and l2 second sub-diagonal.
    let mut l0 = vec![0.0; n];
    let mut l1 = vec![0.0; n];
    let mut l2 = vec![0.0; n];
    for i in 0..n {
        if i >= 2 {
            l2[i] = d2[i - 2] / l0[i - 2];
        }
        if i >= 1 {
            let cross = if i >= 2 { l2[i] * l1[i - 1] } else { 0.0 };
            l1[i] = (d1[i - 1] - cross) / l0[i - 1];
        }
        let diag = d0[i] - l1[i] * l1[i] - l2[i] * l2[i];
        if diag <= 0.0 || !diag.is_finite() {
            return None;
        }
        l0[i] = diag.sqrt();
    }

    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut acc = rhs[i];
        if i >= 1 {
            acc -= l1[i] * z[i - 1];
        }
        if i >= 2 {
            acc -= l2[i] * z[i - 2];
        }
        z[i] = acc / l0[i];
    }
    for i in (0..n).rev() {
        let mut acc = z[i];
        if i + 1 < n {
            acc -= l1[i + 1] * z[i + 1];
        }
        if i + 2 < n {
            acc -= l2[i + 2] * z[i + 2];
        }
        z[i] = acc / l0[i];
    }
    Some(z)
}

/// Asymmetric least-squares baseline of `y`.
///
/// # Errors
///
/// `InvalidInput` for a negative λ or `p` outside `(0, 1)`, `SingularMatrix`
/// if the penalised system loses positive definiteness.
pub fn als_baseline(y: ArrayView1<f64>, options: &AlsOptions) -> Result<Array1<f64>> {
    if options.lambda < 0.0 || !(options.p > 0.0 && options.p < 1.0) {
        return Err(SpecFitError::InvalidInput(format!(
            "ALS needs λ ≥ 0 and 0 < p < 1, got λ = {}, p = {}",
            options.lambda, options.p
        )));
    }
    let n = y.len();
    if n < 3 {
        return Ok(y.to_owned());
    }

    let y: Vec<f64> = y.to_vec();
    let mut w = vec![1.0; n];
    let mut z = y.clone();
    for pass in 0..options.iterations {
        let (d0, d1, d2) = penalised_bands(&w, options.lambda);
        let rhs: Vec<f64> = w.iter().zip(y.iter()).map(|(wi, yi)| wi * yi).collect();
        z = solve_pentadiagonal(&d0, &d1, &d2, &rhs).ok_or(SpecFitError::SingularMatrix)?;
        for i in 0..n {
            w[i] = if y[i] > z[i] { options.p } else { 1.0 - options.p };
        }
        trace!("ALS pass {}", pass);
    }
    Ok(Array1::from_vec(z))
}
