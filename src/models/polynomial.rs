//! Polynomials defined by the points they pass through.
//!
//! A polynomial of order `P` is fixed by its values at `P + 1` distinct anchor
//! positions. Fitting the anchor values instead of the monomial coefficients keeps
//! the parameters on the scale of the data, so high orders stay well conditioned.
//! The model is linear in the anchor values; its Jacobian is the Lagrange basis.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::model::ModelFunction;

/// Polynomial through fixed anchor positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPolynomial {
    anchors: Array1<f64>,
}

impl AnchorPolynomial {
    /// # Errors
    ///
    /// `InvalidInput` when there are no anchors, an anchor is not finite, or two
    /// anchors coincide.
    pub fn new(anchors: Array1<f64>) -> Result<Self> {
        if anchors.is_empty() {
            return Err(SpecFitError::InvalidInput(
                "a polynomial needs at least one anchor".to_string(),
            ));
        }
        if anchors.iter().any(|a| !a.is_finite()) {
            return Err(SpecFitError::InvalidInput(
                "polynomial anchors must be finite".to_string(),
            ));
        }
        for i in 0..anchors.len() {
            for j in 0..i {
                if anchors[i] == anchors[j] {
                    return Err(SpecFitError::InvalidInput(format!(
                        "duplicate polynomial anchor at {}",
                        anchors[i]
                    )));
                }
            }
        }
        Ok(Self { anchors })
    }

    pub fn anchors(&self) -> &Array1<f64> {
        &self.anchors
    }

    /// Polynomial order (one less than the number of anchors).
    pub fn order(&self) -> usize {
        self.anchors.len() - 1
    }

    /// Lagrange basis `L_k(x)` for every anchor `k`.
    pub fn basis_at(&self, x: f64) -> Vec<f64> {
        let a = &self.anchors;
        (0..a.len())
            .map(|k| {
                let mut l = 1.0;
                for j in 0..a.len() {
                    if j != k {
                        l *= (x - a[j]) / (a[k] - a[j]);
                    }
                }
                l
            })
            .collect()
    }

    /// Basis matrix with one row per sample and one column per anchor.
    pub fn basis(&self, x: ArrayView1<f64>) -> Array2<f64> {
        let k = self.anchors.len();
        let mut out = Array2::zeros((x.len(), k));
        for (i, &v) in x.iter().enumerate() {
            for (j, b) in self.basis_at(v).into_iter().enumerate() {
                out[[i, j]] = b;
            }
        }
        out
    }

    /// Evaluate the polynomial taking `values` at the anchors.
    pub fn eval(&self, x: ArrayView1<f64>, values: ArrayView1<f64>) -> Array1<f64> {
        self.basis(x).dot(&values)
    }
}

impl ModelFunction for AnchorPolynomial {
    fn parameter_count(&self) -> usize {
        self.anchors.len()
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(AnchorPolynomial::eval(self, x.view(), params.view()))
    }

    fn jacobian(&self, x: &Array1<f64>, _params: &Array1<f64>) -> Option<Array2<f64>> {
        Some(self.basis(x.view()))
    }
}
