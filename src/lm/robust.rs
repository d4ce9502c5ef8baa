//! Robust loss functions.
//!
//! The fitting stages measure misfit with a sum of absolute residuals, which is far
//! less sensitive to unmodelled peaks than a sum of squares. The L1 loss is realised
//! through the soft-L1 function
//!
//! ρ(r) = 2s² (√(1 + (r/s)²) − 1)
//!
//! which is quadratic for |r| ≪ s and grows like 2s|r| beyond. With a scale `s`
//! that is small compared to the data, minimising Σρ minimises Σ|r|.
//!
//! The Levenberg-Marquardt loop only understands sums of squares, so each residual
//! is replaced by the pseudo-residual `r̃ = sign(r) √ρ(r)` (Σr̃² = Σρ) and the Jacobian
//! rows are scaled by `dr̃/dr`.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Loss applied to the residual vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum RobustLoss {
    /// Standard least squares
    ///
    /// ρ(r) = r²
    #[default]
    LeastSquares,

    /// Smooth approximation to the absolute value with transition scale `scale`
    ///
    /// ρ(r) = 2s² (√(1 + (r/s)²) − 1)
    SoftL1 { scale: f64 },
}

impl fmt::Display for RobustLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobustLoss::LeastSquares => write!(f, "Least Squares"),
            RobustLoss::SoftL1 { scale } => write!(f, "Soft L1(scale={})", scale),
        }
    }
}

impl RobustLoss {
    /// Soft-L1 loss whose scale is a small fraction of `magnitude`.
    ///
    /// `magnitude` is typically the peak-to-peak range of the data being fitted.
    pub fn l1_for_magnitude(magnitude: f64) -> Self {
        let scale = (magnitude.abs() * 1e-3).max(1e-12);
        RobustLoss::SoftL1 { scale }
    }

    /// Loss contribution of a single residual.
    pub fn rho(&self, r: f64) -> f64 {
        match *self {
            RobustLoss::LeastSquares => r * r,
            RobustLoss::SoftL1 { scale } => {
                let z = r / scale;
                // √(1+z²) − 1 written without cancellation
                2.0 * scale * scale * z * z / ((1.0 + z * z).sqrt() + 1.0)
            }
        }
    }

    /// Pseudo-residual and its derivative with respect to the raw residual.
    pub fn transform(&self, r: f64) -> (f64, f64) {
        match *self {
            RobustLoss::LeastSquares => (r, 1.0),
            RobustLoss::SoftL1 { scale } => {
                let z = r / scale;
                let root = (1.0 + z * z).sqrt();
                let rho = 2.0 * scale * scale * z * z / (root + 1.0);
                let pseudo = rho.sqrt();
                // dr̃/dr = |r| / (√(1+z²) √ρ), which tends to 1 as r → 0
                let derivative = if pseudo > 1e-300 {
                    r.abs() / (root * pseudo)
                } else {
                    1.0
                };
                (r.signum() * pseudo, derivative)
            }
        }
    }

    /// Total loss of a residual vector.
    pub fn total(&self, residuals: &Array1<f64>) -> f64 {
        residuals.iter().map(|&r| self.rho(r)).sum()
    }

    /// Pseudo-residuals together with the row scaling for the Jacobian.
    pub fn apply(&self, residuals: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let mut pseudo = Array1::zeros(residuals.len());
        let mut scale = Array1::zeros(residuals.len());
        for (i, &r) in residuals.iter().enumerate() {
            let (p, d) = self.transform(r);
            pseudo[i] = p;
            scale[i] = d;
        }
        (pseudo, scale)
    }

    /// Scale the Jacobian rows by the derivative of the pseudo-residuals.
    pub fn scale_jacobian(&self, jacobian: &mut Array2<f64>, row_scale: &Array1<f64>) {
        if matches!(self, RobustLoss::LeastSquares) {
            return;
        }
        for (mut row, &s) in jacobian.axis_iter_mut(Axis(0)).zip(row_scale.iter()) {
            row.mapv_inplace(|v| v * s);
        }
    }
}
