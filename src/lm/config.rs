//! Configuration options for the Levenberg-Marquardt algorithm.
//!
//! This module defines the convergence criteria, the damping schedule and the
//! loss function used by the bounded Levenberg-Marquardt solver.

use serde::{Deserialize, Serialize};

use super::robust::RobustLoss;

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of accepted iterations. Default: 200
    pub max_iterations: usize,

    /// Tolerance for relative change in cost. Default: 1e-10
    pub ftol: f64,

    /// Tolerance for relative change in parameter values. Default: 1e-10
    pub xtol: f64,

    /// Tolerance for the infinity norm of the projected gradient. Default: 1e-12
    pub gtol: f64,

    /// Initial damping, applied to the diagonal of JᵀJ (Marquardt scaling). Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-12
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e16
    pub max_lambda: f64,

    /// Whether to return the Jacobian at the solution. Default: false
    pub calc_jacobian: bool,

    /// The loss applied to the residuals. Default: LeastSquares
    pub loss_function: RobustLoss,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e16,
            calc_jacobian: false,
            loss_function: RobustLoss::default(),
        }
    }
}

impl LmConfig {
    /// Configuration for L1 minimisation of data with the given peak-to-peak magnitude.
    pub fn l1(magnitude: f64) -> Self {
        Self {
            loss_function: RobustLoss::l1_for_magnitude(magnitude),
            ..Self::default()
        }
    }
}
