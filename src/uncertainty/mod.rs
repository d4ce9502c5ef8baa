//! # Uncertainty Calculation
//!
//! Parameter uncertainties for least-squares fits: covariance estimation from
//! the Jacobian at the solution and 1-σ standard errors.

mod covariance;

pub use covariance::{calculate_covariance, reduced_chi_square, standard_errors_from_covariance};
