//! Levenberg-Marquardt solver with box bounds.
//!
//! [`LevenbergMarquardt`] minimises the cost of a [`Problem`](crate::problem::Problem)
//! inside optional [`ParameterBounds`](crate::parameters::ParameterBounds). Every trial
//! point is projected onto the bounds and convergence is judged on the projected
//! gradient. A [`RobustLoss`] turns the same machinery into a soft-L1 minimiser.

pub mod algorithm;
pub mod config;
pub mod robust;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;
pub use robust::RobustLoss;
