//! Problem definition trait.
//!
//! This module defines the `Problem` trait, which represents a nonlinear
//! least squares problem to be solved with the Levenberg-Marquardt algorithm.
//! Every fit in the crate (peak refinement, L1 background fits, notch fits)
//! is phrased as a `Problem` over a flat parameter vector.

use crate::error::Result;
use ndarray::{Array1, Array2};

/// A trait representing a nonlinear least squares problem.
///
/// This trait defines the interface for problems that can be solved using
/// the Levenberg-Marquardt algorithm.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    ///
    /// This function calculates the vector of residuals (differences between the model
    /// and the data) at the given parameter values.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// The Jacobian is the matrix of partial derivatives of the residuals with respect
    /// to the parameters.
    ///
    /// # Default Implementation
    ///
    /// Forward finite differences.
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Check if this problem provides a custom Jacobian implementation.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Quadratic {
        x: Array1<f64>,
        y: Array1<f64>,
    }

    impl Problem for Quadratic {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(Array1::from_iter(
                self.x
                    .iter()
                    .zip(self.y.iter())
                    .map(|(&x, &y)| params[0] * x * x + params[1] - y),
            ))
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.x.len()
        }
    }

    #[test]
    fn test_default_jacobian_and_cost() {
        let problem = Quadratic {
            x: array![0.0, 1.0, 2.0],
            y: array![1.0, 3.0, 9.0],
        };
        let params = array![2.0, 1.0];

        assert_relative_eq!(problem.eval_cost(&params).unwrap(), 0.0);

        let jac = problem.jacobian(&params).unwrap();
        assert_eq!(jac.shape(), &[3, 2]);
        assert_relative_eq!(jac[[2, 0]], 4.0, epsilon = 1e-5);
        assert_relative_eq!(jac[[1, 1]], 1.0, epsilon = 1e-5);
        assert!(!problem.has_custom_jacobian());
    }
}
