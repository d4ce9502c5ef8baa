//! Finite difference methods for numerical differentiation.
//!
//! This module provides the Jacobian approximation used by problems that do not
//! supply an analytic one (the Stokes background, the notch sigmoids).

use crate::error::{Result, SpecFitError};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Default relative step size for finite differences (square root of machine epsilon).
const DEFAULT_EPSILON: f64 = 1.490_116_119_384_765_6e-8;

/// Compute the Jacobian matrix using forward finite differences.
///
/// The Jacobian is the matrix of partial derivatives of the residuals with
/// respect to the parameters: J[i,j] = ∂residual[i]/∂param[j].
///
/// The step for parameter `j` is `epsilon * |param_j|`, or `epsilon` itself for
/// parameters close to zero.
pub fn jacobian<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let residuals = problem.eval(params)?;
    if residuals.len() != n_residuals {
        return Err(SpecFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    let mut params_perturbed = params.clone();

    for j in 0..n_params {
        let param_j = params[j];
        let eps_j = eps * param_j.abs().max(1.0);

        params_perturbed[j] = param_j + eps_j;
        let residuals_perturbed = problem.eval(&params_perturbed)?;
        params_perturbed[j] = param_j;

        let mut column = jac.column_mut(j);
        for i in 0..n_residuals {
            column[i] = (residuals_perturbed[i] - residuals[i]) / eps_j;
        }
    }

    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Exponential {
        x: Array1<f64>,
    }

    impl Problem for Exponential {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(self.x.mapv(|x| params[0] * (-params[1] * x).exp()))
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.x.len()
        }
    }

    #[test]
    fn test_forward_difference_jacobian() {
        let problem = Exponential {
            x: array![0.0, 0.5, 1.0, 2.0],
        };
        let params = array![3.0, 0.7];
        let jac = jacobian(&problem, &params, None).unwrap();

        for (i, &x) in problem.x.iter().enumerate() {
            let e = (-0.7 * x).exp();
            assert_relative_eq!(jac[[i, 0]], e, epsilon = 1e-6);
            assert_relative_eq!(jac[[i, 1]], -3.0 * x * e, epsilon = 1e-6);
        }
    }
}
