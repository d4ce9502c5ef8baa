//! Integration tests for the Levenberg-Marquardt algorithm.

use approx::assert_relative_eq;
use ndarray::{array, Array1, Array2};
use specfit_rs::lm::{LevenbergMarquardt, LmConfig, RobustLoss};
use specfit_rs::parameters::{Bounds, ParameterBounds};
use specfit_rs::{Problem, Result, SpecFitError};

/// Residuals of a Gaussian `h·exp(−½((x − c)/w)²)` against data.
struct GaussianProblem {
    x: Array1<f64>,
    y: Array1<f64>,
    analytic: bool,
}

impl GaussianProblem {
    fn new(c: f64, w: f64, h: f64, analytic: bool) -> Self {
        let x = Array1::linspace(-10.0, 10.0, 81);
        let y = x.mapv(|v: f64| h * (-0.5 * ((v - c) / w).powi(2)).exp());
        Self { x, y, analytic }
    }
}

impl Problem for GaussianProblem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != 3 {
            return Err(SpecFitError::DimensionMismatch(format!(
                "Expected 3 parameters, got {}",
                params.len()
            )));
        }
        let (c, w, h) = (params[0], params[1], params[2]);
        Ok(&self.x.mapv(|v| h * (-0.5 * ((v - c) / w).powi(2)).exp()) - &self.y)
    }

    fn parameter_count(&self) -> usize {
        3
    }

    fn residual_count(&self) -> usize {
        self.x.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        if !self.analytic {
            return specfit_rs::utils::finite_difference::jacobian(self, params, None);
        }
        let (c, w, h) = (params[0], params[1], params[2]);
        let mut jac = Array2::zeros((self.x.len(), 3));
        for (i, &v) in self.x.iter().enumerate() {
            let u = (v - c) / w;
            let e = (-0.5 * u * u).exp();
            jac[[i, 0]] = h * e * u / w;
            jac[[i, 1]] = h * e * u * u / w;
            jac[[i, 2]] = e;
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        self.analytic
    }
}

#[test]
fn test_analytic_and_numeric_jacobians_agree() {
    let analytic = GaussianProblem::new(1.0, 2.0, 3.0, true);
    let numeric = GaussianProblem::new(1.0, 2.0, 3.0, false);
    let p = array![0.5, 2.5, 2.0];
    let ja = analytic.jacobian(&p).unwrap();
    let jn = numeric.jacobian(&p).unwrap();
    for (a, n) in ja.iter().zip(jn.iter()) {
        assert!((a - n).abs() < 1e-5);
    }
}

#[test]
fn test_gaussian_recovered_with_both_jacobians() {
    for analytic in [true, false] {
        let problem = GaussianProblem::new(1.5, 2.0, 3.0, analytic);
        let result = LevenbergMarquardt::new()
            .minimize(&problem, array![0.0, 3.0, 1.0])
            .unwrap();
        assert!(result.success, "{}", result.message);
        assert_relative_eq!(result.params[0], 1.5, epsilon = 1e-6);
        assert_relative_eq!(result.params[1].abs(), 2.0, epsilon = 1e-6);
        assert_relative_eq!(result.params[2], 3.0, epsilon = 1e-6);
        assert!(result.cost < 1e-12);
    }
}

#[test]
fn test_active_bound_pins_parameter() {
    let problem = GaussianProblem::new(1.5, 2.0, 3.0, true);
    let bounds = ParameterBounds::from_vec(vec![
        Bounds::new(-1.0, 1.0).unwrap(),
        Bounds::min_only(0.1),
        Bounds::min_only(0.0),
    ]);
    let result = LevenbergMarquardt::new()
        .minimize_bounded(&problem, array![0.0, 3.0, 1.0], &bounds)
        .unwrap();
    assert!(result.success, "{}", result.message);
    assert_relative_eq!(result.params[0], 1.0, epsilon = 1e-9);
    assert!(bounds.contains(&result.params));
}

#[test]
fn test_soft_l1_reports_raw_residuals() {
    let mut problem = GaussianProblem::new(0.0, 2.0, 3.0, true);
    problem.y[40] += 10.0;
    let config = LmConfig {
        loss_function: RobustLoss::l1_for_magnitude(13.0),
        max_iterations: 500,
        ..LmConfig::default()
    };
    let result = LevenbergMarquardt::with_config(config)
        .minimize(&problem, array![0.3, 2.5, 2.0])
        .unwrap();
    assert_relative_eq!(result.params[0], 0.0, epsilon = 1e-2);
    assert_relative_eq!(result.params[2], 3.0, epsilon = 5e-2);
    // The outlier's residual is the raw difference, not the transformed one.
    assert!((result.residuals[40] + 10.0).abs() < 0.2);
}

#[test]
fn test_iteration_cap_is_not_an_error() {
    let problem = GaussianProblem::new(1.5, 2.0, 3.0, true);
    let result = LevenbergMarquardt::new()
        .with_max_iterations(1)
        .minimize(&problem, array![-3.0, 5.0, 0.5])
        .unwrap();
    assert!(!result.success);
    assert!(result.iterations <= 1);
}
