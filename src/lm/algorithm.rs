//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! This module contains the core implementation of the Levenberg-Marquardt algorithm
//! for nonlinear least-squares optimization with box constraints and robust losses.
//!
//! Bounds are handled by projection: each trial point `θ + δ` is clamped onto the
//! box before it is evaluated, and the convergence test on the gradient ignores
//! components that point out of the box at an active bound.

use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{Result, SpecFitError};
use crate::parameters::bounds::ParameterBounds;
use crate::problem::Problem;
use crate::utils::linalg::{cholesky, cholesky_solve};
use crate::utils::matrix_convert::{faer_vec_to_ndarray, ndarray_to_faer, ndarray_vec_to_faer};

use super::config::LmConfig;
use super::robust::RobustLoss;

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Raw residuals at the solution (before any robust transform)
    pub residuals: Array1<f64>,

    /// Total loss at the solution: Σρ(r)
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Whether the optimization converged
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The raw Jacobian at the solution (if requested)
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Status of the iteration.
enum IterationStatus {
    /// Continue iteration
    Continue,

    /// Converged successfully
    Converged(String),

    /// Failed to converge
    Failed(String),
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for change in cost.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for the projected gradient.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set whether to calculate and return the Jacobian at the solution.
    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.config.calc_jacobian = calc_jacobian;
        self
    }

    /// Set the loss applied to the residuals.
    pub fn with_loss_function(mut self, loss_function: RobustLoss) -> Self {
        self.config.loss_function = loss_function;
        self
    }

    /// Minimize the loss of the residuals without bounds.
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
    ) -> Result<LmResult> {
        let bounds = ParameterBounds::unbounded(initial_params.len());
        self.minimize_bounded(problem, initial_params, &bounds)
    }

    /// Minimize the loss of the residuals inside the box `bounds`.
    ///
    /// The initial guess is clamped onto the box before the first evaluation.
    ///
    /// # Errors
    ///
    /// Dimension mismatches between the problem, the initial guess and the bounds,
    /// and non-finite residuals at the (clamped) initial guess. Running out of
    /// iterations is not an error: it is reported through `LmResult::success`.
    pub fn minimize_bounded<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        bounds: &ParameterBounds,
    ) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(SpecFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }
        bounds.check_len(n_params)?;

        let loss = self.config.loss_function;
        let mut params = bounds.project(&initial_params);

        let mut residuals = problem.eval(&params)?;
        let mut func_evals = 1;
        if residuals.len() != problem.residual_count() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "Expected {} residuals, got {}",
                problem.residual_count(),
                residuals.len()
            )));
        }
        if residuals.iter().any(|r| !r.is_finite()) {
            return Err(SpecFitError::FunctionEvaluation(
                "non-finite residual at the initial guess".to_string(),
            ));
        }

        let (mut pseudo, mut row_scale) = loss.apply(&residuals);
        let mut cost = sum_of_squares(&pseudo);

        if n_params == 0 {
            return self.finish(problem, params, residuals, cost, 0, func_evals, true, "No free parameters".to_string());
        }

        let mut lambda: Option<f64> = None;
        let mut iterations = 0;

        loop {
            if cost == 0.0 {
                return self.finish(problem, params, residuals, cost, iterations, func_evals, true, "Exact fit".to_string());
            }
            if iterations >= self.config.max_iterations {
                log::trace!("LM stopped after {} iterations, cost {:.6e}", iterations, cost);
                return self.finish(
                    problem,
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    false,
                    format!("Maximum iterations ({}) reached", self.config.max_iterations),
                );
            }

            let mut jacobian = problem.jacobian(&params)?;
            if !problem.has_custom_jacobian() {
                func_evals += n_params + 1;
            }
            loss.scale_jacobian(&mut jacobian, &row_scale);

            // Gradient g = Jᵀ r̃
            let j = ndarray_to_faer(&jacobian);
            let r = ndarray_vec_to_faer(&pseudo);
            let g = j.transpose() * r.as_ref();
            let gradient = faer_vec_to_ndarray(&g);

            let projected = bounds.project_gradient(&params, &gradient);
            let gradient_norm = projected.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            if gradient_norm <= self.config.gtol {
                return self.finish(
                    problem,
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    true,
                    format!(
                        "Gradient convergence: ||g|| = {:.2e} <= {:.2e}",
                        gradient_norm,
                        self.config.gtol
                    ),
                );
            }

            // Parameters held at a bound by the gradient do not take part in the step
            let free: Vec<usize> = (0..n_params)
                .filter(|&i| {
                    let b = bounds.get(i).copied().unwrap_or_default();
                    !((b.at_lower(params[i]) && gradient[i] > 0.0)
                        || (b.at_upper(params[i]) && gradient[i] < 0.0))
                })
                .collect();

            let jtj = jacobian.t().dot(&jacobian);
            let max_diag = (0..n_params).map(|i| jtj[[i, i]]).fold(0.0_f64, f64::max);
            let diag_floor = if max_diag > 0.0 { max_diag * 1e-12 } else { 1.0 };
            let mut damping = lambda.unwrap_or(self.config.initial_lambda);

            // Inner loop: raise the damping until a step lowers the cost
            let status = loop {
                let step = match self.calculate_step(&jtj, &gradient, &free, damping, diag_floor) {
                    Some(step) => step,
                    None => {
                        damping *= self.config.lambda_up_factor;
                        if damping > self.config.max_lambda {
                            break IterationStatus::Failed(
                                "Failed to calculate step, and lambda reached maximum".to_string(),
                            );
                        }
                        continue;
                    }
                };

                let trial = bounds.project(&(&params + &step));
                let moved = &trial - &params;
                if is_negligible(&moved, &params, self.config.xtol) {
                    break IterationStatus::Converged(format!(
                        "Parameter convergence: step below xtol {:.2e}",
                        self.config.xtol
                    ));
                }

                let trial_residuals = problem.eval(&trial)?;
                func_evals += 1;
                if trial_residuals.iter().any(|r| !r.is_finite()) {
                    damping *= self.config.lambda_up_factor;
                    if damping > self.config.max_lambda {
                        break IterationStatus::Failed(
                            "Non-finite residuals, and lambda reached maximum".to_string(),
                        );
                    }
                    continue;
                }

                let (trial_pseudo, trial_scale) = loss.apply(&trial_residuals);
                let trial_cost = sum_of_squares(&trial_pseudo);

                if trial_cost < cost {
                    let cost_change = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);

                    params = trial;
                    residuals = trial_residuals;
                    pseudo = trial_pseudo;
                    row_scale = trial_scale;
                    cost = trial_cost;
                    iterations += 1;
                    lambda = Some((damping * self.config.lambda_down_factor).max(self.config.min_lambda));

                    log::trace!("LM iteration {}: cost {:.6e}, lambda {:.2e}", iterations, cost, damping);

                    if cost_change <= self.config.ftol {
                        break IterationStatus::Converged(format!(
                            "Cost convergence: |df|/|f| = {:.2e} <= {:.2e}",
                            cost_change,
                            self.config.ftol
                        ));
                    }
                    if is_negligible(&moved, &params, self.config.xtol) {
                        break IterationStatus::Converged(format!(
                            "Parameter convergence: |dx|/|x| below {:.2e}",
                            self.config.xtol
                        ));
                    }
                    break IterationStatus::Continue;
                }

                damping *= self.config.lambda_up_factor;
                if damping > self.config.max_lambda {
                    break IterationStatus::Failed(
                        "Failed to decrease cost, and lambda reached maximum".to_string(),
                    );
                }
            };

            match status {
                IterationStatus::Continue => (),
                IterationStatus::Converged(message) => {
                    return self.finish(problem, params, residuals, cost, iterations, func_evals, true, message);
                }
                IterationStatus::Failed(message) => {
                    return self.finish(problem, params, residuals, cost, iterations, func_evals, false, message);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish<P: Problem + ?Sized>(
        &self,
        problem: &P,
        params: Array1<f64>,
        residuals: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        success: bool,
        message: String,
    ) -> Result<LmResult> {
        let jacobian = if self.config.calc_jacobian {
            Some(problem.jacobian(&params)?)
        } else {
            None
        };
        Ok(LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
            jacobian,
        })
    }

    /// Calculate the Levenberg-Marquardt step.
    ///
    /// This method solves the equation (JᵀJ + λ·D) δ = −Jᵀr restricted to the
    /// `free` parameters, where D is the diagonal of JᵀJ floored at `diag_floor`
    /// (Marquardt scaling). The remaining components of δ are zero.
    ///
    /// Returns `None` if the damped system is not positive definite.
    fn calculate_step(
        &self,
        jtj: &Array2<f64>,
        gradient: &Array1<f64>,
        free: &[usize],
        lambda: f64,
        diag_floor: f64,
    ) -> Option<Array1<f64>> {
        let m = free.len();
        let mut a = Array2::zeros((m, m));
        let mut rhs = Array1::zeros(m);
        for (p, &i) in free.iter().enumerate() {
            for (q, &j) in free.iter().enumerate() {
                a[[p, q]] = jtj[[i, j]];
            }
            a[[p, p]] += lambda * jtj[[i, i]].max(diag_floor);
            rhs[p] = -gradient[i];
        }

        let l = cholesky(&a)?;
        let reduced = cholesky_solve(&l, &rhs);
        if !reduced.iter().all(|s| s.is_finite()) {
            return None;
        }

        let mut step = Array1::zeros(jtj.nrows());
        for (p, &i) in free.iter().enumerate() {
            step[i] = reduced[p];
        }
        Some(step)
    }
}

fn sum_of_squares(v: &Array1<f64>) -> f64 {
    v.iter().map(|r| r * r).sum()
}

fn is_negligible(step: &Array1<f64>, params: &Array1<f64>, xtol: f64) -> bool {
    step.iter()
        .zip(params.iter())
        .all(|(s, p)| s.abs() <= xtol * (p.abs() + xtol))
}
