//! Model trait and the curve-fitting helpers built on it.
//!
//! A [`ModelFunction`] maps an axis and a flat parameter vector to predicted
//! intensities. [`curve_fit`] refines the parameters by bounded least squares and
//! reports 1-σ errors; [`curve_fit_transformed`] does the same through a change
//! of variables that keeps every iterate inside the bounds; [`minimize_l1`]
//! minimises the sum of absolute residuals, optionally ignoring masked samples.
//! [`Transmitted`] passes the peaks of a constant-first model through a detector
//! response.

use log::{trace, warn};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::lm::{LevenbergMarquardt, LmConfig, RobustLoss};
use crate::parameters::bounds::ParameterBounds;
use crate::problem::Problem;
use crate::uncertainty::{calculate_covariance, reduced_chi_square, standard_errors_from_covariance};
use crate::utils::finite_difference;

/// A model that can be fit to data.
pub trait ModelFunction {
    /// Number of parameters the model takes.
    fn parameter_count(&self) -> usize;

    /// Evaluate the model at `x` with the given parameters.
    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Analytic derivatives of the model, one column per parameter.
    ///
    /// `None` selects forward finite differences.
    fn jacobian(&self, _x: &Array1<f64>, _params: &Array1<f64>) -> Option<Array2<f64>> {
        None
    }
}

/// Residuals `w · (model − y)` of a model against data.
pub struct CurveFitProblem<'a, M: ModelFunction + ?Sized> {
    model: &'a M,
    x: &'a Array1<f64>,
    y: &'a Array1<f64>,
    weights: Option<&'a Array1<f64>>,
}

impl<'a, M: ModelFunction + ?Sized> CurveFitProblem<'a, M> {
    /// # Errors
    ///
    /// `DimensionMismatch` when `x`, `y` and the weights differ in length.
    pub fn new(
        model: &'a M,
        x: &'a Array1<f64>,
        y: &'a Array1<f64>,
        weights: Option<&'a Array1<f64>>,
    ) -> Result<Self> {
        if x.len() != y.len() || weights.is_some_and(|w| w.len() != x.len()) {
            return Err(SpecFitError::DimensionMismatch(format!(
                "x has {} samples, y has {}, weights have {}",
                x.len(),
                y.len(),
                weights.map_or(x.len(), |w| w.len())
            )));
        }
        Ok(Self {
            model,
            x,
            y,
            weights,
        })
    }
}

impl<M: ModelFunction + ?Sized> Problem for CurveFitProblem<'_, M> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let predicted = self.model.eval(self.x, params)?;
        let mut r = predicted - self.y;
        if let Some(w) = self.weights {
            r *= w;
        }
        Ok(r)
    }

    fn parameter_count(&self) -> usize {
        self.model.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.x.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        match self.model.jacobian(self.x, params) {
            Some(mut jac) => {
                if let Some(w) = self.weights {
                    for (mut row, &wi) in jac.rows_mut().into_iter().zip(w.iter()) {
                        row *= wi;
                    }
                }
                Ok(jac)
            }
            None => finite_difference::jacobian(self, params, None),
        }
    }
}

/// Outcome of a least-squares curve fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveFit {
    /// Fitted parameters (the clamped initial guess if the solver failed).
    pub values: Array1<f64>,

    /// 1-σ errors; `None` where the covariance could not be estimated.
    pub errors: Vec<Option<f64>>,

    /// Sum of squared residuals at `values`.
    pub cost: f64,

    /// Whether the solver converged.
    pub success: bool,

    pub iterations: usize,
}

impl CurveFit {
    /// Whether every parameter has a known error.
    pub fn has_errors(&self) -> bool {
        self.errors.iter().all(Option::is_some)
    }
}

/// Fit `model` to `(x, y)` by bounded least squares.
///
/// The initial guess is clamped to `bounds` first. Errors are the square roots of
/// the diagonal of `redchi · (JᵀJ)⁻¹` at the solution; they are all unknown when the
/// solver did not converge or the normal matrix is singular.
///
/// # Errors
///
/// Only structural problems propagate: mismatched lengths, wrong parameter or bound
/// counts, and a model that cannot be evaluated at the initial guess.
pub fn curve_fit<M: ModelFunction + ?Sized>(
    model: &M,
    x: &Array1<f64>,
    y: &Array1<f64>,
    initial: &Array1<f64>,
    bounds: &ParameterBounds,
    config: &LmConfig,
) -> Result<CurveFit> {
    let problem = CurveFitProblem::new(model, x, y, None)?;
    let lm = LevenbergMarquardt::with_config(LmConfig {
        calc_jacobian: true,
        loss_function: RobustLoss::LeastSquares,
        ..config.clone()
    });
    let result = lm.minimize_bounded(&problem, initial.clone(), bounds)?;
    trace!(
        "curve_fit: {} after {} iterations, cost {:.6e}",
        result.message,
        result.iterations,
        result.cost
    );

    let n = initial.len();
    let errors = if result.success {
        result
            .jacobian
            .as_ref()
            .map_or_else(|| vec![None; n], |jac| errors_from_jacobian(jac, &result.residuals))
    } else {
        warn!("curve_fit did not converge: {}", result.message);
        vec![None; n]
    };

    Ok(CurveFit {
        values: result.params,
        errors,
        cost: result.cost,
        success: result.success,
        iterations: result.iterations,
    })
}

/// 1-σ errors from the Jacobian and residuals at a solution.
fn errors_from_jacobian(jacobian: &Array2<f64>, residuals: &Array1<f64>) -> Vec<Option<f64>> {
    let n = jacobian.ncols();
    reduced_chi_square(residuals, n)
        .and_then(|redchi| calculate_covariance(jacobian, redchi))
        .map_or_else(|| vec![None; n], |covar| standard_errors_from_covariance(&covar))
}

/// A model over the internal variables of a [`BoundsTransform`] change of variables.
///
/// [`BoundsTransform`]: crate::parameters::bounds::BoundsTransform
pub struct Reparameterised<'a, M: ModelFunction + ?Sized> {
    model: &'a M,
    bounds: &'a ParameterBounds,
}

impl<'a, M: ModelFunction + ?Sized> Reparameterised<'a, M> {
    /// # Errors
    ///
    /// `Bounds` when the bounds do not cover every parameter of `model`.
    pub fn new(model: &'a M, bounds: &'a ParameterBounds) -> Result<Self> {
        bounds.check_len(model.parameter_count())?;
        Ok(Self { model, bounds })
    }
}

impl<M: ModelFunction + ?Sized> ModelFunction for Reparameterised<'_, M> {
    fn parameter_count(&self) -> usize {
        self.model.parameter_count()
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.model.eval(x, &self.bounds.to_external(params))
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = self.model.jacobian(x, &self.bounds.to_external(params))?;
        let scale = self.bounds.external_derivative(params);
        for (mut column, &d) in jac.columns_mut().into_iter().zip(scale.iter()) {
            column *= d;
        }
        Some(jac)
    }
}

/// Like [`curve_fit`], but the bounds are enforced by a change of variables.
///
/// The solver works on unbounded internal values (see
/// [`BoundsTransform`](crate::parameters::bounds::BoundsTransform)), so a long
/// step towards a bound bends back into the box instead of being clamped onto it.
/// Errors are reported for the bounded parameters.
///
/// # Errors
///
/// As [`curve_fit`].
pub fn curve_fit_transformed<M: ModelFunction + ?Sized>(
    model: &M,
    x: &Array1<f64>,
    y: &Array1<f64>,
    initial: &Array1<f64>,
    bounds: &ParameterBounds,
    config: &LmConfig,
) -> Result<CurveFit> {
    let n = model.parameter_count();
    if initial.len() != n {
        return Err(SpecFitError::DimensionMismatch(format!(
            "Expected {} parameters, got {}",
            n,
            initial.len()
        )));
    }
    let inner = Reparameterised::new(model, bounds)?;
    let problem = CurveFitProblem::new(&inner, x, y, None)?;
    let lm = LevenbergMarquardt::with_config(LmConfig {
        calc_jacobian: false,
        loss_function: RobustLoss::LeastSquares,
        ..config.clone()
    });
    let result = lm.minimize_bounded(&problem, bounds.to_internal(initial), &ParameterBounds::unbounded(n))?;
    trace!(
        "curve_fit_transformed: {} after {} iterations, cost {:.6e}",
        result.message,
        result.iterations,
        result.cost
    );

    let values = bounds.to_external(&result.params);
    let errors = if result.success {
        let outer = CurveFitProblem::new(model, x, y, None)?;
        errors_from_jacobian(&outer.jacobian(&values)?, &result.residuals)
    } else {
        warn!("curve_fit_transformed did not converge: {}", result.message);
        vec![None; n]
    };

    Ok(CurveFit {
        values,
        errors,
        cost: result.cost,
        success: result.success,
        iterations: result.iterations,
    })
}

/// Outcome of an L1 minimisation.
#[derive(Debug, Clone)]
pub struct L1Fit {
    pub params: Array1<f64>,

    /// Σ w·|model − y| at `params`.
    pub loss: f64,

    pub success: bool,
}

/// Minimise `Σ wᵢ · |model(xᵢ) − yᵢ|` inside `bounds`.
///
/// The absolute value is smoothed by a soft-L1 loss whose scale follows the
/// magnitude of `y`, so the minimiser is the L1 one up to that scale.
pub fn minimize_l1<M: ModelFunction + ?Sized>(
    model: &M,
    x: &Array1<f64>,
    y: &Array1<f64>,
    initial: &Array1<f64>,
    bounds: &ParameterBounds,
    weights: Option<&Array1<f64>>,
) -> Result<L1Fit> {
    let problem = CurveFitProblem::new(model, x, y, weights)?;
    let magnitude = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let lm = LevenbergMarquardt::with_config(LmConfig::l1(magnitude));
    let result = lm.minimize_bounded(&problem, initial.clone(), bounds)?;
    let loss = result.residuals.iter().map(|r| r.abs()).sum();
    Ok(L1Fit {
        params: result.params,
        loss,
        success: result.success,
    })
}

/// `Σ |model − y|` over the unmasked samples.
pub fn l1_loss(predicted: &Array1<f64>, y: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    match weights {
        Some(w) => predicted
            .iter()
            .zip(y.iter())
            .zip(w.iter())
            .map(|((p, v), wi)| wi * (p - v).abs())
            .sum(),
        None => predicted.iter().zip(y.iter()).map(|(p, v)| (p - v).abs()).sum(),
    }
}

/// A model with all but the `free` parameters held at the values in `base`.
pub struct VaryingSubset<'a, M: ModelFunction + ?Sized> {
    model: &'a M,
    base: Array1<f64>,
    free: Vec<usize>,
}

impl<'a, M: ModelFunction + ?Sized> VaryingSubset<'a, M> {
    /// # Errors
    ///
    /// `DimensionMismatch` when `base` does not fit the model or a free index is
    /// out of range.
    pub fn new(model: &'a M, base: Array1<f64>, free: Vec<usize>) -> Result<Self> {
        if base.len() != model.parameter_count() || free.iter().any(|&i| i >= base.len()) {
            return Err(SpecFitError::DimensionMismatch(format!(
                "{} base values and free indices {:?} for a model of {} parameters",
                base.len(),
                free,
                model.parameter_count()
            )));
        }
        Ok(Self { model, base, free })
    }

    /// Current values of the free parameters.
    pub fn initial(&self) -> Array1<f64> {
        self.free.iter().map(|&i| self.base[i]).collect()
    }

    /// The full parameter vector with the free parameters replaced.
    pub fn expand(&self, free_values: &Array1<f64>) -> Array1<f64> {
        let mut full = self.base.clone();
        for (&i, &v) in self.free.iter().zip(free_values.iter()) {
            full[i] = v;
        }
        full
    }
}

impl<M: ModelFunction + ?Sized> ModelFunction for VaryingSubset<'_, M> {
    fn parameter_count(&self) -> usize {
        self.free.len()
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.model.eval(x, &self.expand(params))
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let full = self.model.jacobian(x, &self.expand(params))?;
        let mut jac = Array2::zeros((x.len(), self.free.len()));
        for (k, &i) in self.free.iter().enumerate() {
            jac.column_mut(k).assign(&full.column(i));
        }
        Some(jac)
    }
}

/// A constant-first model whose non-constant part is multiplied by a per-sample
/// transmission: `c + t · (model − c)`.
///
/// Without a transmission the model is passed through unchanged.
pub struct Transmitted<'a, M: ModelFunction + ?Sized> {
    model: &'a M,
    transmission: Option<&'a Array1<f64>>,
}

impl<'a, M: ModelFunction + ?Sized> Transmitted<'a, M> {
    pub fn new(model: &'a M, transmission: Option<&'a Array1<f64>>) -> Self {
        Self {
            model,
            transmission,
        }
    }

    fn check_len(&self, x: &Array1<f64>) -> Result<()> {
        match self.transmission {
            Some(t) if t.len() != x.len() => Err(SpecFitError::DimensionMismatch(format!(
                "transmission has {} samples, axis has {}",
                t.len(),
                x.len()
            ))),
            _ => Ok(()),
        }
    }
}

impl<M: ModelFunction + ?Sized> ModelFunction for Transmitted<'_, M> {
    fn parameter_count(&self) -> usize {
        self.model.parameter_count()
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut out = self.model.eval(x, params)?;
        let Some(t) = self.transmission else {
            return Ok(out);
        };
        self.check_len(x)?;
        let c = params[0];
        out.zip_mut_with(t, |o, &ti| *o = c + ti * (*o - c));
        Ok(out)
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = self.model.jacobian(x, params)?;
        let Some(t) = self.transmission else {
            return Some(jac);
        };
        if self.check_len(x).is_err() {
            return None;
        }
        for (mut row, &ti) in jac.rows_mut().into_iter().zip(t.iter()) {
            row[0] = 1.0 + ti * (row[0] - 1.0);
            for v in row.iter_mut().skip(1) {
                *v *= ti;
            }
        }
        Some(jac)
    }
}
