//! Peaks with a different exponent on each flank.
//!
//! The unit-height line shape `b(x)` of a symmetric peak is raised to `α` below
//! the centre and to `β` at and above it: `H · b(x)^α` or `H · b(x)^β`. Both
//! exponents at 1 give back the symmetric peak; an exponent above 1 narrows its
//! flank.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::peak::{Peak, PeakShape};
use crate::error::{Result, SpecFitError};
use crate::model::ModelFunction;

/// A peak whose two flanks decay with separate exponents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsymmetricPeak {
    pub centre: f64,
    pub width: f64,
    pub height: f64,

    /// Exponent of the low-axis flank.
    pub alpha: f64,

    /// Exponent of the high-axis flank.
    pub beta: f64,
}

impl AsymmetricPeak {
    /// The symmetric peak with both exponents at 1.
    pub fn symmetric(peak: Peak) -> Self {
        Self {
            centre: peak.centre,
            width: peak.width,
            height: peak.height,
            alpha: 1.0,
            beta: 1.0,
        }
    }

    /// Value of the peak at `x`.
    pub fn eval(&self, shape: PeakShape, x: f64) -> f64 {
        let base = shape.eval(x, self.centre, self.width, 1.0);
        let exponent = if x < self.centre { self.alpha } else { self.beta };
        self.height * base.powf(exponent)
    }
}

/// Width and both exponents of each peak, with centres and heights held fixed.
///
/// Parameters are `[W₁, α₁, β₁, W₂, …]`; there is no constant.
pub struct AsymmetryModel {
    shape: PeakShape,
    fixed: Vec<(f64, f64)>,
}

impl AsymmetryModel {
    /// # Errors
    ///
    /// `InvalidInput` when a centre or height is not finite.
    pub fn new(shape: PeakShape, peaks: &[Peak]) -> Result<Self> {
        if peaks.iter().any(|p| !p.centre.is_finite() || !p.height.is_finite()) {
            return Err(SpecFitError::InvalidInput(
                "asymmetric peaks need finite centres and heights".to_string(),
            ));
        }
        Ok(Self {
            shape,
            fixed: peaks.iter().map(|p| (p.centre, p.height)).collect(),
        })
    }

    /// Flat `[W, 1, 1, …]` start values.
    pub fn initial(peaks: &[Peak]) -> Array1<f64> {
        peaks.iter().flat_map(|p| [p.width, 1.0, 1.0]).collect()
    }

    /// Peaks for a flat parameter vector.
    pub fn peaks(&self, params: &Array1<f64>) -> Vec<AsymmetricPeak> {
        self.fixed
            .iter()
            .enumerate()
            .map(|(k, &(centre, height))| AsymmetricPeak {
                centre,
                width: params[3 * k],
                height,
                alpha: params[3 * k + 1],
                beta: params[3 * k + 2],
            })
            .collect()
    }
}

impl ModelFunction for AsymmetryModel {
    fn parameter_count(&self) -> usize {
        3 * self.fixed.len()
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(x.len());
        for peak in self.peaks(params) {
            out.zip_mut_with(x, |o, &v| *o += peak.eval(self.shape, v));
        }
        Ok(out)
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = Array2::zeros((x.len(), self.parameter_count()));
        for (k, peak) in self.peaks(params).iter().enumerate() {
            for (i, &v) in x.iter().enumerate() {
                let base = self.shape.eval(v, peak.centre, peak.width, 1.0);
                if base <= 0.0 {
                    continue;
                }
                let (_, dbase_dw, _) = self.shape.partials(v, peak.centre, peak.width, 1.0);
                let (exponent, column) = if v < peak.centre {
                    (peak.alpha, 3 * k + 1)
                } else {
                    (peak.beta, 3 * k + 2)
                };
                let value = peak.height * base.powf(exponent);
                jac[[i, 3 * k]] = peak.height * exponent * base.powf(exponent - 1.0) * dbase_dw;
                jac[[i, column]] = value * base.ln();
            }
        }
        Some(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_exponents_act_on_their_own_flank() {
        let peak = AsymmetricPeak {
            centre: 10.0,
            width: 2.0,
            height: 3.0,
            alpha: 1.0,
            beta: 2.0,
        };
        let shape = PeakShape::Lorentzian;
        assert_relative_eq!(peak.eval(shape, 10.0), 3.0);
        assert_relative_eq!(peak.eval(shape, 8.0), 1.5);
        assert_relative_eq!(peak.eval(shape, 12.0), 0.75);

        let symmetric = AsymmetricPeak::symmetric(Peak::new(10.0, 2.0, 3.0));
        assert_relative_eq!(symmetric.eval(shape, 12.0), shape.eval(12.0, 10.0, 2.0, 3.0));
    }

    #[test]
    fn test_jacobian_matches_difference() {
        let peaks = [Peak::new(5.0, 1.5, 2.0), Peak::new(12.0, 2.0, 1.0)];
        let model = AsymmetryModel::new(PeakShape::Gaussian, &peaks).unwrap();
        let x = Array1::linspace(0.25, 19.75, 40);
        let params = array![1.4, 0.9, 1.1, 2.2, 1.05, 0.85];
        let jac = model.jacobian(&x, &params).unwrap();
        let h = 1e-7;
        for k in 0..6 {
            let mut up = params.clone();
            let mut down = params.clone();
            up[k] += h;
            down[k] -= h;
            let numeric = (model.eval(&x, &up).unwrap() - model.eval(&x, &down).unwrap()) / (2.0 * h);
            for i in 0..x.len() {
                assert_relative_eq!(jac[[i, k]], numeric[i], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_rejects_non_finite_peaks() {
        let peaks = [Peak::new(f64::NAN, 1.0, 1.0)];
        assert!(AsymmetryModel::new(PeakShape::Lorentzian, &peaks).is_err());
    }
}
