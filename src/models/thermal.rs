//! Thermal background of anti-Stokes spectra.
//!
//! The anti-Stokes side of a Raman spectrum (negative shifts) carries a
//! background following the Bose-Einstein occupation of the shift:
//!
//! `n(ν̃, T) = 1 / (exp(−c₂ · ν̃ / T) − 1)`
//!
//! with `c₂ = hc/k` the second radiation constant. The background is
//! `A · n(ν̃, T) · t(ν̃) + c`, where `t` is the detector transmission, optionally
//! with a second occupation term at ambient temperature.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::model::ModelFunction;

/// Second radiation constant `hc/k`, in cm·K.
pub const SECOND_RADIATION_CONSTANT: f64 = 1.438_776_877;

/// Temperature of the optional ambient term, in kelvin.
pub const AMBIENT_TEMPERATURE: f64 = 298.0;

/// Bose-Einstein occupation at a shift in cm⁻¹ and a temperature in kelvin.
#[inline]
pub fn occupation(shift: f64, temperature: f64) -> f64 {
    1.0 / (-SECOND_RADIATION_CONSTANT * shift / temperature).exp_m1()
}

/// A fitted thermal background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalBackground {
    pub amplitude: f64,

    /// Kelvin.
    pub temperature: f64,

    /// Constant added after the transmission.
    pub constant: f64,

    /// Whether an ambient-temperature occupation is added to the thermal one.
    pub ambient: bool,
}

impl ThermalBackground {
    /// Occupation term before the amplitude and transmission.
    pub fn population(&self, shift: f64) -> f64 {
        let thermal = occupation(shift, self.temperature);
        if self.ambient {
            thermal + occupation(shift, AMBIENT_TEMPERATURE)
        } else {
            thermal
        }
    }

    /// Background at `shift` behind a transmission `t`.
    #[inline]
    pub fn eval(&self, shift: f64, t: f64) -> f64 {
        self.amplitude * self.population(shift) * t + self.constant
    }

    /// Background over an axis; a missing transmission is taken as 1.
    pub fn eval_many(&self, x: ArrayView1<f64>, transmission: Option<ArrayView1<f64>>) -> Array1<f64> {
        match transmission {
            Some(t) => Array1::from_iter(x.iter().zip(t.iter()).map(|(&v, &ti)| self.eval(v, ti))),
            None => x.mapv(|v| self.eval(v, 1.0)),
        }
    }
}

/// `[A, T, c]` model of a [`ThermalBackground`].
pub struct ThermalModel<'a> {
    pub ambient: bool,
    pub transmission: Option<&'a Array1<f64>>,
}

impl ThermalModel<'_> {
    pub fn background(&self, params: &Array1<f64>) -> ThermalBackground {
        ThermalBackground {
            amplitude: params[0],
            temperature: params[1],
            constant: params[2],
            ambient: self.ambient,
        }
    }

    fn transmission_at(&self, i: usize) -> f64 {
        self.transmission.map_or(1.0, |t| t[i])
    }
}

impl ModelFunction for ThermalModel<'_> {
    fn parameter_count(&self) -> usize {
        3
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        if let Some(t) = self.transmission {
            if t.len() != x.len() {
                return Err(SpecFitError::DimensionMismatch(format!(
                    "transmission has {} samples, axis has {}",
                    t.len(),
                    x.len()
                )));
            }
        }
        Ok(self
            .background(params)
            .eval_many(x.view(), self.transmission.map(|t| t.view())))
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        if self.transmission.is_some_and(|t| t.len() != x.len()) {
            return None;
        }
        let background = self.background(params);
        let (a, temperature) = (params[0], params[1]);
        let mut jac = Array2::zeros((x.len(), 3));
        for (i, &v) in x.iter().enumerate() {
            let t = self.transmission_at(i);
            let n = occupation(v, temperature);
            // dn/dT = −n(n + 1) · c₂ν̃ / T²
            let dn = -n * (n + 1.0) * SECOND_RADIATION_CONSTANT * v / (temperature * temperature);
            jac[[i, 0]] = background.population(v) * t;
            jac[[i, 1]] = a * dn * t;
            jac[[i, 2]] = 1.0;
        }
        Some(jac)
    }
}
