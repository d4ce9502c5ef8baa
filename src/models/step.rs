//! Logistic steps and the notch-filter transmission mask built from them.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Logistic step `1 / (1 + exp(−(x − x₀)/s))`.
///
/// A negative `scale` gives a falling step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sigmoid {
    pub centre: f64,
    pub scale: f64,
}

impl Sigmoid {
    pub fn new(centre: f64, scale: f64) -> Self {
        Self { centre, scale }
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        let s = if self.scale.abs() < f64::MIN_POSITIVE {
            f64::MIN_POSITIVE.copysign(self.scale)
        } else {
            self.scale
        };
        1.0 / (1.0 + (-(x - self.centre) / s).exp())
    }
}

/// Transmission of a notch filter: the sum of a falling anti-Stokes edge and a
/// rising Stokes edge, clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchMask {
    pub anti_stokes: Sigmoid,
    pub stokes: Sigmoid,
}

impl NotchMask {
    /// Symmetric notch of half width `half_width` with unit edge scale.
    pub fn symmetric(half_width: f64) -> Self {
        Self {
            anti_stokes: Sigmoid::new(-half_width, -1.0),
            stokes: Sigmoid::new(half_width, 1.0),
        }
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        (self.anti_stokes.eval(x) + self.stokes.eval(x)).clamp(0.0, 1.0)
    }

    pub fn eval_many(&self, x: ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| self.eval(v))
    }
}
