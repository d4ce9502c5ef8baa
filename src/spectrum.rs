//! Validated spectra.
//!
//! A `Spectrum` pairs a strictly monotone axis with finite intensities. The axis
//! may be ascending or descending; internally it is stored ascending and
//! `restore_order` maps per-sample results back to the caller's order.

use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};

/// Fewest samples a spectrum may have.
pub const MIN_SAMPLES: usize = 8;

/// A spectrum with an ascending axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    x: Array1<f64>,
    y: Array1<f64>,
    reversed: bool,
}

impl Spectrum {
    /// Validate the axis, sanitise the intensities and store both ascending.
    ///
    /// # Errors
    ///
    /// `InputShape` for unequal lengths, fewer than [`MIN_SAMPLES`] samples, or an
    /// axis that is not strictly monotone and finite.
    pub fn new(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(SpecFitError::InputShape(format!(
                "x has {} samples, y has {}",
                x.len(),
                y.len()
            )));
        }
        let reversed = check_axis(x)?;
        let y = sanitize(y);

        if reversed {
            Ok(Self {
                x: x.slice(s![..;-1]).to_owned(),
                y: y.slice(s![..;-1]).to_owned(),
                reversed,
            })
        } else {
            Ok(Self {
                x: x.to_owned(),
                y,
                reversed,
            })
        }
    }

    /// The ascending axis.
    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// Intensities in ascending-axis order.
    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Whether the caller supplied a descending axis.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Smallest and largest axis value.
    pub fn span(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Copy of this spectrum with different intensities on the same axis.
    pub fn with_intensities(&self, y: Array1<f64>) -> Self {
        Self {
            x: self.x.clone(),
            y,
            reversed: self.reversed,
        }
    }

    /// Reorder a per-sample array given in caller order onto the ascending axis.
    ///
    /// # Errors
    ///
    /// `InputShape` when `values` does not have one entry per sample.
    pub fn ascending(&self, values: ArrayView1<f64>) -> Result<Array1<f64>> {
        if values.len() != self.x.len() {
            return Err(SpecFitError::InputShape(format!(
                "per-sample array has {} entries, spectrum has {} samples",
                values.len(),
                self.x.len()
            )));
        }
        Ok(if self.reversed {
            values.slice(s![..;-1]).to_owned()
        } else {
            values.to_owned()
        })
    }

    /// Reorder a per-sample array computed on the ascending axis into caller order.
    pub fn restore_order(&self, values: Array1<f64>) -> Array1<f64> {
        if self.reversed {
            values.slice(s![..;-1]).to_owned()
        } else {
            values
        }
    }
}

/// Check that `x` is finite, long enough and strictly monotone.
///
/// Returns `true` when the axis is descending.
pub fn check_axis(x: ArrayView1<f64>) -> Result<bool> {
    if x.len() < MIN_SAMPLES {
        return Err(SpecFitError::InputShape(format!(
            "spectrum needs at least {} samples, got {}",
            MIN_SAMPLES,
            x.len()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(SpecFitError::InputShape("axis contains non-finite values".to_string()));
    }
    let descending = x[1] < x[0];
    for i in 1..x.len() {
        let d = x[i] - x[i - 1];
        if (descending && d >= 0.0) || (!descending && d <= 0.0) {
            return Err(SpecFitError::InputShape(format!(
                "axis is not strictly monotone at index {}",
                i
            )));
        }
    }
    Ok(descending)
}

/// Replace non-finite intensities by 0.
pub fn sanitize(y: ArrayView1<f64>) -> Array1<f64> {
    y.mapv(|v| if v.is_finite() { v } else { 0.0 })
}
