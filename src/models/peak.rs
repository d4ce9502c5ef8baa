//! Peak models for fitting spectra.
//!
//! Two closed-form line shapes are supported, both symmetric about their centre:
//!
//! - Gaussian: `H · exp(−0.5 · ((x − C)/W)²)`, where `W` is the standard deviation
//! - Lorentzian: `H / (1 + ((x − C)/W)²)`, where `W` is the half width at half maximum
//!
//! A model of several peaks is a flat parameter vector `[c, C₁, W₁, H₁, C₂, …]`
//! whose leading element is a constant added to every sample.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::model::ModelFunction;

/// Line shape of a peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeakShape {
    Gaussian,
    Lorentzian,
}

impl fmt::Display for PeakShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeakShape::Gaussian => write!(f, "Gaussian"),
            PeakShape::Lorentzian => write!(f, "Lorentzian"),
        }
    }
}

#[inline]
fn guard_width(width: f64) -> f64 {
    width.abs().max(f64::MIN_POSITIVE)
}

impl PeakShape {
    /// Value of a single peak at `x`.
    #[inline]
    pub fn eval(&self, x: f64, centre: f64, width: f64, height: f64) -> f64 {
        let u = (x - centre) / guard_width(width);
        match self {
            PeakShape::Gaussian => height * (-0.5 * u * u).exp(),
            PeakShape::Lorentzian => height / (1.0 + u * u),
        }
    }

    /// Partial derivatives `(∂/∂C, ∂/∂W, ∂/∂H)` of a single peak at `x`.
    #[inline]
    pub fn partials(&self, x: f64, centre: f64, width: f64, height: f64) -> (f64, f64, f64) {
        let w = guard_width(width);
        let u = (x - centre) / w;
        match self {
            PeakShape::Gaussian => {
                let e = (-0.5 * u * u).exp();
                (height * e * u / w, height * e * u * u / w, e)
            }
            PeakShape::Lorentzian => {
                let q = 1.0 / (1.0 + u * u);
                let q2 = q * q;
                (
                    height * q2 * 2.0 * u / w,
                    height * q2 * 2.0 * u * u / w,
                    q,
                )
            }
        }
    }

    /// Convert a full width at half maximum into this shape's width parameter.
    ///
    /// Gaussian widths use `FWHM / √(2 ln 2)`, Lorentzian widths `FWHM / 2`.
    pub fn width_from_fwhm(&self, fwhm: f64) -> f64 {
        match self {
            PeakShape::Gaussian => fwhm / (2.0 * std::f64::consts::LN_2).sqrt(),
            PeakShape::Lorentzian => 0.5 * fwhm,
        }
    }

    /// Inverse of [`PeakShape::width_from_fwhm`].
    pub fn fwhm_from_width(&self, width: f64) -> f64 {
        match self {
            PeakShape::Gaussian => width * (2.0 * std::f64::consts::LN_2).sqrt(),
            PeakShape::Lorentzian => 2.0 * width,
        }
    }
}

/// A single peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub centre: f64,
    pub width: f64,
    pub height: f64,
}

impl Peak {
    pub fn new(centre: f64, width: f64, height: f64) -> Self {
        Self {
            centre,
            width,
            height,
        }
    }

    /// Evaluate this peak over `x`.
    pub fn eval(&self, shape: PeakShape, x: ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| shape.eval(v, self.centre, self.width, self.height))
    }
}

/// Sum of `peaks` over `x`.
pub fn eval_peaks(shape: PeakShape, x: ArrayView1<f64>, peaks: &[Peak]) -> Array1<f64> {
    let mut out = Array1::zeros(x.len());
    for peak in peaks {
        for (o, &v) in out.iter_mut().zip(x.iter()) {
            *o += shape.eval(v, peak.centre, peak.width, peak.height);
        }
    }
    out
}

/// Evaluate a flat parameter vector.
///
/// When the length is one more than a multiple of three, the first element is a
/// constant added to every sample; otherwise all elements are peak triples.
/// A trailing partial triple is ignored.
pub fn sum_model(shape: PeakShape, x: ArrayView1<f64>, params: &[f64]) -> Array1<f64> {
    let (constant, triples) = if params.len() % 3 == 1 {
        (params[0], &params[1..])
    } else {
        (0.0, params)
    };
    let mut out = Array1::from_elem(x.len(), constant);
    for t in triples.chunks_exact(3) {
        for (o, &v) in out.iter_mut().zip(x.iter()) {
            *o += shape.eval(v, t[0], t[1], t[2]);
        }
    }
    out
}

/// Flatten a constant and peaks into `[c, C₁, W₁, H₁, …]`.
pub fn flatten(constant: f64, peaks: &[Peak]) -> Array1<f64> {
    let mut out = Vec::with_capacity(1 + 3 * peaks.len());
    out.push(constant);
    for p in peaks {
        out.extend_from_slice(&[p.centre, p.width, p.height]);
    }
    Array1::from_vec(out)
}

/// Split `[c, C₁, W₁, H₁, …]` into the constant and the peaks.
pub fn unflatten(params: &[f64]) -> (f64, Vec<Peak>) {
    if params.is_empty() {
        return (0.0, Vec::new());
    }
    let peaks = params[1..]
        .chunks_exact(3)
        .map(|t| Peak::new(t[0], t[1], t[2]))
        .collect();
    (params[0], peaks)
}

/// Sort peaks by ascending centre.
pub fn sort_by_centre(peaks: &mut [Peak]) {
    peaks.sort_by(|a, b| a.centre.total_cmp(&b.centre));
}

/// Reorder the peak triples of a flat `[c, C₁, W₁, H₁, …]` vector, and the
/// matching errors, by ascending centre.
pub fn sort_flat_by_centre(values: &Array1<f64>, errors: &[Option<f64>]) -> (Array1<f64>, Vec<Option<f64>>) {
    let n_peaks = values.len().saturating_sub(1) / 3;
    let mut order: Vec<usize> = (0..n_peaks).collect();
    order.sort_by(|&a, &b| values[1 + 3 * a].total_cmp(&values[1 + 3 * b]));

    let mut v = Vec::with_capacity(values.len());
    let mut e = Vec::with_capacity(values.len());
    if !values.is_empty() {
        v.push(values[0]);
        e.push(errors.first().copied().flatten());
    }
    for k in order {
        for j in 1 + 3 * k..4 + 3 * k {
            v.push(values[j]);
            e.push(errors.get(j).copied().flatten());
        }
    }
    (Array1::from_vec(v), e)
}

/// Constant plus `n_peaks` peaks of one shape, with an analytic Jacobian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakModel {
    pub shape: PeakShape,
    pub n_peaks: usize,
}

impl PeakModel {
    pub fn new(shape: PeakShape, n_peaks: usize) -> Self {
        Self { shape, n_peaks }
    }
}

impl ModelFunction for PeakModel {
    fn parameter_count(&self) -> usize {
        1 + 3 * self.n_peaks
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(match params.as_slice() {
            Some(p) => sum_model(self.shape, x.view(), p),
            None => sum_model(self.shape, x.view(), &params.to_vec()),
        })
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = Array2::zeros((x.len(), self.parameter_count()));
        jac.column_mut(0).fill(1.0);
        for k in 0..self.n_peaks {
            let (c, w, h) = (params[1 + 3 * k], params[2 + 3 * k], params[3 + 3 * k]);
            for (i, &v) in x.iter().enumerate() {
                let (dc, dw, dh) = self.shape.partials(v, c, w, h);
                jac[[i, 1 + 3 * k]] = dc;
                jac[[i, 2 + 3 * k]] = dw;
                jac[[i, 3 + 3 * k]] = dh;
            }
        }
        Some(jac)
    }
}
