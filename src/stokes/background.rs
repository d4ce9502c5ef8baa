//! Background of a Stokes/anti-Stokes spectrum.
//!
//! Each side of the laser line has its own anchor polynomial. Their sum is
//! multiplied by the notch-filter transmission, and a constant plus a Lorentzian
//! laser-leak peak at zero shift are added on top. Peaks sit under the same notch.

use log::debug;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::models::{AnchorPolynomial, NotchMask, Peak, PeakShape, Sigmoid};
use crate::signal::calculus::index_gradient;
use crate::signal::interpolate::{min_spacing, uniform_grid, CubicSpline};
use crate::signal::smoothing::gaussian_filter_x;
use crate::utils::stats::argmax;

/// Parameters of the notch edges and the leak, ahead of the polynomial values.
const NOTCH_PARAMS: usize = 4;
const LEAK_PARAMS: usize = 3;

/// Polynomial of one side of the laser line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialSide {
    pub polynomial: AnchorPolynomial,

    /// Values at the anchors.
    pub values: Array1<f64>,
}

impl PolynomialSide {
    pub fn eval(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.polynomial.eval(x, self.values.view())
    }
}

/// The fitted background record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StokesBackground {
    pub constant: f64,
    pub notch: NotchMask,

    /// Polynomial used for negative shifts.
    pub anti_stokes: PolynomialSide,

    /// Polynomial used for zero and positive shifts.
    pub stokes: PolynomialSide,

    /// Lorentzian laser leak, not attenuated by the notch.
    pub leak: Peak,
}

impl StokesBackground {
    /// Length of the flat parameter vector:
    /// `[c, notch(4), anti-Stokes values, Stokes values, leak C, W, H]`.
    pub fn parameter_count(&self) -> usize {
        1 + NOTCH_PARAMS + self.anti_stokes.values.len() + self.stokes.values.len() + LEAK_PARAMS
    }

    /// Indices of the notch parameters in the flat vector.
    pub fn notch_indices(&self) -> Vec<usize> {
        (1..1 + NOTCH_PARAMS).collect()
    }

    /// Indices of the leak parameters in the flat vector.
    pub fn leak_indices(&self) -> Vec<usize> {
        let n = self.parameter_count();
        (n - LEAK_PARAMS..n).collect()
    }

    pub fn to_params(&self) -> Array1<f64> {
        let mut p = Vec::with_capacity(self.parameter_count());
        p.push(self.constant);
        p.extend_from_slice(&[
            self.notch.anti_stokes.centre,
            self.notch.anti_stokes.scale,
            self.notch.stokes.centre,
            self.notch.stokes.scale,
        ]);
        p.extend(self.anti_stokes.values.iter());
        p.extend(self.stokes.values.iter());
        p.extend_from_slice(&[self.leak.centre, self.leak.width, self.leak.height]);
        Array1::from_vec(p)
    }

    /// Copy with the parameters taken from the front of `params`.
    pub fn with_params(&self, params: &[f64]) -> Self {
        let n_as = self.anti_stokes.values.len();
        let n_s = self.stokes.values.len();
        let poly = 1 + NOTCH_PARAMS;
        let leak = poly + n_as + n_s;
        Self {
            constant: params[0],
            notch: NotchMask {
                anti_stokes: Sigmoid::new(params[1], params[2]),
                stokes: Sigmoid::new(params[3], params[4]),
            },
            anti_stokes: PolynomialSide {
                polynomial: self.anti_stokes.polynomial.clone(),
                values: Array1::from_vec(params[poly..poly + n_as].to_vec()),
            },
            stokes: PolynomialSide {
                polynomial: self.stokes.polynomial.clone(),
                values: Array1::from_vec(params[poly + n_as..leak].to_vec()),
            },
            leak: Peak::new(params[leak], params[leak + 1], params[leak + 2]),
        }
    }

    /// Piecewise polynomial: anti-Stokes below zero shift, Stokes from zero on.
    pub fn polynomial(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let below = self.anti_stokes.eval(x);
        let above = self.stokes.eval(x);
        Array1::from_shape_fn(x.len(), |i| if x[i] < 0.0 { below[i] } else { above[i] })
    }

    /// Background with `peaks` added under the notch.
    pub fn eval_with_peaks(&self, shape: PeakShape, x: ArrayView1<f64>, peaks: &[Peak]) -> Array1<f64> {
        let mut inner = self.polynomial(x);
        for p in peaks {
            inner.zip_mut_with(&x, |o, &v| *o += shape.eval(v, p.centre, p.width, p.height));
        }
        let mask = self.notch.eval_many(x);
        let mut out = inner * &mask + self.constant;
        out.zip_mut_with(&x, |o, &v| {
            *o += PeakShape::Lorentzian.eval(v, self.leak.centre, self.leak.width, self.leak.height)
        });
        out
    }

    pub fn eval(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.eval_with_peaks(PeakShape::Lorentzian, x, &[])
    }
}

/// Half width of the notch filter.
///
/// The spectrum is smoothed by `smoothing` axis units, resampled onto a uniform
/// grid at its finest spacing by a cubic spline, and differentiated. The notch edge
/// is where `grad(x) − grad(−x)` peaks.
///
/// # Errors
///
/// `InvalidInput` when the axis does not extend to both sides of zero shift.
pub fn notch_edge(x: ArrayView1<f64>, y: ArrayView1<f64>, smoothing: f64) -> Result<f64> {
    let n = x.len();
    let (lo, hi) = (x[0], x[n - 1]);
    let reach = hi.min(-lo);
    if reach <= 0.0 {
        return Err(SpecFitError::InvalidInput(format!(
            "shift axis [{}, {}] must extend to both sides of the laser line",
            lo, hi
        )));
    }

    let smooth = gaussian_filter_x(x, y, smoothing);
    let step = min_spacing(x);
    let grid = uniform_grid(lo, hi, step);
    let resampled = CubicSpline::new(x, smooth.view())?.eval_many(grid.view());
    let gradient = CubicSpline::new(grid.view(), index_gradient(resampled.view()).view())?;

    let count = grid.len();
    let half: Array1<f64> = Array1::linspace(0.0, reach, count);
    let symmetric = half.mapv(|v| gradient.eval(v) - gradient.eval(-v));
    let edge = half[argmax(symmetric.view())];
    debug!("notch edge at ±{:.3}", edge);
    Ok(edge)
}

/// Anchor indices of one side of the spectrum.
///
/// Starting at the sample nearest the notch edge, the walk moves away from the
/// laser line while the next sample is lower. The remaining span out to the end of
/// the axis is cut into `order + 1` chunks; the chunk next to the notch is
/// covered by the starting anchor and each other chunk contributes its lowest
/// sample.
pub fn side_anchor_indices(
    x: ArrayView1<f64>,
    smooth: ArrayView1<f64>,
    edge: f64,
    order: usize,
    stokes: bool,
) -> Vec<usize> {
    let n = x.len();
    let target = if stokes { edge } else { -edge };
    let mut start = crate::signal::interpolate::nearest_index(x, target);
    if stokes {
        while start + 1 < n && smooth[start + 1] < smooth[start] {
            start += 1;
        }
    } else {
        while start > 0 && smooth[start - 1] < smooth[start] {
            start -= 1;
        }
    }

    let (from, to) = if stokes { (start, n - 1) } else { (0, start) };
    let chunks = order + 1;
    let edges: Vec<usize> = (0..=chunks)
        .map(|k| from + ((k as f64) * (to - from) as f64 / chunks as f64).round() as usize)
        .collect();

    let mut anchors = vec![start];
    let outer: Vec<usize> = if stokes { (1..chunks).collect() } else { (0..chunks - 1).collect() };
    for k in outer {
        let (a, b) = (edges[k], edges[k + 1]);
        if b <= a {
            continue;
        }
        let best = (a..b).fold(a, |best, i| if smooth[i] < smooth[best] { i } else { best });
        anchors.push(best);
    }
    anchors.sort_unstable();
    anchors.dedup();
    anchors
}

/// Initial background of a spectrum whose notch half width is `edge`.
///
/// `smooth` is the lightly smoothed spectrum; anchor values are measured above its
/// minimum, which becomes the constant.
///
/// # Errors
///
/// `InvalidInput` when a side has no usable anchor.
pub fn initial_background(
    x: ArrayView1<f64>,
    smooth: ArrayView1<f64>,
    edge: f64,
    orders: (usize, usize),
) -> Result<StokesBackground> {
    let constant = smooth.iter().copied().fold(f64::INFINITY, f64::min);
    let side = |stokes: bool, order: usize| -> Result<PolynomialSide> {
        let idx = side_anchor_indices(x, smooth, edge, order, stokes);
        let anchors: Array1<f64> = idx.iter().map(|&i| x[i]).collect();
        let values: Array1<f64> = idx.iter().map(|&i| smooth[i] - constant).collect();
        Ok(PolynomialSide {
            polynomial: AnchorPolynomial::new(anchors)?,
            values,
        })
    };

    let leak_height = x
        .iter()
        .zip(smooth.iter())
        .filter(|(&v, _)| v.abs() <= 10.0)
        .map(|(_, &s)| s)
        .fold(f64::NEG_INFINITY, f64::max);
    let leak_height = if leak_height.is_finite() {
        leak_height - constant
    } else {
        0.0
    };

    Ok(StokesBackground {
        constant,
        notch: NotchMask::symmetric(edge),
        anti_stokes: side(false, orders.0)?,
        stokes: side(true, orders.1)?,
        leak: Peak::new(0.0, 10.0, leak_height),
    })
}
