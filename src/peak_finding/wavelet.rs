//! Typical peak width from a continuous wavelet transform.
//!
//! The spectrum is resampled onto a uniform grid at its finest spacing and
//! convolved with Ricker (Mexican-hat) wavelets. The wavelet at scale `s` matches
//! a Gaussian whose FWHM is `s` samples; with a `1/σ²` amplitude the summed
//! magnitude of the coefficients peaks when the scale equals the FWHM of the
//! dominant peaks.
//!
//! Sampled kernels are shifted to zero mean so a baseline gives no response, and
//! the scan starts at σ = 1 sample: narrower wavelets are too coarsely sampled to
//! keep their shape.

use log::debug;
use ndarray::{Array1, ArrayView1};

use crate::signal::interpolate::{interp_many, min_spacing, uniform_grid};
use crate::signal::smoothing::{gaussian_filter1d, reflect_index};
use crate::utils::stats::argmax;

/// FWHM / σ of a Gaussian.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Smoothing of the per-scale score, in scale steps.
const SCORE_SMOOTHING: f64 = 1.0;

/// Smallest scale scanned, in samples: the FWHM of a Gaussian with σ = 1 sample.
fn first_scale() -> usize {
    FWHM_PER_SIGMA.ceil() as usize
}

fn ricker(scale: f64) -> Vec<f64> {
    let sigma = scale / FWHM_PER_SIGMA;
    let half = (5.0 * sigma).ceil().max(1.0) as isize;
    let amplitude = 1.0 / (sigma * sigma);
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|t| {
            let u = t as f64 / sigma;
            amplitude * (1.0 - u * u) * (-0.5 * u * u).exp()
        })
        .collect();
    let mean = kernel.iter().sum::<f64>() / kernel.len() as f64;
    for w in &mut kernel {
        *w -= mean;
    }
    kernel
}

/// `Σ_i |(y ⋆ ψ_s)_i|` for every scale `s = first..=last`.
pub fn cwt_scores(y: ArrayView1<f64>, first: usize, last: usize) -> Array1<f64> {
    let n = y.len();
    let mut scores = Array1::zeros((last + 1).saturating_sub(first));
    for (k, score) in scores.iter_mut().enumerate() {
        let kernel = ricker((first + k) as f64);
        let half = (kernel.len() / 2) as isize;
        let mut total = 0.0;
        for i in 0..n {
            let mut acc = 0.0;
            for (j, &w) in kernel.iter().enumerate() {
                acc += w * y[reflect_index(i as isize + j as isize - half, n)];
            }
            total += acc.abs();
        }
        *score = total;
    }
    scores
}

/// Estimate the FWHM of the dominant peaks, in axis units, capped at `max_fwhm`.
///
/// Returns `None` when the axis has no positive spacing.
pub fn estimate_fwhm(x: ArrayView1<f64>, y: ArrayView1<f64>, max_fwhm: f64) -> Option<f64> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let step = min_spacing(x);
    if !step.is_finite() || step <= 0.0 {
        return None;
    }

    let grid = uniform_grid(x[0], x[n - 1], step);
    let resampled = interp_many(grid.view(), x, y);
    let first = first_scale();
    let last = (max_fwhm / step).ceil() as usize;
    if last <= first {
        return Some(max_fwhm.min(first as f64 * step));
    }

    let scores = cwt_scores(resampled.view(), first, last);
    let smoothed = gaussian_filter1d(scores.view(), SCORE_SMOOTHING);
    let best = first + argmax(smoothed.view());
    let fwhm = (best as f64 * step).min(max_fwhm);
    debug!("wavelet width scan: scales {}..={}, FWHM estimate {:.4}", first, last, fwhm);
    Some(fwhm)
}
