//! Moving-gradient background for sparse peaks on broad, low-SNR backgrounds.

use log::debug;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::utils::stats::median;

/// Options of [`moving_gradient_baseline`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingGradientOptions {
    /// Distance in samples between the two ends of each chord. Default: 50
    pub window: usize,

    /// Cap on mask refinements. Default: 10
    pub max_iterations: usize,

    /// Percentage chance of accepting a run of noise as a peak. Default: 0.5
    pub peak_tolerance: f64,
}

impl Default for MovingGradientOptions {
    fn default() -> Self {
        Self {
            window: 50,
            max_iterations: 10,
            peak_tolerance: 0.5,
        }
    }
}

impl MovingGradientOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_peak_tolerance(mut self, peak_tolerance: f64) -> Self {
        self.peak_tolerance = peak_tolerance;
        self
    }

    /// Shortest run of samples above the noise threshold treated as a peak:
    /// the smallest `K` with `100 · (1/6)^K ≤ peak_tolerance`.
    pub fn min_run(&self) -> usize {
        let mut k = 0;
        while 100.0 * (1.0f64 / 6.0).powi(k as i32) > self.peak_tolerance && k < 64 {
            k += 1;
        }
        k
    }
}

/// Result of [`moving_gradient_baseline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingGradientFit {
    /// Background, offset so that `residual` has zero median.
    pub baseline: Array1<f64>,

    /// `y − baseline`.
    pub residual: Array1<f64>,

    /// Samples suspected to lie inside a peak.
    pub mask: Vec<bool>,

    pub iterations: usize,
}

/// Rebuild the background from chord gradients whose ends avoid the mask.
///
/// Every chord contributes its gradient to the samples it spans; the per-sample
/// slope is the median of the contributions and the background is their running
/// sum from 0. Samples no chord reaches reuse the nearest slope before them, or
/// the first available one at the start.
fn construct_background(gradients: &[f64], mask: &[bool], window: usize, n: usize) -> Array1<f64> {
    let mut spans: Vec<Vec<f64>> = vec![Vec::new(); n];
    for (i, &g) in gradients.iter().enumerate() {
        if !mask[i] && !mask[i + window] {
            for span in spans.iter_mut().skip(i).take(window + 1) {
                span.push(g);
            }
        }
    }

    let mut out = Array1::zeros(n);
    let mut slope = spans
        .iter()
        .find(|s| !s.is_empty())
        .map_or(0.0, |s| median(ArrayView1::from(s.as_slice())));
    let mut level = 0.0;
    for (k, span) in spans.iter().enumerate() {
        out[k] = level;
        if !span.is_empty() {
            slope = median(ArrayView1::from(span.as_slice()));
        }
        level += slope;
    }
    out
}

/// Samples that belong to a run of at least `min_run` values above `threshold`.
fn runs_above(values: &Array1<f64>, threshold: f64, min_run: usize) -> Vec<bool> {
    let n = values.len();
    let mut mask = vec![false; n];
    let mut start = None;
    for i in 0..=n {
        let above = i < n && values[i] > threshold;
        match (above, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= min_run {
                    mask[s..i].iter_mut().for_each(|m| *m = true);
                }
                start = None;
            }
            _ => {}
        }
    }
    mask
}

fn recentre(y: ArrayView1<f64>, background: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
    let mut residual = &y - background;
    let offset = median(residual.view());
    residual -= offset;
    (background + offset, residual)
}

/// Moving-gradient background of `y`.
///
/// Chords `window` samples long are drawn between every pair of samples; their
/// gradients, with chords touching suspected peaks left out, give a robust local
/// slope. Windows below 2 are raised to 2.
///
/// # Errors
///
/// `InvalidInput` when the window is not shorter than the signal.
pub fn moving_gradient_baseline(
    y: ArrayView1<f64>,
    options: &MovingGradientOptions,
) -> Result<MovingGradientFit> {
    let n = y.len();
    let window = options.window.max(2);
    if window >= n {
        return Err(SpecFitError::InvalidInput(format!(
            "moving-gradient window {} must be shorter than the signal ({} samples)",
            window, n
        )));
    }

    let gradients: Vec<f64> = (0..n - window)
        .map(|i| (y[i + window] - y[i]) / window as f64)
        .collect();
    let min_run = options.min_run();

    let mut mask = vec![false; n];
    let (mut baseline, mut residual) =
        recentre(y, &construct_background(&gradients, &mask, window, n));

    let mut iterations = 0;
    while iterations < options.max_iterations {
        iterations += 1;
        let threshold = median(residual.mapv(f64::abs).view());
        let new_mask = runs_above(&residual, threshold, min_run);
        if new_mask == mask {
            break;
        }
        mask = new_mask;
        (baseline, residual) = recentre(y, &construct_background(&gradients, &mask, window, n));
        debug!(
            "moving-gradient pass {}: {} samples masked",
            iterations,
            mask.iter().filter(|m| **m).count()
        );
    }

    Ok(MovingGradientFit {
        baseline,
        residual,
        mask,
        iterations,
    })
}
