//! Iterative polynomial background.
//!
//! The background is a polynomial through `order + 1` anchors, first placed at the
//! lowest sample of equal chunks of the spectrum. Each pass fits the anchor values
//! by L1 minimisation over the samples not suspected to be peaks, then re-estimates
//! the noise from the samples below the background and marks everything more than
//! one noise level above it as a peak. Passes stop when the mask stops changing.

use log::{debug, warn};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::model::minimize_l1;
use crate::models::AnchorPolynomial;
use crate::parameters::bounds::ParameterBounds;
use crate::spectrum::Spectrum;
use crate::utils::stats::{argmin_range, rms};

/// Which curve a background removal returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BaselineOutput {
    /// The background itself.
    Baseline,

    /// The spectrum with the background removed.
    #[default]
    Subtracted,
}

/// Options of [`remove_baseline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolynomialBaselineOptions {
    /// Cap on fit-and-mask passes. Default: 100
    pub max_iterations: usize,

    /// Returned curve. Default: `Subtracted`
    pub output: BaselineOutput,

    /// Axis intervals `(lo, hi)` always excluded from the fit.
    pub excluded_regions: Vec<(f64, f64)>,
}

impl Default for PolynomialBaselineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            output: BaselineOutput::Subtracted,
            excluded_regions: Vec::new(),
        }
    }
}

impl PolynomialBaselineOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_output(mut self, output: BaselineOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_excluded_region(mut self, lo: f64, hi: f64) -> Self {
        self.excluded_regions.push((lo.min(hi), lo.max(hi)));
        self
    }
}

/// Result of a background removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineFit {
    /// The curve selected by [`BaselineOutput`], in the caller's sample order.
    pub output: Array1<f64>,

    /// The background, in the caller's sample order.
    pub baseline: Array1<f64>,

    /// Samples excluded from the last fit, in the caller's sample order.
    pub mask: Vec<bool>,

    pub iterations: usize,

    /// Whether the mask settled before the iteration cap.
    pub converged: bool,
}

/// Indices of the lowest sample in `order + 1` equal chunks of `y`.
pub fn initial_anchor_indices(y: ArrayView1<f64>, order: usize) -> Vec<usize> {
    let n = y.len();
    let chunks = order + 1;
    let edges: Vec<usize> = (0..=chunks)
        .map(|k| ((k as f64) * (n - 1) as f64 / chunks as f64).round() as usize)
        .collect();

    let mut anchors = Vec::with_capacity(chunks);
    for k in 0..chunks {
        let start = edges[k].max(anchors.last().map_or(0, |&a: &usize| a + 1));
        let end = edges[k + 1].max(start + 1).min(n);
        if start >= n {
            break;
        }
        anchors.push(argmin_range(y, start, end));
    }
    anchors
}

/// Remove a polynomial background of the given order.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum, `InvalidInput` when the spectrum has
/// fewer samples than the polynomial has anchors.
pub fn remove_baseline(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    order: usize,
    options: &PolynomialBaselineOptions,
) -> Result<BaselineFit> {
    let spectrum = Spectrum::new(x, y)?;
    let n = spectrum.len();
    if order + 1 > n {
        return Err(SpecFitError::InvalidInput(format!(
            "a polynomial of order {} needs at least {} samples, got {}",
            order,
            order + 1,
            n
        )));
    }
    let (x, y) = (spectrum.x(), spectrum.y());

    let indices = initial_anchor_indices(y.view(), order);
    let anchors: Array1<f64> = indices.iter().map(|&i| x[i]).collect();
    let poly = AnchorPolynomial::new(anchors)?;
    let mut values: Array1<f64> = indices.iter().map(|&i| y[i]).collect();
    let bounds = ParameterBounds::unbounded(values.len());

    let excluded: Vec<bool> = x
        .iter()
        .map(|&v| options.excluded_regions.iter().any(|&(lo, hi)| v >= lo && v <= hi))
        .collect();
    let mut mask = excluded.clone();
    let mut baseline = poly.eval(x.view(), values.view());
    let mut iterations = 0;
    let mut converged = false;

    while iterations < options.max_iterations {
        iterations += 1;
        let weights: Array1<f64> = mask.iter().map(|&m| if m { 0.0 } else { 1.0 }).collect();
        match minimize_l1(&poly, x, y, &values, &bounds, Some(&weights)) {
            Ok(fit) => values = fit.params,
            Err(e) => {
                warn!("polynomial background fit failed: {}", e);
                break;
            }
        }
        baseline = poly.eval(x.view(), values.view());

        let residual = y - &baseline;
        let noise = rms(residual.iter().copied().filter(|r| *r < 0.0));
        let new_mask: Vec<bool> = residual
            .iter()
            .zip(excluded.iter())
            .map(|(&r, &ex)| ex || r > noise)
            .collect();

        let changed = new_mask.iter().zip(mask.iter()).filter(|(a, b)| a != b).count();
        debug!(
            "polynomial background pass {}: noise {:.4e}, {} mask changes",
            iterations, noise, changed
        );
        mask = new_mask;
        if changed == 0 {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(
            "polynomial background stopped after {} passes without a stable mask",
            iterations
        );
    }

    let output = match options.output {
        BaselineOutput::Baseline => baseline.clone(),
        BaselineOutput::Subtracted => y - &baseline,
    };
    let mask = if spectrum.is_reversed() {
        mask.into_iter().rev().collect()
    } else {
        mask
    };
    Ok(BaselineFit {
        output: spectrum.restore_order(output),
        baseline: spectrum.restore_order(baseline),
        mask,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeakShape;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_initial_anchors_are_chunk_minima() {
        let y = ndarray::array![5.0, 1.0, 4.0, 3.0, 0.5, 6.0, 2.0, 7.0, 8.0];
        let anchors = initial_anchor_indices(y.view(), 2);
        assert_eq!(anchors.len(), 3);
        assert_eq!(anchors[0], 1);
        assert_eq!(anchors[1], 4);
        assert_eq!(anchors[2], 6);
    }

    #[test]
    fn test_polynomial_signal_is_removed_exactly() {
        let x = Array1::linspace(0.0, 99.0, 100);
        let y = x.mapv(|v| 2.0 + 0.03 * v - 4e-4 * v * v + 2e-6 * v * v * v);
        let fit = remove_baseline(x.view(), y.view(), 3, &PolynomialBaselineOptions::default())
            .unwrap();
        assert!(rms(fit.output.iter().copied()) < 1e-4);
    }

    #[test]
    fn test_returns_baseline_when_asked() {
        let x = Array1::linspace(0.0, 199.0, 200);
        let background = x.mapv(|v| 1.0 + 0.01 * v);
        let y = &background + &x.mapv(|v| PeakShape::Gaussian.eval(v, 100.0, 3.0, 5.0));
        let options = PolynomialBaselineOptions::default().with_output(BaselineOutput::Baseline);
        let fit = remove_baseline(x.view(), y.view(), 1, &options).unwrap();
        for i in (0..200).filter(|i| (*i as i64 - 100).abs() > 20) {
            assert_abs_diff_eq!(fit.output[i], background[i], epsilon = 0.02);
        }
        assert!(fit.mask[100]);
    }

    #[test]
    fn test_descending_axis_keeps_caller_order() {
        let x = Array1::linspace(99.0, 0.0, 100);
        let y = x.mapv(|v| 1.0 + 0.5 * v);
        let options = PolynomialBaselineOptions::default().with_output(BaselineOutput::Baseline);
        let fit = remove_baseline(x.view(), y.view(), 1, &options).unwrap();
        assert_abs_diff_eq!(fit.output[0], y[0], epsilon = 1e-3);
        assert_abs_diff_eq!(fit.output[99], y[99], epsilon = 1e-3);
    }

    #[test]
    fn test_options_from_json() {
        let options =
            PolynomialBaselineOptions::from_json(r#"{"max_iterations": 5, "output": "Baseline"}"#)
                .unwrap();
        assert_eq!(options.max_iterations, 5);
        assert_eq!(options.output, BaselineOutput::Baseline);
        assert!(options.excluded_regions.is_empty());
    }
}
