//! Sparse, high signal-to-noise peaks on a flat background.
//!
//! Candidates are the maxima of a smoothed copy of the spectrum whose raw height
//! clears a noise threshold. The noise level is the standard deviation of the
//! two-sample difference of the raw spectrum, which overestimates it when peaks
//! are dense. The smoothed spectrum is fit with every candidate; when that fit is
//! rejected, every subset of one candidate fewer is tried, and so on. The best
//! accepted subset seeds a fit to the raw spectrum.

use itertools::Itertools;
use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::arbiter::Arbiter;
use crate::error::Result;
use crate::lm::LmConfig;
use crate::model::{curve_fit, l1_loss, ModelFunction};
use crate::models::{flatten, sort_flat_by_centre, unflatten, Peak, PeakModel, PeakShape};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::peak_finding::maxima_indices;
use crate::signal::calculus::index_gradient;
use crate::signal::interpolate::at_fractional_index;
use crate::signal::smoothing::gaussian_filter1d;
use crate::spectrum::Spectrum;
use crate::utils::stats::min_max;

/// Options of [`fit_sparse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseOptions {
    /// Line shape of every peak. Default: Lorentzian
    pub peak_type: PeakShape,

    /// Starting width of every candidate, in axis units. Default: 10
    pub width: f64,

    /// Standard deviation of the smoothing filter, in samples. Default: 5
    pub smoothing: f64,

    /// Candidates and fitted heights must reach this multiple of the noise level.
    /// Default: 2
    pub noise_threshold: f64,

    /// Only the tallest candidates are kept, bounding the subset search. Default: 10
    pub max_candidates: usize,

    pub lm: LmConfig,
}

impl Default for SparseOptions {
    fn default() -> Self {
        Self {
            peak_type: PeakShape::Lorentzian,
            width: 10.0,
            smoothing: 5.0,
            noise_threshold: 2.0,
            max_candidates: 10,
            lm: LmConfig::default(),
        }
    }
}

impl SparseOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_peak_type(mut self, peak_type: PeakShape) -> Self {
        self.peak_type = peak_type;
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_noise_threshold(mut self, noise_threshold: f64) -> Self {
        self.noise_threshold = noise_threshold;
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

/// Result of [`fit_sparse`], peaks in ascending centre order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseFit {
    pub shape: PeakShape,
    pub constant: f64,
    pub peaks: Vec<Peak>,

    /// Flat `[c, C₁, W₁, H₁, …]` values.
    pub values: Array1<f64>,

    /// 1-σ errors in the layout of `values`.
    pub errors: Vec<Option<f64>>,

    /// Height threshold derived from the noise level.
    pub threshold: f64,

    /// The fitted model over the caller's axis, in the caller's order.
    pub curve: Array1<f64>,
}

/// Standard deviation of `y[i+1] − y[i−1]`, one-sided at the ends.
pub fn difference_noise(y: ArrayView1<f64>) -> f64 {
    let g = index_gradient(y);
    let n = g.len();
    let diff: Array1<f64> = g
        .iter()
        .enumerate()
        .map(|(i, &v)| if i == 0 || i + 1 == n { v } else { 2.0 * v })
        .collect();
    diff.std(0.0)
}

/// Fits of candidate subsets to the smoothed spectrum.
struct Draft<'a> {
    shape: PeakShape,
    x: &'a Array1<f64>,
    smooth: &'a Array1<f64>,
    threshold: f64,
    arbiter: Arbiter,
    lm: &'a LmConfig,
}

impl<'a> Draft<'a> {
    fn new(
        x: &'a Array1<f64>,
        smooth: &'a Array1<f64>,
        threshold: f64,
        options: &'a SparseOptions,
    ) -> Self {
        Self {
            shape: options.peak_type,
            x,
            smooth,
            threshold,
            arbiter: Arbiter::new(0.0, f64::INFINITY),
            lm: &options.lm,
        }
    }

    fn bounds(&self, n_peaks: usize) -> Result<ParameterBounds> {
        let (lo, hi) = min_max(self.x.view());
        let mut bounds = ParameterBounds::unbounded(1);
        for _ in 0..n_peaks {
            bounds.push(Bounds::new(lo, hi)?);
            bounds.push(Bounds::min_only(0.0));
            bounds.push(Bounds::min_only(0.0));
        }
        Ok(bounds)
    }

    /// Significant, separated peaks that all clear the threshold.
    fn accepts(&self, values: &Array1<f64>, errors: &[Option<f64>]) -> bool {
        if let Err(rejection) = self.arbiter.check(&values.to_vec(), errors) {
            debug!("draft rejected: {}", rejection);
            return false;
        }
        let (_, peaks) = unflatten(&values.to_vec());
        peaks.iter().all(|p| p.height >= self.threshold)
    }

    /// Sorted values and L1 loss of an accepted fit of `peaks`.
    fn fit(&self, constant: f64, peaks: &[Peak]) -> Result<Option<(Array1<f64>, f64)>> {
        let model = PeakModel::new(self.shape, peaks.len());
        let bounds = self.bounds(peaks.len())?;
        let fit = curve_fit(&model, self.x, self.smooth, &flatten(constant, peaks), &bounds, self.lm)?;
        if !fit.success {
            return Ok(None);
        }
        let (values, errors) = sort_flat_by_centre(&fit.values, &fit.errors);
        if !self.accepts(&values, &errors) {
            return Ok(None);
        }
        let loss = l1_loss(&model.eval(self.x, &values)?, self.smooth, None);
        Ok(Some((values, loss)))
    }

    /// The lowest-loss accepted subset of the largest size that has one.
    fn search(&self, constant: f64, candidates: &[Peak]) -> Result<Option<Array1<f64>>> {
        for size in (1..=candidates.len()).rev() {
            let mut best: Option<(Array1<f64>, f64)> = None;
            for subset in (0..candidates.len()).combinations(size) {
                let peaks: Vec<Peak> = subset.iter().map(|&i| candidates[i]).collect();
                if let Some((values, loss)) = self.fit(constant, &peaks)? {
                    if best.as_ref().map_or(true, |(_, b)| loss < *b) {
                        best = Some((values, loss));
                    }
                }
            }
            if let Some((values, loss)) = best {
                debug!("draft accepted with {} peaks, loss {:.6e}", size, loss);
                return Ok(Some(values));
            }
            debug!("no draft with {} peaks was accepted", size);
        }
        Ok(None)
    }
}

/// Fit sparse peaks on a flat background.
///
/// Returns `Ok(None)` when no candidate clears the noise threshold, when every
/// subset of candidates is rejected, or when the fit to the raw spectrum does not
/// converge.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum.
pub fn fit_sparse(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    options: &SparseOptions,
) -> Result<Option<SparseFit>> {
    let spectrum = Spectrum::new(x, y)?;
    let (x, y) = (spectrum.x(), spectrum.y());
    let smooth = gaussian_filter1d(y.view(), options.smoothing);
    let (baseline, _) = min_max(smooth.view());
    let threshold = options.noise_threshold * difference_noise(y.view());

    let mut candidates: Vec<Peak> = maxima_indices(x.view(), smooth.view())
        .into_iter()
        .map(|i| {
            Peak::new(
                at_fractional_index(x.view(), i),
                options.width,
                at_fractional_index(y.view(), i) - baseline,
            )
        })
        .filter(|p| p.height >= threshold)
        .collect();
    if candidates.is_empty() {
        info!("sparse fit: no maximum clears the threshold {:.4e}", threshold);
        return Ok(None);
    }
    if candidates.len() > options.max_candidates {
        warn!(
            "sparse fit: keeping the {} tallest of {} candidates",
            options.max_candidates,
            candidates.len()
        );
        candidates.sort_by(|a, b| b.height.total_cmp(&a.height));
        candidates.truncate(options.max_candidates);
        candidates.sort_by(|a, b| a.centre.total_cmp(&b.centre));
    }
    debug!("sparse fit: {} candidates above {:.4e}", candidates.len(), threshold);

    let draft = Draft::new(x, &smooth, threshold, options);
    let Some(initial) = draft.search(baseline, &candidates)? else {
        info!("sparse fit: every candidate subset was rejected");
        return Ok(None);
    };

    let n_peaks = (initial.len() - 1) / 3;
    let model = PeakModel::new(options.peak_type, n_peaks);
    let mut bounds = ParameterBounds::unbounded(1);
    for _ in 0..n_peaks {
        bounds.push(Bounds::unbounded());
        bounds.push(Bounds::min_only(0.0));
        bounds.push(Bounds::min_only(0.0));
    }
    let fit = curve_fit(&model, x, y, &initial, &bounds, &options.lm)?;
    if !fit.success {
        warn!("sparse fit to the raw spectrum did not converge");
        return Ok(None);
    }

    let (values, errors) = sort_flat_by_centre(&fit.values, &fit.errors);
    let curve = spectrum.restore_order(model.eval(x, &values)?);
    let (constant, peaks) = unflatten(&values.to_vec());
    info!("sparse fit: {} peaks", peaks.len());
    Ok(Some(SparseFit {
        shape: options.peak_type,
        constant,
        peaks,
        values,
        errors,
        threshold,
        curve,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn two_lorentzians(noise: f64, seed: u64) -> (Array1<f64>, Array1<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, noise).unwrap();
        let x = Array1::linspace(0.0, 499.0, 500);
        let y = x.mapv(|v| {
            2.0 + PeakShape::Lorentzian.eval(v, 150.0, 5.0, 10.0)
                + PeakShape::Lorentzian.eval(v, 350.0, 8.0, 6.0)
                + normal.sample(&mut rng)
        });
        (x, y)
    }

    #[test]
    fn test_difference_noise_of_a_ramp() {
        // Interior differences are 2 and the one-sided ends 1: mean 1.8, std 0.4.
        let y = Array1::linspace(0.0, 9.0, 10);
        assert_abs_diff_eq!(difference_noise(y.view()), 0.4, epsilon = 1e-12);
        assert_eq!(difference_noise(Array1::from_elem(10, 3.0).view()), 0.0);
    }

    #[test]
    fn test_recovers_two_lorentzians() {
        let (x, y) = two_lorentzians(0.02, 11);
        let fit = fit_sparse(x.view(), y.view(), &SparseOptions::default())
            .unwrap()
            .expect("two clear peaks");

        assert_eq!(fit.peaks.len(), 2);
        assert_abs_diff_eq!(fit.peaks[0].centre, 150.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[0].width, 5.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[0].height, 10.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[1].centre, 350.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[1].width, 8.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[1].height, 6.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.constant, 2.0, epsilon = 0.02);
        assert!(fit.threshold > 0.0);
        assert_eq!(fit.curve.len(), 500);
        assert!(fit.errors.iter().all(Option::is_some));
    }

    #[test]
    fn test_weak_bump_is_below_the_threshold() {
        let (x, y) = two_lorentzians(0.02, 12);
        let y = &y + &x.mapv(|v| PeakShape::Lorentzian.eval(v, 250.0, 5.0, 0.2));
        let fit = fit_sparse(x.view(), y.view(), &SparseOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(fit.peaks.len(), 2);
        assert!(fit.peaks.iter().all(|p| (p.centre - 250.0).abs() > 50.0));
    }

    #[test]
    fn test_spurious_candidate_is_dropped() {
        let x = Array1::linspace(0.0, 499.0, 500);
        let y = x.mapv(|v| 2.0 + PeakShape::Lorentzian.eval(v, 100.0, 5.0, 10.0));
        let smooth = gaussian_filter1d(y.view(), 5.0);
        let (baseline, _) = min_max(smooth.view());
        let options = SparseOptions::default();
        let draft = Draft::new(&x, &smooth, 0.5, &options);

        let candidates = [Peak::new(100.0, 10.0, 10.0), Peak::new(300.0, 10.0, 10.0)];
        let values = draft
            .search(baseline, &candidates)
            .unwrap()
            .expect("the real peak is kept");
        assert_eq!(values.len(), 4);
        assert_abs_diff_eq!(values[1], 100.0, epsilon = 0.5);
    }

    #[test]
    fn test_flat_spectrum_has_no_candidates() {
        let x = Array1::linspace(0.0, 99.0, 100);
        let y = Array1::from_elem(100, 4.0);
        assert!(fit_sparse(x.view(), y.view(), &SparseOptions::default())
            .unwrap()
            .is_none());
    }
}
