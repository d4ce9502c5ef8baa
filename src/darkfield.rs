//! Dark-field scattering spectra.
//!
//! A handful of broad peaks on a constant background. Candidate centres are the
//! maxima of a heavily smoothed copy of the spectrum; all peaks share a default
//! height and width. The model is fit to the smoothed spectrum first and the
//! result seeds a fit to the raw spectrum. Both fits keep the bounds through a
//! change of variables. Peaks whose height collapses to zero are pruned and the
//! survivors refit; a rejected fit loses its weakest candidate and is retried
//! until nothing is left.

use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::arbiter::{prune_zero_heights, Arbiter};
use crate::error::Result;
use crate::lm::LmConfig;
use crate::model::{curve_fit_transformed, ModelFunction};
use crate::models::{flatten, sort_by_centre, sort_flat_by_centre, unflatten, Peak, PeakModel, PeakShape};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::peak_finding::{find_maxima, Maximum};
use crate::signal::smoothing::{gaussian_filter1d, median_spacing};
use crate::spectrum::Spectrum;
use crate::utils::stats::{median, min_max, percentile};

/// One end of the spectral axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisEnd {
    Low,
    High,
}

/// Options of [`fit_darkfield`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarkfieldOptions {
    /// Line shape of every peak. Default: Gaussian
    pub peak_type: PeakShape,

    /// Standard deviation of the smoothing filter, in samples. Default: 10
    pub smoothing: f64,

    /// Percentile of the smoothed signal used for the default height. Default: 70
    pub percentile_height: f64,

    /// Divisor of the mean peak spacing giving the default width. Default: 3
    pub narrowing_factor: f64,

    /// Smallest accepted width. Default: the median sample spacing
    pub min_width: Option<f64>,

    /// Largest accepted width. Default: the axis span
    pub max_width: Option<f64>,

    /// How far centres may leave the axis, as a fraction of its span. Default: 0.5
    pub centre_margin: f64,

    /// Divide the intensities by this percentile before fitting; results are
    /// scaled back. Default: off
    pub scale_to_percentile: Option<f64>,

    /// Clip level of the noise gate. Default: no clipping
    pub spike_value: Option<f64>,

    /// Reject spectra whose `median(y) / median(|y|)` falls below this. Default: off
    pub noise_threshold: Option<f64>,

    /// Replace the peak at this end by a symmetric pair of half-width peaks.
    /// Default: off
    pub shoulder_split: Option<AxisEnd>,

    /// Solver settings of both fits.
    pub lm: LmConfig,
}

impl Default for DarkfieldOptions {
    fn default() -> Self {
        Self {
            peak_type: PeakShape::Gaussian,
            smoothing: 10.0,
            percentile_height: 70.0,
            narrowing_factor: 3.0,
            min_width: None,
            max_width: None,
            centre_margin: 0.5,
            scale_to_percentile: None,
            spike_value: None,
            noise_threshold: None,
            shoulder_split: None,
            lm: LmConfig::default(),
        }
    }
}

impl DarkfieldOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_peak_type(mut self, peak_type: PeakShape) -> Self {
        self.peak_type = peak_type;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_percentile_height(mut self, percentile_height: f64) -> Self {
        self.percentile_height = percentile_height;
        self
    }

    pub fn with_narrowing_factor(mut self, narrowing_factor: f64) -> Self {
        self.narrowing_factor = narrowing_factor;
        self
    }

    pub fn with_width_range(mut self, min_width: f64, max_width: f64) -> Self {
        self.min_width = Some(min_width);
        self.max_width = Some(max_width);
        self
    }

    pub fn with_scale_to_percentile(mut self, q: f64) -> Self {
        self.scale_to_percentile = Some(q);
        self
    }

    pub fn with_noise_threshold(mut self, noise_threshold: f64) -> Self {
        self.noise_threshold = Some(noise_threshold);
        self
    }

    pub fn with_spike_value(mut self, spike_value: f64) -> Self {
        self.spike_value = Some(spike_value);
        self
    }

    pub fn with_shoulder_split(mut self, end: AxisEnd) -> Self {
        self.shoulder_split = Some(end);
        self
    }
}

/// A fitted value and its 1-σ error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    pub error: f64,
}

/// An accepted dark-field fit, peaks in ascending centre order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkfieldFit {
    pub shape: PeakShape,
    pub constant: Estimate,
    pub centres: Vec<Estimate>,
    pub widths: Vec<Estimate>,
    pub heights: Vec<Estimate>,

    /// The fitted model over the caller's axis, in the caller's order.
    pub curve: Array1<f64>,
}

impl DarkfieldFit {
    pub fn peaks(&self) -> Vec<Peak> {
        self.centres
            .iter()
            .zip(&self.widths)
            .zip(&self.heights)
            .map(|((c, w), h)| Peak::new(c.value, w.value, h.value))
            .collect()
    }

    /// Flat `[c, C₁, W₁, H₁, …]` values.
    pub fn values(&self) -> Array1<f64> {
        flatten(self.constant.value, &self.peaks())
    }

    /// Errors in the layout of [`DarkfieldFit::values`].
    pub fn errors(&self) -> Array1<f64> {
        let mut out = vec![self.constant.error];
        for ((c, w), h) in self.centres.iter().zip(&self.widths).zip(&self.heights) {
            out.extend_from_slice(&[c.error, w.error, h.error]);
        }
        Array1::from_vec(out)
    }
}

/// Whether the spectrum passes the noise gate.
///
/// Pure noise has a median near zero relative to its median magnitude.
fn passes_noise_gate(y: ArrayView1<f64>, spike_value: Option<f64>, threshold: f64) -> bool {
    let clipped = match spike_value {
        Some(s) => y.mapv(|v| v.clamp(-s.abs(), s.abs())),
        None => y.to_owned(),
    };
    let magnitude = median(clipped.mapv(f64::abs).view());
    if magnitude <= 0.0 {
        return false;
    }
    let ratio = median(clipped.view()) / magnitude;
    debug!("dark-field noise gate: ratio {:.4}, threshold {:.4}", ratio, threshold);
    ratio >= threshold
}

/// Replace the peak at `end` by a pair at `C ± W/2`, each of width `W/2` and
/// height `H · 0.5 · √e`.
fn split_shoulder(peaks: &mut Vec<Peak>, end: AxisEnd) {
    let index = match end {
        AxisEnd::Low => peaks
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.centre.total_cmp(&b.1.centre)),
        AxisEnd::High => peaks
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.centre.total_cmp(&b.1.centre)),
    }
    .map(|(i, _)| i);

    if let Some(i) = index {
        let p = peaks.remove(i);
        let height = p.height * 0.5 * std::f64::consts::E.sqrt();
        let half = 0.5 * p.width;
        peaks.push(Peak::new(p.centre - half, half, height));
        peaks.push(Peak::new(p.centre + half, half, height));
        sort_by_centre(peaks);
    }
}

/// Heights below this fraction of the intensity range count as zero.
const COLLAPSED_HEIGHT: f64 = 1e-9;

struct Setting<'a> {
    shape: PeakShape,
    x: &'a Array1<f64>,
    y: &'a Array1<f64>,
    smooth: &'a Array1<f64>,
    arbiter: Arbiter,
    centre_range: (f64, f64),
    lm: &'a LmConfig,
}

impl<'a> Setting<'a> {
    fn new(
        x: &'a Array1<f64>,
        y: &'a Array1<f64>,
        smooth: &'a Array1<f64>,
        options: &'a DarkfieldOptions,
    ) -> Self {
        let (lo, hi) = min_max(x.view());
        let span = hi - lo;
        let margin = options.centre_margin * span;
        let min_width = options.min_width.unwrap_or_else(|| median_spacing(x.view()));
        let max_width = options.max_width.unwrap_or(span);
        Self {
            shape: options.peak_type,
            x,
            y,
            smooth,
            arbiter: Arbiter::new(min_width, max_width),
            centre_range: (lo - margin, hi + margin),
            lm: &options.lm,
        }
    }

    fn bounds(&self, n_peaks: usize) -> Result<ParameterBounds> {
        let mut bounds = ParameterBounds::unbounded(1);
        for _ in 0..n_peaks {
            bounds.push(Bounds::new(self.centre_range.0, self.centre_range.1)?);
            bounds.push(Bounds::new(self.arbiter.min_width, self.arbiter.max_width)?);
            bounds.push(Bounds::min_only(0.0));
        }
        Ok(bounds)
    }

    /// Smoothed fit, then raw fit, sorted by centre. `None` when the raw fit does
    /// not converge.
    fn refine(&self, initial: Array1<f64>) -> Result<Option<(Array1<f64>, Vec<Option<f64>>)>> {
        let n_peaks = (initial.len() - 1) / 3;
        let model = PeakModel::new(self.shape, n_peaks);
        let bounds = self.bounds(n_peaks)?;

        let smoothed = curve_fit_transformed(&model, self.x, self.smooth, &initial, &bounds, self.lm)?;
        let seed = if smoothed.success {
            smoothed.values
        } else {
            warn!("dark-field fit to the smoothed signal failed, seeding with the initial guess");
            initial
        };

        let raw = curve_fit_transformed(&model, self.x, self.y, &seed, &bounds, self.lm)?;
        if !raw.success {
            warn!("dark-field fit with {} peaks did not converge", n_peaks);
            return Ok(None);
        }
        Ok(Some(sort_flat_by_centre(&raw.values, &raw.errors)))
    }

    /// Refine, arbitrate, and on rejection prune collapsed peaks and try the
    /// survivors once. `None` when the attempt is rejected.
    fn attempt(&self, peaks: &[Peak]) -> Result<Option<(Array1<f64>, Vec<Option<f64>>)>> {
        let (min, max) = min_max(self.smooth.view());
        let Some((values, errors)) = self.refine(flatten(min, peaks))? else {
            return Ok(None);
        };
        let rejection = match self.arbiter.check(&values.to_vec(), &errors) {
            Ok(()) => return Ok(Some((values, errors))),
            Err(rejection) => rejection,
        };

        let floor = COLLAPSED_HEIGHT * (max - min);
        let (constant, mut fitted) = unflatten(&values.to_vec());
        for p in fitted.iter_mut().filter(|p| p.height <= floor) {
            p.height = 0.0;
        }
        let pruned = prune_zero_heights(&mut fitted);
        if pruned == 0 || fitted.is_empty() {
            warn!("dark-field fit with {} peaks rejected: {}", peaks.len(), rejection);
            return Ok(None);
        }
        debug!(
            "dark-field fit with {} peaks rejected ({}), refitting {} after pruning zero heights",
            peaks.len(),
            rejection,
            fitted.len()
        );

        let Some((values, errors)) = self.refine(flatten(constant, &fitted))? else {
            return Ok(None);
        };
        match self.arbiter.check(&values.to_vec(), &errors) {
            Ok(()) => Ok(Some((values, errors))),
            Err(rejection) => {
                warn!("dark-field fit with {} pruned peaks rejected: {}", fitted.len(), rejection);
                Ok(None)
            }
        }
    }
}

/// Fit a dark-field spectrum with up to `n_peaks` peaks.
///
/// Returns `Ok(None)` when the noise gate rejects the spectrum, when no maximum is
/// found, or when every retry down to a single peak is rejected.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum; invalid width options surface as `Bounds`.
pub fn fit_darkfield(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    n_peaks: usize,
    options: &DarkfieldOptions,
) -> Result<Option<DarkfieldFit>> {
    let spectrum = Spectrum::new(x, y)?;
    if n_peaks == 0 {
        return Ok(None);
    }
    if let Some(threshold) = options.noise_threshold {
        if !passes_noise_gate(spectrum.y().view(), options.spike_value, threshold) {
            info!("dark-field spectrum rejected as noise");
            return Ok(None);
        }
    }

    let scale = options
        .scale_to_percentile
        .map(|q| percentile(spectrum.y().view(), q))
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(1.0);
    let x = spectrum.x();
    let y = spectrum.y() / scale;
    let smooth = gaussian_filter1d(y.view(), options.smoothing);

    let mut candidates: Vec<Maximum> = find_maxima(x.view(), smooth.view());
    if candidates.is_empty() {
        info!("dark-field spectrum has no maxima");
        return Ok(None);
    }
    if candidates.len() > n_peaks {
        candidates.sort_by(|a, b| b.value.total_cmp(&a.value));
        candidates.truncate(n_peaks);
    }
    candidates.sort_by(|a, b| a.position.total_cmp(&b.position));
    debug!("dark-field candidates: {:?}", candidates);

    let (lo, hi) = spectrum.span();
    let span = hi - lo;
    let (smooth_min, _) = min_max(smooth.view());
    let default_height = percentile(smooth.view(), options.percentile_height) - smooth_min;
    let setting = Setting::new(x, &y, &smooth, options);

    while !candidates.is_empty() {
        let spacing = if candidates.len() > 1 {
            (candidates[candidates.len() - 1].position - candidates[0].position)
                / (candidates.len() - 1) as f64
        } else {
            span
        };
        let default_width = spacing / options.narrowing_factor;
        let mut peaks: Vec<Peak> = candidates
            .iter()
            .map(|c| Peak::new(c.position, default_width, default_height))
            .collect();
        if let Some(end) = options.shoulder_split {
            split_shoulder(&mut peaks, end);
        }

        if let Some((values, errors)) = setting.attempt(&peaks)? {
            let model = PeakModel::new(options.peak_type, (values.len() - 1) / 3);
            let curve = model.eval(x, &values)? * scale;
            let fit = assemble(options.peak_type, &values, &errors, scale, spectrum.restore_order(curve));
            info!("dark-field fit accepted with {} peaks", fit.centres.len());
            return Ok(Some(fit));
        }

        if let Some(weakest) = candidates
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.value.total_cmp(&b.1.value))
            .map(|(i, _)| i)
        {
            candidates.remove(weakest);
        }
        debug!("dark-field retry with {} candidates", candidates.len());
    }

    info!("dark-field fit failed for every peak count");
    Ok(None)
}

fn assemble(
    shape: PeakShape,
    values: &Array1<f64>,
    errors: &[Option<f64>],
    scale: f64,
    curve: Array1<f64>,
) -> DarkfieldFit {
    let est = |i: usize, s: f64| Estimate {
        value: values[i] * s,
        error: errors[i].unwrap_or(f64::NAN) * s,
    };
    let n = (values.len() - 1) / 3;
    DarkfieldFit {
        shape,
        constant: est(0, scale),
        centres: (0..n).map(|k| est(1 + 3 * k, 1.0)).collect(),
        widths: (0..n).map(|k| est(2 + 3 * k, 1.0)).collect(),
        heights: (0..n).map(|k| est(3 + 3 * k, scale)).collect(),
        curve,
    }
}
