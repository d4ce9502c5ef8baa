//! Broad fluorescence background under Raman spectra.
//!
//! Local minima of suitable width are joined by straight lines; the resulting
//! envelope, clipped to the signal and optionally bridged across a region known to
//! hold peaks, is smoothed by asymmetric least squares.

use log::debug;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::als::{als_baseline, AlsOptions};
use crate::error::Result;
use crate::spectrum::Spectrum;

/// Options of [`fluorescence_background`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluorescenceOptions {
    /// Narrowest accepted minimum, in samples at half prominence. Default: 3
    pub min_width: f64,

    /// Widest accepted minimum. Default: 20
    pub max_width: f64,

    /// Axis interval bridged by a straight line. Default: 1000–1700
    pub excluded_region: Option<(f64, f64)>,

    /// Final smoothing. Default: λ = 1e4, p = 0.01, 20 passes
    pub als: AlsOptions,
}

impl Default for FluorescenceOptions {
    fn default() -> Self {
        Self {
            min_width: 3.0,
            max_width: 20.0,
            excluded_region: Some((1000.0, 1700.0)),
            als: AlsOptions::default(),
        }
    }
}

impl FluorescenceOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_width_range(mut self, min_width: f64, max_width: f64) -> Self {
        self.min_width = min_width;
        self.max_width = max_width;
        self
    }

    pub fn with_excluded_region(mut self, region: Option<(f64, f64)>) -> Self {
        self.excluded_region = region;
        self
    }

    pub fn with_als(mut self, als: AlsOptions) -> Self {
        self.als = als;
        self
    }
}

/// Local maxima of `s`; plateaus report their middle sample.
fn local_maxima(s: &[f64]) -> Vec<usize> {
    let n = s.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let mut i = 1;
    while i < n - 1 {
        if s[i - 1] < s[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && s[ahead] == s[i] {
                ahead += 1;
            }
            if s[ahead] < s[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Prominence of `s[peak]` and the bases it is measured from.
fn prominence(s: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = s[peak];

    let (mut left_min, mut left_base) = (height, peak);
    let mut i = peak as isize;
    while i >= 0 && s[i as usize] <= height {
        if s[i as usize] < left_min {
            left_min = s[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let (mut right_min, mut right_base) = (height, peak);
    let mut i = peak;
    while i < s.len() && s[i] <= height {
        if s[i] < right_min {
            right_min = s[i];
            right_base = i;
        }
        i += 1;
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Width of a peak at half its prominence, with linear interpolation.
fn width_at_half_prominence(s: &[f64], peak: usize) -> f64 {
    let (prom, left_base, right_base) = prominence(s, peak);
    let level = s[peak] - 0.5 * prom;

    let mut i = peak;
    while left_base < i && level < s[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if s[i] < level {
        left += (level - s[i]) / (s[i + 1] - s[i]);
    }

    let mut i = peak;
    while i < right_base && level < s[i] {
        i += 1;
    }
    let mut right = i as f64;
    if s[i] < level {
        right -= (level - s[i]) / (s[i - 1] - s[i]);
    }

    right - left
}

/// Indices of local minima of `y` whose half-prominence width lies in the range.
pub fn find_minima(y: ArrayView1<f64>, min_width: f64, max_width: f64) -> Vec<usize> {
    let inverted: Vec<f64> = y.iter().map(|v| -v).collect();
    local_maxima(&inverted)
        .into_iter()
        .filter(|&p| {
            let w = width_at_half_prominence(&inverted, p);
            w >= min_width && w <= max_width
        })
        .collect()
}

fn fill_line(out: &mut Array1<f64>, from: usize, to: usize, a: f64, b: f64) {
    if to <= from {
        out[from] = a;
        return;
    }
    let span = (to - from) as f64;
    for k in from..=to {
        out[k] = a + (b - a) * (k - from) as f64 / span;
    }
}

/// Fluorescence background of a spectrum.
///
/// Returns `(y − background, background)` in the caller's sample order.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum; ALS option errors propagate.
pub fn fluorescence_background(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    options: &FluorescenceOptions,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let spectrum = Spectrum::new(x, y)?;
    let (x, y) = (spectrum.x(), spectrum.y());
    let n = y.len();

    let minima = find_minima(y.view(), options.min_width, options.max_width);
    debug!("fluorescence background: {} minima", minima.len());

    // Envelope through the first sample, the minima and the last sample.
    let mut envelope = Array1::zeros(n);
    let mut prev = 0;
    for m in minima.iter().copied().chain(std::iter::once(n - 1)) {
        fill_line(&mut envelope, prev, m, y[prev], y[m]);
        prev = m;
    }
    let clipped: Array1<f64> = envelope
        .iter()
        .zip(y.iter())
        .map(|(&e, &v)| e.min(v))
        .collect();

    let mut bridged = clipped.clone();
    if let Some((lo, hi)) = options.excluded_region {
        let outside: Vec<usize> = minima
            .iter()
            .copied()
            .filter(|&m| x[m] < lo || x[m] > hi)
            .collect();
        let closest = |target: f64| {
            outside
                .iter()
                .copied()
                .min_by(|&a, &b| (x[a] - target).abs().total_cmp(&(x[b] - target).abs()))
        };
        if let (Some(a), Some(b)) = (closest(lo), closest(hi)) {
            if a < b {
                fill_line(&mut bridged, a, b, clipped[a], clipped[b]);
                bridged.zip_mut_with(&clipped, |v, &c| *v = v.min(c));
            }
        }
    }

    let background = als_baseline(bridged.view(), &options.als)?;
    let cleaned = y - &background;
    Ok((
        spectrum.restore_order(cleaned),
        spectrum.restore_order(background),
    ))
}
