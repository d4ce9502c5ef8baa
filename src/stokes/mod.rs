//! # Stokes/anti-Stokes fitting
//!
//! A Raman spectrum spanning both sides of the laser line is fit as
//!
//! ```text
//! (polyAS(x)·[x < 0] + polyS(x)·[x ≥ 0] + Σ peaks(x)) · notch(x) + c + leak(x)
//! ```
//!
//! where `notch` is the transmission of the notch filter (two logistic edges) and
//! `leak` is a Lorentzian at zero shift. The background is fit first with
//! peak-suspected samples excluded. A number of outer cycles then add peaks, refit
//! everything jointly, drop redundant peaks and reject peaks that mostly sit inside
//! the notch.

pub mod background;
mod coordinator;

pub use background::{notch_edge, PolynomialSide, StokesBackground};
pub use coordinator::{fit_stokes_antistokes, fit_stokes_antistokes_with_cancel};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lm::LmConfig;
use crate::models::{Peak, PeakShape};

/// Options of [`fit_stokes_antistokes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StokesOptions {
    /// Order of the anti-Stokes background polynomial. Default: 4
    pub poly_order_anti_stokes: usize,

    /// Order of the Stokes background polynomial. Default: 4
    pub poly_order_stokes: usize,

    /// Smoothing used to locate the notch edge, in axis units. Default: 30
    pub smoothing: f64,

    /// Smoothing used to pick the background anchors, in samples. Default: 2
    pub noise_smoothing: f64,

    /// Consecutive above-noise samples that make a peak-suspected run; even
    /// values are bumped to the next odd one. Default: 5
    pub peak_threshold_window: usize,

    /// Default: 10
    pub default_peak_width: f64,

    /// Default: 5
    pub min_peak_width: f64,

    /// Default: 30
    pub max_peak_width: f64,

    /// Outer add/refit/prune cycles. Default: 2
    pub iterations: usize,

    /// Peaks losing at least this fraction of their area to the notch are
    /// dropped. Default: 0.1
    pub allowed_peak_fraction_in_notch: f64,

    /// Initial region count of the add-peak search. Default: 50
    pub regions: usize,

    /// Default: Lorentzian
    pub peak_type: PeakShape,

    /// Seed of the trial placement. Default: drawn from the OS
    pub seed: Option<u64>,

    /// Cap on add-peak steps per cycle; reaching it marks the result as
    /// truncated. Default: 100
    pub max_add_steps: usize,

    /// Cap on background mask refinements. Default: 100
    pub max_background_iterations: usize,

    /// Solver settings.
    pub lm: LmConfig,
}

impl Default for StokesOptions {
    fn default() -> Self {
        Self {
            poly_order_anti_stokes: 4,
            poly_order_stokes: 4,
            smoothing: 30.0,
            noise_smoothing: 2.0,
            peak_threshold_window: 5,
            default_peak_width: 10.0,
            min_peak_width: 5.0,
            max_peak_width: 30.0,
            iterations: 2,
            allowed_peak_fraction_in_notch: 0.1,
            regions: 50,
            peak_type: PeakShape::Lorentzian,
            seed: None,
            max_add_steps: 100,
            max_background_iterations: 100,
            lm: LmConfig::default(),
        }
    }
}

impl StokesOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_poly_orders(mut self, anti_stokes: usize, stokes: usize) -> Self {
        self.poly_order_anti_stokes = anti_stokes;
        self.poly_order_stokes = stokes;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_noise_smoothing(mut self, noise_smoothing: f64) -> Self {
        self.noise_smoothing = noise_smoothing;
        self
    }

    pub fn with_peak_threshold_window(mut self, window: usize) -> Self {
        self.peak_threshold_window = window;
        self
    }

    pub fn with_peak_widths(mut self, default: f64, min: f64, max: f64) -> Self {
        self.default_peak_width = default;
        self.min_peak_width = min;
        self.max_peak_width = max;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_allowed_peak_fraction_in_notch(mut self, fraction: f64) -> Self {
        self.allowed_peak_fraction_in_notch = fraction;
        self
    }

    pub fn with_regions(mut self, regions: usize) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_peak_type(mut self, peak_type: PeakShape) -> Self {
        self.peak_type = peak_type;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_add_steps(mut self, steps: usize) -> Self {
        self.max_add_steps = steps;
        self
    }

    /// Window actually used for peak-suspected runs: odd and at least 3.
    pub(crate) fn threshold_window(&self) -> usize {
        let w = self.peak_threshold_window.max(3);
        if w % 2 == 0 {
            w + 1
        } else {
            w
        }
    }
}

/// Peak parameters in ascending centre order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakTable {
    pub centres: Vec<f64>,
    pub widths: Vec<f64>,
    pub heights: Vec<f64>,
}

impl PeakTable {
    pub fn from_peaks(peaks: &[Peak]) -> Self {
        let mut sorted = peaks.to_vec();
        crate::models::sort_by_centre(&mut sorted);
        Self {
            centres: sorted.iter().map(|p| p.centre).collect(),
            widths: sorted.iter().map(|p| p.width).collect(),
            heights: sorted.iter().map(|p| p.height).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.centres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centres.is_empty()
    }

    pub fn peaks(&self) -> Vec<Peak> {
        self.centres
            .iter()
            .zip(&self.widths)
            .zip(&self.heights)
            .map(|((&c, &w), &h)| Peak::new(c, w, h))
            .collect()
    }
}

/// Result of a Stokes/anti-Stokes fit. Arrays follow the caller's sample order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StokesFit {
    /// Background plus peaks.
    pub full_fit: Array1<f64>,

    /// The spectrum minus the fitted background.
    pub background_removed: Array1<f64>,

    /// Peaks alone, attenuated by the notch.
    pub peaks_only: Array1<f64>,

    pub peaks: PeakTable,

    pub background: StokesBackground,

    /// Half width of the notch found before fitting.
    pub notch_edge: f64,

    /// An add-peak loop hit its step cap or the fit was cancelled.
    pub truncated: bool,
}
