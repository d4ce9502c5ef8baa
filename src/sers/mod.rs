//! # Iterative SERS peak fitting
//!
//! Peaks are discovered one at a time. Each step places a trial peak in every one
//! of `R` equal regions of the axis, keeps the best, and re-optimises every peak
//! and a constant offset under an L1 loss. When a step stops improving the fit, the
//! search is refined by multiplying `R` by five; the loop ends once there are more
//! regions than samples. A final bounded least-squares fit provides the errors.
//!
//! A detector transmission, when given, multiplies every peak but not the
//! constant. The final peaks may optionally be made asymmetric.
//!
//! - [`fit_sers_iterative`]: one spectrum
//! - [`fit_sers_batch`]: many spectra on a shared axis, in parallel with the
//!   `parallel` feature

mod batch;
mod controller;

pub use batch::{fit_sers_batch, median_spectrum};
pub use controller::{fit_sers_iterative, fit_sers_iterative_with_cancel};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lm::LmConfig;
use crate::models::{AsymmetricPeak, Peak, PeakShape};

/// Options of [`fit_sers_iterative`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SersOptions {
    /// Line shape of every peak. Default: Lorentzian
    pub peak_type: PeakShape,

    /// Largest peak FWHM, in axis units; also caps the wavelet width scan. Default: 40
    pub max_fwhm: f64,

    /// Initial number of regions. Default: 50
    pub regions: usize,

    /// Peaks narrower than this fraction of the default width are pruned. Default: 0.1
    pub min_width_factor: f64,

    /// Width of new trial peaks. Default: estimated by the wavelet scan
    pub default_width: Option<f64>,

    /// Peaks to start from instead of an empty list.
    pub initial_fit: Vec<Peak>,

    /// Run the add-peak loop; off only refines `initial_fit`. Default: true
    pub add_peaks: bool,

    /// Seed of the trial placement. Default: drawn from the OS
    pub seed: Option<u64>,

    /// Cap on add-peak steps; reaching it marks the result as truncated. Default: 200
    pub max_iterations: usize,

    /// Detector response on the caller's samples. Default: none
    pub transmission: Option<Array1<f64>>,

    /// Fit a separate exponent to each flank of every final peak. Default: false
    pub allow_asymmetry: bool,

    /// Solver settings of the final refinement.
    pub lm: LmConfig,
}

impl Default for SersOptions {
    fn default() -> Self {
        Self {
            peak_type: PeakShape::Lorentzian,
            max_fwhm: 40.0,
            regions: 50,
            min_width_factor: 0.1,
            default_width: None,
            initial_fit: Vec::new(),
            add_peaks: true,
            seed: None,
            max_iterations: 200,
            transmission: None,
            allow_asymmetry: false,
            lm: LmConfig::default(),
        }
    }
}

impl SersOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_peak_type(mut self, peak_type: PeakShape) -> Self {
        self.peak_type = peak_type;
        self
    }

    pub fn with_max_fwhm(mut self, max_fwhm: f64) -> Self {
        self.max_fwhm = max_fwhm;
        self
    }

    pub fn with_regions(mut self, regions: usize) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_min_width_factor(mut self, min_width_factor: f64) -> Self {
        self.min_width_factor = min_width_factor;
        self
    }

    pub fn with_default_width(mut self, width: f64) -> Self {
        self.default_width = Some(width);
        self
    }

    pub fn with_initial_fit(mut self, peaks: Vec<Peak>) -> Self {
        self.initial_fit = peaks;
        self
    }

    pub fn with_add_peaks(mut self, add_peaks: bool) -> Self {
        self.add_peaks = add_peaks;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_transmission(mut self, transmission: Array1<f64>) -> Self {
        self.transmission = Some(transmission);
        self
    }

    pub fn with_asymmetry(mut self, allow_asymmetry: bool) -> Self {
        self.allow_asymmetry = allow_asymmetry;
        self
    }
}

/// Result of an iterative SERS fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SersFit {
    pub shape: PeakShape,

    /// Constant offset under the peaks.
    pub constant: f64,

    /// Peaks in ascending centre order.
    pub peaks: Vec<Peak>,

    /// Flat `[c, C₁, W₁, H₁, …]` values, peaks in centre order.
    pub values: Array1<f64>,

    /// 1-σ errors in the layout of `values`.
    pub errors: Vec<Option<f64>>,

    /// `Σ |model − y|` of the returned model.
    pub loss: f64,

    /// Width given to trial peaks.
    pub default_width: f64,

    /// Add-peak steps taken.
    pub iterations: usize,

    /// The loop was stopped by its iteration cap or a cancellation.
    pub truncated: bool,

    /// Whether the final least-squares refinement converged and was accepted.
    pub refined: bool,

    /// The peaks with fitted flank exponents, in the order of `peaks`; empty
    /// unless asymmetry was requested.
    pub asymmetric: Vec<AsymmetricPeak>,
}

impl SersFit {
    pub fn n_peaks(&self) -> usize {
        self.peaks.len()
    }
}
