//! # Time-series fitting
//!
//! A stack of spectra sharing one axis is fit spectrum by spectrum with a
//! constant plus a fixed set of peaks, starting from user-supplied centre guesses
//! and a shared width. The axis can be split into sections that are fit
//! independently, each with its own constant.
//!
//! Neighbouring peaks can trade places between spectra. [`reorder_peaks`]
//! restores continuous tracks by swapping peaks between indices.

mod fit;
mod reorder;

pub use fit::fit_timeseries;
pub use reorder::{reorder_by_centre, reorder_peaks};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lm::LmConfig;
use crate::models::{Peak, PeakShape};

/// Options of [`fit_timeseries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesOptions {
    /// Section boundaries on the axis, ascending. Section `k` covers
    /// `[sections[k], sections[k + 1]]`. Empty means one section spanning the axis.
    pub sections: Vec<f64>,

    /// Default: Lorentzian
    pub peak_type: PeakShape,

    /// Run [`reorder_peaks`] on the results. Default: false
    pub reorder: bool,

    pub lm: LmConfig,
}

impl Default for TimeSeriesOptions {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            peak_type: PeakShape::Lorentzian,
            reorder: false,
            lm: LmConfig::default(),
        }
    }
}

impl TimeSeriesOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_sections(mut self, boundaries: Vec<f64>) -> Self {
        self.sections = boundaries;
        self
    }

    pub fn with_peak_type(mut self, peak_type: PeakShape) -> Self {
        self.peak_type = peak_type;
        self
    }

    pub fn with_reorder(mut self, reorder: bool) -> Self {
        self.reorder = reorder;
        self
    }
}

/// A fitted peak with the 1-σ errors of its centre, width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakEstimate {
    pub peak: Peak,
    pub errors: [Option<f64>; 3],
}

/// Fit of one spectrum of the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesFit {
    /// Row of the spectrum in the input stack.
    pub index: usize,

    /// Constant of each fitted section; `None` where the section fit failed.
    pub constants: Vec<Option<f64>>,

    /// One entry per centre guess, in guess order until reordered; `None` where
    /// the fit of its section failed.
    pub peaks: Vec<Option<PeakEstimate>>,
}

impl TimeSeriesFit {
    /// Flat `[C₁, W₁, H₁, …]` values, `None` for failed peaks.
    pub fn values(&self) -> Vec<Option<f64>> {
        self.peaks
            .iter()
            .flat_map(|p| match p {
                Some(e) => [Some(e.peak.centre), Some(e.peak.width), Some(e.peak.height)],
                None => [None; 3],
            })
            .collect()
    }

    /// 1-σ errors in the layout of [`values`](Self::values).
    pub fn errors(&self) -> Vec<Option<f64>> {
        self.peaks
            .iter()
            .flat_map(|p| p.map_or([None; 3], |e| e.errors))
            .collect()
    }

    /// Whether every peak was fit.
    pub fn is_complete(&self) -> bool {
        self.peaks.iter().all(Option::is_some)
    }

    pub fn centres(&self) -> Vec<Option<f64>> {
        self.peaks.iter().map(|p| p.map(|e| e.peak.centre)).collect()
    }
}
