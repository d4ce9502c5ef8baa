//! # specfit-rs
//!
//! `specfit-rs` fits sums of Gaussian or Lorentzian peaks on top of a background
//! to one-dimensional spectra (Raman, SERS, dark-field scattering).
//!
//! The library provides:
//! - A bounded Levenberg-Marquardt solver with a soft-L1 loss, and `curve_fit`
//!   style helpers that report 1-σ errors
//! - Peak discovery by derivatives, wavelet width estimation and regional trial
//!   insertion
//! - Baseline removal: anchor polynomials, moving gradients, asymmetric least
//!   squares, fluorescence envelopes and thermal anti-Stokes backgrounds
//! - Complete fitting workflows:
//!   - [`fit_darkfield`]: a known number of peaks on a constant
//!   - [`fit_sparse`]: sparse, high signal-to-noise peaks on a constant, found
//!     without a peak count
//!   - [`fit_sers_iterative`]: peaks discovered one at a time
//!   - [`fit_stokes_antistokes`]: both sides of the laser line with a notch filter
//!   - [`fit_timeseries`]: a stack of spectra with fixed peak guesses
//!
//! ## Basic Usage
//!
//! ```
//! use ndarray::Array1;
//! use specfit_rs::{fit_darkfield, DarkfieldOptions, PeakShape};
//!
//! let x = Array1::linspace(0.0, 199.0, 200);
//! let y = x.mapv(|v| 0.5 + PeakShape::Gaussian.eval(v, 90.0, 12.0, 4.0));
//!
//! let fit = fit_darkfield(x.view(), y.view(), 1, &DarkfieldOptions::default())
//!     .unwrap()
//!     .expect("a peak is present");
//! assert!((fit.peaks()[0].centre - 90.0).abs() < 0.5);
//! ```

pub mod error;

pub mod parameters;

pub mod problem;

pub mod lm;

pub mod uncertainty;

pub mod utils;

pub mod model;

pub mod models;

pub mod signal;

pub mod spectrum;

pub mod peak_finding;

pub mod baseline;

pub mod arbiter;

pub mod cancel;

pub mod darkfield;

pub mod sers;

pub mod sparse;

pub mod stokes;

pub mod timeseries;

// Re-exports for convenience
pub use error::{Result, SpecFitError};

pub use lm::{LevenbergMarquardt, LmConfig};

pub use problem::Problem;

pub use model::{curve_fit, minimize_l1, ModelFunction};

pub use models::{Peak, PeakShape};

pub use spectrum::Spectrum;

pub use cancel::CancelToken;

pub use baseline::{
    remove_baseline, thermal_background, BaselineOutput, PolynomialBaselineOptions, ThermalOptions,
};

pub use darkfield::{fit_darkfield, DarkfieldFit, DarkfieldOptions};

pub use sers::{fit_sers_batch, fit_sers_iterative, SersFit, SersOptions};

pub use sparse::{fit_sparse, SparseFit, SparseOptions};

pub use stokes::{fit_stokes_antistokes, StokesFit, StokesOptions};

pub use timeseries::{fit_timeseries, reorder_peaks, TimeSeriesFit, TimeSeriesOptions};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
