//! # Peak finding
//!
//! Candidate peak locators: derivative zero crossings for smoothed spectra,
//! regional trial insertion for the iterative controllers, and a wavelet scan
//! that estimates the typical peak width.

pub mod derivative;
pub mod regional;
pub mod wavelet;

pub use derivative::{find_maxima, maxima_indices, Maximum};
pub use regional::{RegionalSearch, Trial};
pub use wavelet::estimate_fwhm;
