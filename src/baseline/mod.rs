//! # Background estimation
//!
//! Estimators for the slowly varying background under a spectrum:
//!
//! - [`remove_baseline`]: iterative anchor-point polynomial fitted by L1 over the
//!   samples not suspected to be peaks
//! - [`moving_gradient_baseline`]: median chord gradients, for sparse peaks on
//!   curved, noisy backgrounds
//! - [`als_baseline`]: asymmetric least-squares smoothing
//! - [`fluorescence_background`]: minima envelope followed by ALS, for broad
//!   fluorescence under Raman spectra
//! - [`thermal_background`]: Bose-Einstein occupation behind the detector
//!   transmission, for anti-Stokes spectra

pub mod als;
pub mod fluorescence;
pub mod moving_gradient;
pub mod polynomial;
pub mod thermal;

pub use als::{als_baseline, AlsOptions};
pub use fluorescence::{find_minima, fluorescence_background, FluorescenceOptions};
pub use moving_gradient::{moving_gradient_baseline, MovingGradientFit, MovingGradientOptions};
pub use polynomial::{remove_baseline, BaselineFit, BaselineOutput, PolynomialBaselineOptions};
pub use thermal::{thermal_background, ThermalFit, ThermalOptions};
