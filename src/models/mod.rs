//! Built-in model functions for spectra.
//!
//! Peak line shapes and their asymmetric variant, anchor-point polynomials for
//! smooth backgrounds, the thermal background and the sigmoid notch mask.

pub mod asymmetric;
pub mod peak;
pub mod polynomial;
pub mod step;
pub mod thermal;

pub use peak::{
    eval_peaks, flatten, sort_by_centre, sort_flat_by_centre, sum_model, unflatten, Peak, PeakModel,
    PeakShape,
};
pub use asymmetric::{AsymmetricPeak, AsymmetryModel};
pub use polynomial::AnchorPolynomial;
pub use step::{NotchMask, Sigmoid};
pub use thermal::{ThermalBackground, ThermalModel};
