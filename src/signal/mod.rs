//! # Signal utilities
//!
//! Smoothing, differentiation, integration and interpolation on sampled spectra.

pub mod calculus;
pub mod interpolate;
pub mod smoothing;

pub use calculus::{central_gradient, index_gradient, trapezoid};
pub use interpolate::{interp, uniform_grid, CubicSpline};
pub use smoothing::{gaussian_filter1d, gaussian_filter_x};
