//! Utility functions and helpers for the specfit-rs library.

pub mod finite_difference;
pub mod linalg;
pub mod matrix_convert;
pub mod stats;

pub use stats::{median, percentile, rms};
