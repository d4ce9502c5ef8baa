//! End-to-end fits of synthetic spectra with known answers.

mod baseline;
mod darkfield;
mod sers;
mod sparse;
mod stokes;
mod timeseries;
