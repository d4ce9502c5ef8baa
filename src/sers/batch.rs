use log::info;
use ndarray::{Array1, ArrayView1, ArrayView2};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{fit_sers_iterative, SersFit, SersOptions};
use crate::error::{Result, SpecFitError};
use crate::utils::stats::median;

/// Sample-wise median of a stack of spectra, one spectrum per row.
pub fn median_spectrum(ys: ArrayView2<f64>) -> Array1<f64> {
    ys.columns().into_iter().map(median).collect()
}

/// Fit every row of `ys` on the shared axis `x`.
///
/// With `seed_from_median`, the median spectrum is fit first and its peaks seed
/// every other fit. Spectrum `i` uses the seed `options.seed + i`. Results are in
/// row order.
///
/// # Errors
///
/// `InputShape` when the rows do not match the axis, or the first structural error
/// of any fit.
pub fn fit_sers_batch(
    x: ArrayView1<f64>,
    ys: ArrayView2<f64>,
    options: &SersOptions,
    seed_from_median: bool,
) -> Result<Vec<SersFit>> {
    if ys.ncols() != x.len() {
        return Err(SpecFitError::InputShape(format!(
            "spectra have {} samples, axis has {}",
            ys.ncols(),
            x.len()
        )));
    }

    let mut options = options.clone();
    if seed_from_median && ys.nrows() > 0 {
        let median = median_spectrum(ys);
        let seed = fit_sers_iterative(x, median.view(), &options)?;
        info!("median spectrum seeds the batch with {} peaks", seed.peaks.len());
        options.initial_fit = seed.peaks;
    }

    let fit_one = |i: usize| -> Result<(usize, SersFit)> {
        let mut local = options.clone();
        local.seed = options.seed.map(|s| s.wrapping_add(i as u64));
        fit_sers_iterative(x, ys.row(i), &local).map(|fit| (i, fit))
    };

    #[cfg(feature = "parallel")]
    let fits: Result<Vec<(usize, SersFit)>> =
        (0..ys.nrows()).into_par_iter().map(fit_one).collect();
    #[cfg(not(feature = "parallel"))]
    let fits: Result<Vec<(usize, SersFit)>> = (0..ys.nrows()).map(fit_one).collect();

    let mut fits = fits?;
    fits.sort_by_key(|(i, _)| *i);
    Ok(fits.into_iter().map(|(_, fit)| fit).collect())
}
