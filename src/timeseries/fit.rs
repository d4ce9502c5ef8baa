use log::{debug, info, warn};
use ndarray::{s, Array1, ArrayView1, ArrayView2};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{reorder_peaks, PeakEstimate, TimeSeriesFit, TimeSeriesOptions};
use crate::error::{Result, SpecFitError};
use crate::model::curve_fit;
use crate::models::{Peak, PeakModel};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::spectrum::Spectrum;
use crate::utils::stats::min_max;

/// A range of samples fit on its own, with the guesses that fall inside it.
#[derive(Debug, Clone)]
struct Section {
    start: usize,
    end: usize,
    guesses: Vec<usize>,
}

/// Split the ascending axis into sections and assign each guess to the section
/// containing it. Sections without guesses are dropped.
fn plan_sections(x: &Array1<f64>, centres: &[f64], boundaries: &[f64]) -> Result<Vec<Section>> {
    let n = x.len();
    let ranges: Vec<(f64, f64)> = if boundaries.len() < 2 {
        vec![(x[0], x[n - 1])]
    } else {
        if boundaries.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpecFitError::InvalidInput(format!(
                "section boundaries must be ascending, got {:?}",
                boundaries
            )));
        }
        boundaries.windows(2).map(|w| (w[0], w[1])).collect()
    };

    let mut sections: Vec<Section> = ranges
        .iter()
        .map(|&(lo, hi)| {
            let start = x.iter().position(|&v| v >= lo).unwrap_or(n);
            let end = x.iter().rposition(|&v| v <= hi).map_or(start, |i| i + 1);
            Section {
                start,
                end: end.max(start),
                guesses: Vec::new(),
            }
        })
        .collect();

    for (g, &c) in centres.iter().enumerate() {
        let Some(k) = ranges.iter().position(|&(lo, hi)| c >= lo && c <= hi) else {
            return Err(SpecFitError::InvalidInput(format!(
                "centre guess {} lies outside every section",
                c
            )));
        };
        sections[k].guesses.push(g);
    }

    let before = sections.len();
    sections.retain(|s| !s.guesses.is_empty());
    if sections.len() < before {
        debug!("skipping {} sections without peaks", before - sections.len());
    }
    Ok(sections)
}

/// Height guess: the spread of `y` within half a width of the centre.
fn height_guess(x: ArrayView1<f64>, y: ArrayView1<f64>, centre: f64, width: f64) -> f64 {
    let (lo, hi) = (centre - 0.5 * width, centre + 0.5 * width);
    let window: Vec<f64> = x
        .iter()
        .zip(y.iter())
        .filter(|(&v, _)| v >= lo && v <= hi)
        .map(|(_, &w)| w)
        .collect();
    if window.is_empty() {
        return 0.0;
    }
    let (min, max) = min_max(ArrayView1::from(&window[..]));
    max - min
}

/// Fit one spectrum section by section.
fn fit_spectrum(
    index: usize,
    spectrum: &Spectrum,
    sections: &[Section],
    centres: &[f64],
    width: f64,
    options: &TimeSeriesOptions,
) -> Result<TimeSeriesFit> {
    let (x, y) = (spectrum.x(), spectrum.y());
    let mut peaks = vec![None; centres.len()];
    let mut constants = Vec::with_capacity(sections.len());

    for section in sections {
        let xs = x.slice(s![section.start..section.end]).to_owned();
        let ys = y.slice(s![section.start..section.end]).to_owned();
        let k = section.guesses.len();
        if xs.len() < 1 + 3 * k {
            warn!(
                "spectrum {}: section with {} samples cannot hold {} peaks",
                index,
                xs.len(),
                k
            );
            constants.push(None);
            continue;
        }

        let (lo, hi) = (xs[0], xs[xs.len() - 1]);
        let mut initial = vec![min_max(ys.view()).0];
        let mut bounds = ParameterBounds::unbounded(1);
        for &g in &section.guesses {
            let c = centres[g];
            initial.extend_from_slice(&[c, width, height_guess(xs.view(), ys.view(), c, width)]);
            bounds.push(Bounds::new(lo, hi)?);
            bounds.push(Bounds::min_only(0.0));
            bounds.push(Bounds::min_only(0.0));
        }

        let model = PeakModel::new(options.peak_type, k);
        let fit = curve_fit(&model, &xs, &ys, &Array1::from_vec(initial), &bounds, &options.lm)?;
        if !fit.success {
            warn!("spectrum {}: section [{:.3}, {:.3}] did not converge", index, lo, hi);
            constants.push(None);
            continue;
        }

        constants.push(Some(fit.values[0]));
        for (j, &g) in section.guesses.iter().enumerate() {
            let at = 1 + 3 * j;
            peaks[g] = Some(PeakEstimate {
                peak: Peak::new(fit.values[at], fit.values[at + 1], fit.values[at + 2]),
                errors: [fit.errors[at], fit.errors[at + 1], fit.errors[at + 2]],
            });
        }
    }

    Ok(TimeSeriesFit {
        index,
        constants,
        peaks,
    })
}

/// Fit every row of `ys` with a constant plus one peak per entry of `centres`,
/// all starting at `width`.
///
/// Results are in row order. With `options.reorder` the peak tracks are
/// untangled by [`reorder_peaks`] afterwards.
///
/// # Errors
///
/// `InputShape` when the rows do not match the axis; `InvalidInput` for
/// non-ascending section boundaries or a guess outside every section.
pub fn fit_timeseries(
    x: ArrayView1<f64>,
    ys: ArrayView2<f64>,
    centres: &[f64],
    width: f64,
    options: &TimeSeriesOptions,
) -> Result<Vec<TimeSeriesFit>> {
    if ys.ncols() != x.len() {
        return Err(SpecFitError::InputShape(format!(
            "spectra have {} samples, axis has {}",
            ys.ncols(),
            x.len()
        )));
    }
    if width.is_nan() || width <= 0.0 {
        return Err(SpecFitError::InvalidInput(format!(
            "width guess must be positive, got {}",
            width
        )));
    }

    let spectra: Vec<Spectrum> = ys
        .rows()
        .into_iter()
        .map(|row| Spectrum::new(x, row))
        .collect::<Result<_>>()?;
    let Some(first) = spectra.first() else {
        return Ok(Vec::new());
    };
    let sections = plan_sections(first.x(), centres, &options.sections)?;

    let fit_one =
        |i: usize| fit_spectrum(i, &spectra[i], &sections, centres, width, options);

    #[cfg(feature = "parallel")]
    let fits: Result<Vec<TimeSeriesFit>> = (0..spectra.len()).into_par_iter().map(fit_one).collect();
    #[cfg(not(feature = "parallel"))]
    let fits: Result<Vec<TimeSeriesFit>> = (0..spectra.len()).map(fit_one).collect();

    let mut fits = fits?;
    fits.sort_by_key(|f| f.index);
    if options.reorder {
        reorder_peaks(&mut fits);
    }
    info!(
        "time series: {} spectra, {} of them fully fit",
        fits.len(),
        fits.iter().filter(|f| f.is_complete()).count()
    );
    Ok(fits)
}
