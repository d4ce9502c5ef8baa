use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::background::{initial_background, notch_edge, StokesBackground};
use super::{PeakTable, StokesFit, StokesOptions};
use crate::cancel::{cancelled, CancelToken};
use crate::error::Result;
use crate::model::{l1_loss, minimize_l1, ModelFunction, VaryingSubset};
use crate::models::{Peak, PeakShape};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::peak_finding::RegionalSearch;
use crate::signal::calculus::trapezoid;
use crate::signal::smoothing::gaussian_filter1d;
use crate::spectrum::Spectrum;
use crate::utils::stats::rms;

/// Relative loss decrease an added peak must achieve.
const LOSS_TOLERANCE: f64 = 1e-6;

/// Background and notch-attenuated peaks, flattened as the background
/// parameters followed by `[C, W, H]` per peak.
struct FullModel<'a> {
    template: &'a StokesBackground,
    shape: PeakShape,
    n_peaks: usize,
}

impl FullModel<'_> {
    fn params(background: &StokesBackground, peaks: &[Peak]) -> Array1<f64> {
        let mut p = background.to_params().to_vec();
        for peak in peaks {
            p.extend_from_slice(&[peak.centre, peak.width, peak.height]);
        }
        Array1::from_vec(p)
    }

    fn split(&self, params: &Array1<f64>) -> (StokesBackground, Vec<Peak>) {
        let values = params.to_vec();
        let nb = self.template.parameter_count();
        let background = self.template.with_params(&values[..nb]);
        let peaks = values[nb..]
            .chunks_exact(3)
            .map(|p| Peak::new(p[0], p[1], p[2]))
            .collect();
        (background, peaks)
    }
}

impl ModelFunction for FullModel<'_> {
    fn parameter_count(&self) -> usize {
        self.template.parameter_count() + 3 * self.n_peaks
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        let (background, peaks) = self.split(params);
        Ok(background.eval_with_peaks(self.shape, x.view(), &peaks))
    }
}

/// Peaks multiplied by a fixed notch transmission.
struct MaskedPeaks<'a> {
    shape: PeakShape,
    mask: &'a Array1<f64>,
    n_peaks: usize,
}

impl ModelFunction for MaskedPeaks<'_> {
    fn parameter_count(&self) -> usize {
        3 * self.n_peaks
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(x.len());
        for k in 0..self.n_peaks {
            let (c, w, h) = (params[3 * k], params[3 * k + 1], params[3 * k + 2]);
            out.zip_mut_with(x, |o, &v| *o += self.shape.eval(v, c, w, h));
        }
        Ok(out * self.mask)
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = Array2::zeros((x.len(), self.parameter_count()));
        for k in 0..self.n_peaks {
            let (c, w, h) = (params[3 * k], params[3 * k + 1], params[3 * k + 2]);
            for (i, &v) in x.iter().enumerate() {
                let (dc, dw, dh) = self.shape.partials(v, c, w, h);
                let m = self.mask[i];
                jac[[i, 3 * k]] = m * dc;
                jac[[i, 3 * k + 1]] = m * dw;
                jac[[i, 3 * k + 2]] = m * dh;
            }
        }
        Some(jac)
    }
}

fn flatten_peaks(peaks: &[Peak]) -> Array1<f64> {
    peaks
        .iter()
        .flat_map(|p| [p.centre, p.width, p.height])
        .collect()
}

fn unflatten_peaks(params: &Array1<f64>) -> Vec<Peak> {
    params
        .to_vec()
        .chunks_exact(3)
        .map(|p| Peak::new(p[0], p[1], p[2]))
        .collect()
}

/// Samples at the centre of a run of `window` consecutive `true` values.
///
/// The `(window − 1) / 2` samples at each end are never marked.
pub(crate) fn centred_runs(above: &[bool], window: usize) -> Vec<bool> {
    let n = above.len();
    let skip = window / 2;
    let mut out = vec![false; n];
    if n < window {
        return out;
    }
    for i in skip..n - skip {
        out[i] = above[i - skip..=i + skip].iter().all(|&a| a);
    }
    out
}

/// Shared inputs of one Stokes/anti-Stokes fit.
struct Coordinator<'a> {
    x: &'a Array1<f64>,
    y: &'a Array1<f64>,
    shape: PeakShape,
    options: &'a StokesOptions,
    span: (f64, f64),
}

impl Coordinator<'_> {
    fn peak_bounds(&self, n_peaks: usize) -> Result<ParameterBounds> {
        let mut bounds = ParameterBounds::default();
        for _ in 0..n_peaks {
            bounds.push(Bounds::new(self.span.0, self.span.1)?);
            bounds.push(Bounds::new(self.options.min_peak_width, self.options.max_peak_width)?);
            bounds.push(Bounds::min_only(0.0));
        }
        Ok(bounds)
    }

    fn clamp_width(&self, peak: Peak) -> Peak {
        let w = peak
            .width
            .clamp(self.options.min_peak_width, self.options.max_peak_width);
        Peak::new(peak.centre, w, peak.height.max(0.0))
    }

    /// L1 fit of the background parameters in `free`, the rest held fixed.
    fn fit_background_subset(
        &self,
        background: &StokesBackground,
        free: Vec<usize>,
        bounds: ParameterBounds,
        weights: Option<&Array1<f64>>,
    ) -> Result<StokesBackground> {
        let model = FullModel {
            template: background,
            shape: self.shape,
            n_peaks: 0,
        };
        let subset = VaryingSubset::new(&model, background.to_params(), free)?;
        let fit = minimize_l1(&subset, self.x, self.y, &subset.initial(), &bounds, weights)?;
        if !fit.success {
            warn!("background fit stopped before convergence, loss {:.6e}", fit.loss);
        }
        Ok(background.with_params(&subset.expand(&fit.params).to_vec()))
    }

    /// Peak-suspected samples of a residual and the noise level they were judged
    /// against (the RMS of the negative residuals).
    fn peak_suspects(&self, residual: &Array1<f64>) -> (Vec<bool>, f64) {
        let noise = rms(residual.iter().copied().filter(|&r| r < 0.0));
        let above: Vec<bool> = residual.iter().map(|&r| r >= noise).collect();
        (centred_runs(&above, self.options.threshold_window()), noise)
    }

    /// Fit every background parameter with peak-suspected samples excluded,
    /// re-deriving the exclusion mask until it stops changing.
    fn fit_background(&self, mut background: StokesBackground) -> Result<StokesBackground> {
        let n = self.x.len();
        let all = (0..background.parameter_count()).collect::<Vec<_>>();
        let mut excluded = vec![false; n];
        for iteration in 0..self.options.max_background_iterations {
            let weights: Array1<f64> = excluded.iter().map(|&e| if e { 0.0 } else { 1.0 }).collect();
            background = self.fit_background_subset(
                &background,
                all.clone(),
                ParameterBounds::unbounded(all.len()),
                Some(&weights),
            )?;

            let residual = self.y - &background.eval(self.x.view());
            let (suspects, noise) = self.peak_suspects(&residual);
            debug!(
                "background pass {}: {} peak-suspected samples, noise {:.4e}",
                iteration + 1,
                suspects.iter().filter(|&&s| s).count(),
                noise
            );
            if suspects == excluded {
                return Ok(background);
            }
            excluded = suspects;
        }
        warn!(
            "background mask still changing after {} passes",
            self.options.max_background_iterations
        );
        Ok(background)
    }

    fn peaks_model<'m>(&self, mask: &'m Array1<f64>, n_peaks: usize) -> MaskedPeaks<'m> {
        MaskedPeaks {
            shape: self.shape,
            mask,
            n_peaks,
        }
    }

    fn peaks_loss(&self, peaks: &[Peak], mask: &Array1<f64>, target: &Array1<f64>) -> Result<f64> {
        let model = self.peaks_model(mask, peaks.len());
        Ok(l1_loss(&model.eval(self.x, &flatten_peaks(peaks))?, target, None))
    }

    /// L1 fit of the peaks alone against a background-subtracted target.
    fn fit_peaks(&self, peaks: &[Peak], mask: &Array1<f64>, target: &Array1<f64>) -> Result<Vec<Peak>> {
        if peaks.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.peaks_model(mask, peaks.len());
        let bounds = self.peak_bounds(peaks.len())?;
        let fit = minimize_l1(&model, self.x, target, &flatten_peaks(peaks), &bounds, None)?;
        if !fit.success {
            trace!("peak refinement stopped before convergence");
        }
        Ok(unflatten_peaks(&fit.params))
    }

    /// Add peaks to the background-subtracted spectrum until no run of
    /// peak-suspected samples remains or the region count exceeds the sample count.
    ///
    /// Returns the peaks and whether the step cap or a cancellation stopped the loop.
    fn add_peaks(
        &self,
        background: &StokesBackground,
        mut peaks: Vec<Peak>,
        rng: &mut StdRng,
        cancel: Option<&CancelToken>,
    ) -> Result<(Vec<Peak>, bool)> {
        let n = self.x.len();
        let target = self.y - &background.eval(self.x.view());
        let mask = background.notch.eval_many(self.x.view());
        let mut loss = self.peaks_loss(&peaks, &mask, &target)?;
        let mut regions = self.options.regions.clamp(1, n);
        let mut steps = 0;

        while regions <= n {
            if cancelled(cancel) || steps >= self.options.max_add_steps {
                warn!("add-peak loop stopped after {} steps with {} peaks", steps, peaks.len());
                return Ok((peaks, true));
            }

            let current = self.peaks_model(&mask, peaks.len()).eval(self.x, &flatten_peaks(&peaks))?;
            let (suspects, noise) = self.peak_suspects(&(&target - &current));
            if !suspects.iter().any(|&s| s) {
                debug!("no peak-suspected samples left");
                break;
            }
            steps += 1;

            let search = RegionalSearch {
                shape: self.shape,
                x: self.x,
                y: &target,
                current: &current,
                default_width: self.options.default_peak_width,
                max_width: self.options.max_peak_width,
                envelope: Some(&mask),
                weights: None,
            };
            let trial = search
                .insert(regions, rng)?
                .filter(|t| t.peak.height > 0.0 && t.peak.width > 0.0);
            let Some(trial) = trial else {
                regions *= 5;
                debug!("no usable trial peak, regions -> {}", regions);
                continue;
            };

            let mut candidate = peaks.clone();
            candidate.push(self.clamp_width(trial.peak));
            let mut candidate = self.fit_peaks(&candidate, &mask, &target)?;
            let before = candidate.len();
            candidate.retain(|p| p.height >= noise);
            if candidate.len() < before {
                debug!("pruned {} peaks below the noise level", before - candidate.len());
            }
            let new_loss = self.peaks_loss(&candidate, &mask, &target)?;

            if candidate.len() > peaks.len() && new_loss < loss * (1.0 - LOSS_TOLERANCE) {
                debug!(
                    "step {}: peak at {:.3} from region {}, {} peaks, loss {:.6e}",
                    steps,
                    trial.peak.centre,
                    trial.region,
                    candidate.len(),
                    new_loss
                );
                peaks = candidate;
                loss = new_loss;
            } else {
                regions *= 5;
                debug!("step {} did not improve the fit, regions -> {}", steps, regions);
            }
        }
        Ok((peaks, false))
    }

    fn full_loss(&self, background: &StokesBackground, peaks: &[Peak]) -> f64 {
        l1_loss(
            &background.eval_with_peaks(self.shape, self.x.view(), peaks),
            self.y,
            None,
        )
    }

    /// Joint L1 fit of background and peaks. A result worse than the start is
    /// discarded.
    fn optimise_jointly(
        &self,
        background: StokesBackground,
        peaks: Vec<Peak>,
    ) -> Result<(StokesBackground, Vec<Peak>)> {
        let model = FullModel {
            template: &background,
            shape: self.shape,
            n_peaks: peaks.len(),
        };
        let mut bounds = ParameterBounds::unbounded(background.parameter_count());
        bounds.extend(&self.peak_bounds(peaks.len())?);
        let initial = FullModel::params(&background, &peaks);
        let fit = minimize_l1(&model, self.x, self.y, &initial, &bounds, None)?;

        let before = self.full_loss(&background, &peaks);
        if fit.loss > before {
            warn!(
                "joint fit worsened the loss ({:.6e} > {:.6e}), keeping the previous model",
                fit.loss, before
            );
            return Ok((background, peaks));
        }
        trace!("joint fit with {} peaks, loss {:.6e}", peaks.len(), fit.loss);
        Ok(model.split(&fit.params))
    }

    /// Drop peaks whose removal, after refitting the rest, lowers the loss.
    fn remove_redundant(
        &self,
        mut background: StokesBackground,
        mut peaks: Vec<Peak>,
    ) -> Result<(StokesBackground, Vec<Peak>)> {
        while !peaks.is_empty() {
            let target = self.y - &background.eval(self.x.view());
            let mask = background.notch.eval_many(self.x.view());
            let current = self.peaks_loss(&peaks, &mask, &target)?;

            let mut best: Option<(f64, Vec<Peak>)> = None;
            for i in 0..peaks.len() {
                let mut without = peaks.clone();
                without.remove(i);
                let refit = self.fit_peaks(&without, &mask, &target)?;
                let loss = self.peaks_loss(&refit, &mask, &target)?;
                if best.as_ref().map_or(true, |(b, _)| loss < *b) {
                    best = Some((loss, refit));
                }
            }

            match best {
                Some((loss, refit)) if loss < current => {
                    debug!("removed a redundant peak, {} remain", refit.len());
                    (background, peaks) = self.optimise_jointly(background, refit)?;
                }
                _ => break,
            }
        }
        Ok((background, peaks))
    }

    /// Keep only peaks that lose less than the allowed fraction of their area
    /// to the notch.
    fn reject_notch_spoofs(&self, background: &StokesBackground, peaks: Vec<Peak>) -> Vec<Peak> {
        let mask = background.notch.eval_many(self.x.view());
        let before = peaks.len();
        let kept: Vec<Peak> = peaks
            .into_iter()
            .filter(|p| {
                let profile = p.eval(self.shape, self.x.view());
                let total = trapezoid(self.x.view(), profile.view());
                if total <= 0.0 {
                    return false;
                }
                let passed = trapezoid(self.x.view(), (&profile * &mask).view());
                1.0 - passed / total < self.options.allowed_peak_fraction_in_notch
            })
            .collect();
        if kept.len() < before {
            debug!("rejected {} peaks inside the notch", before - kept.len());
        }
        kept
    }
}

/// Fit a Raman spectrum spanning both sides of the laser line.
///
/// `shift` is the Raman shift axis; it must extend to both signs.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum and `InvalidInput` for an axis that does
/// not cross zero shift. Solver non-convergence is absorbed.
pub fn fit_stokes_antistokes(
    shift: ArrayView1<f64>,
    y: ArrayView1<f64>,
    options: &StokesOptions,
) -> Result<StokesFit> {
    fit_stokes_antistokes_with_cancel(shift, y, options, None)
}

/// [`fit_stokes_antistokes`] that stops early when `cancel` is set, returning the
/// current model with `truncated = true`.
pub fn fit_stokes_antistokes_with_cancel(
    shift: ArrayView1<f64>,
    y: ArrayView1<f64>,
    options: &StokesOptions,
    cancel: Option<&CancelToken>,
) -> Result<StokesFit> {
    let spectrum = Spectrum::new(shift, y)?;
    let (x, y) = (spectrum.x(), spectrum.y());

    let edge = notch_edge(x.view(), y.view(), options.smoothing)?;
    let smooth = gaussian_filter1d(y.view(), options.noise_smoothing);
    let background = initial_background(
        x.view(),
        smooth.view(),
        edge,
        (options.poly_order_anti_stokes, options.poly_order_stokes),
    )?;

    let coordinator = Coordinator {
        x,
        y,
        shape: options.peak_type,
        options,
        span: spectrum.span(),
    };

    let notch_free = background.notch_indices();
    let background = coordinator.fit_background_subset(
        &background,
        notch_free.clone(),
        ParameterBounds::unbounded(notch_free.len()),
        None,
    )?;
    let leak_bounds = ParameterBounds::from_vec(vec![
        Bounds::unbounded(),
        Bounds::min_only(0.0),
        Bounds::unbounded(),
    ]);
    let mut background =
        coordinator.fit_background_subset(&background, background.leak_indices(), leak_bounds, None)?;
    background = coordinator.fit_background(background)?;
    debug!(
        "background: notch edges {:.3} / {:.3}, leak height {:.4}",
        background.notch.anti_stokes.centre, background.notch.stokes.centre, background.leak.height
    );

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut peaks = Vec::new();
    let mut truncated = false;
    for cycle in 0..options.iterations {
        if cancelled(cancel) {
            truncated = true;
            break;
        }
        let (added, stopped) = coordinator.add_peaks(&background, peaks, &mut rng, cancel)?;
        truncated |= stopped;
        debug!("cycle {}: {} peaks after the add-peak loop", cycle + 1, added.len());

        let (bg, joint) = coordinator.optimise_jointly(background, added)?;
        let (bg, kept) = coordinator.remove_redundant(bg, joint)?;
        peaks = coordinator.reject_notch_spoofs(&bg, kept);
        background = bg;
        if stopped {
            break;
        }
    }

    let bg_only = background.eval(x.view());
    let full = background.eval_with_peaks(options.peak_type, x.view(), &peaks);
    let peaks_only = &full - &bg_only;
    let background_removed = y - &bg_only;

    info!(
        "Stokes/anti-Stokes fit: notch ±{:.2}, {} peaks{}",
        edge,
        peaks.len(),
        if truncated { " (truncated)" } else { "" }
    );

    Ok(StokesFit {
        full_fit: spectrum.restore_order(full),
        background_removed: spectrum.restore_order(background_removed),
        peaks_only: spectrum.restore_order(peaks_only),
        peaks: PeakTable::from_peaks(&peaks),
        background,
        notch_edge: edge,
        truncated,
    })
}
