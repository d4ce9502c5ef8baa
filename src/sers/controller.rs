use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{SersFit, SersOptions};
use crate::arbiter::{prune_zero_heights, Arbiter, Rejection};
use crate::cancel::{cancelled, CancelToken};
use crate::error::{Result, SpecFitError};
use crate::lm::LmConfig;
use crate::model::{curve_fit, l1_loss, minimize_l1, ModelFunction, Transmitted};
use crate::models::{
    flatten, sort_by_centre, sort_flat_by_centre, unflatten, AsymmetricPeak, AsymmetryModel, Peak,
    PeakModel, PeakShape,
};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::peak_finding::{estimate_fwhm, RegionalSearch};
use crate::spectrum::Spectrum;
use crate::utils::stats::min_max;

/// Relative loss decrease a step must achieve to count as an improvement.
const LOSS_TOLERANCE: f64 = 1e-6;

/// Matched peaks moving less than this fraction of their FWHM count as settled.
const SETTLED_FRACTION: f64 = 0.25;

/// Asymmetric widths stay within this factor of the symmetric width.
const ASYMMETRY_WIDTH_FACTOR: f64 = 5.0;

/// Range of the flank exponents.
const EXPONENT_RANGE: (f64, f64) = (0.8, 1.2);

/// Constant plus peaks, in the order the peaks were added.
#[derive(Debug, Clone)]
struct PeakSet {
    constant: f64,
    peaks: Vec<Peak>,
}

impl PeakSet {
    fn params(&self) -> Array1<f64> {
        flatten(self.constant, &self.peaks)
    }

    fn from_params(params: &Array1<f64>) -> Self {
        let (constant, peaks) = unflatten(&params.to_vec());
        Self { constant, peaks }
    }
}

/// Heights of peaks whose centres and widths are held fixed, plus a constant.
struct HeightModel {
    shape: PeakShape,
    fixed: Vec<(f64, f64)>,
}

impl ModelFunction for HeightModel {
    fn parameter_count(&self) -> usize {
        1 + self.fixed.len()
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut out = Array1::from_elem(x.len(), params[0]);
        for (k, &(c, w)) in self.fixed.iter().enumerate() {
            let h = params[1 + k];
            out.zip_mut_with(x, |o, &v| *o += self.shape.eval(v, c, w, h));
        }
        Ok(out)
    }

    fn jacobian(&self, x: &Array1<f64>, _params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = Array2::zeros((x.len(), self.parameter_count()));
        jac.column_mut(0).fill(1.0);
        for (k, &(c, w)) in self.fixed.iter().enumerate() {
            for (i, &v) in x.iter().enumerate() {
                jac[[i, 1 + k]] = self.shape.eval(v, c, w, 1.0);
            }
        }
        Some(jac)
    }
}

struct Refiner<'a> {
    shape: PeakShape,
    x: &'a Array1<f64>,
    y: &'a Array1<f64>,
    transmission: Option<&'a Array1<f64>>,
    span: (f64, f64),
    min_width: f64,
    max_width: f64,
}

impl Refiner<'_> {
    fn bounds(&self, n_peaks: usize, min_width: f64) -> Result<ParameterBounds> {
        let mut bounds = ParameterBounds::unbounded(1);
        for _ in 0..n_peaks {
            bounds.push(Bounds::new(self.span.0, self.span.1)?);
            bounds.push(Bounds::new(min_width, self.max_width)?);
            bounds.push(Bounds::min_only(0.0));
        }
        Ok(bounds)
    }

    fn model(&self, set: &PeakSet) -> Result<Array1<f64>> {
        let model = PeakModel::new(self.shape, set.peaks.len());
        Transmitted::new(&model, self.transmission).eval(self.x, &set.params())
    }

    fn loss(&self, set: &PeakSet) -> Result<f64> {
        Ok(l1_loss(&self.model(set)?, self.y, None))
    }

    /// Re-optimise every parameter under the L1 loss, then prune.
    fn refine(&self, set: PeakSet) -> Result<PeakSet> {
        let model = PeakModel::new(self.shape, set.peaks.len());
        let model = Transmitted::new(&model, self.transmission);
        let bounds = self.bounds(set.peaks.len(), 0.0)?;
        let fit = minimize_l1(&model, self.x, self.y, &set.params(), &bounds, None)?;
        if !fit.success {
            trace!("L1 refinement stopped before convergence");
        }
        let mut refined = PeakSet::from_params(&fit.params);
        let before = refined.peaks.len();
        refined
            .peaks
            .retain(|p| p.height > 0.0 && p.width >= self.min_width);
        if refined.peaks.len() < before {
            debug!("pruned {} peaks", before - refined.peaks.len());
        }
        Ok(refined)
    }

    /// Optimise the heights of a caller-supplied peak list, then everything.
    fn seed(&self, set: PeakSet) -> Result<PeakSet> {
        let model = HeightModel {
            shape: self.shape,
            fixed: set.peaks.iter().map(|p| (p.centre, p.width)).collect(),
        };
        let mut initial = vec![set.constant];
        initial.extend(set.peaks.iter().map(|p| p.height.max(0.0)));
        let mut bounds = ParameterBounds::unbounded(1);
        for _ in &set.peaks {
            bounds.push(Bounds::min_only(0.0));
        }
        let initial = Array1::from_vec(initial);
        let model = Transmitted::new(&model, self.transmission);
        let fit = minimize_l1(&model, self.x, self.y, &initial, &bounds, None)?;

        let peaks = set
            .peaks
            .iter()
            .zip(fit.params.iter().skip(1))
            .map(|(p, &h)| Peak::new(p.centre, p.width, h))
            .collect();
        self.refine(PeakSet {
            constant: fit.params[0],
            peaks,
        })
    }

    /// Least-squares refinement with errors.
    ///
    /// Zero-height peaks are pruned and the fit repeated; non-convergence or any
    /// other rejection drops the most recently added peak.
    fn finalise(
        &self,
        mut set: PeakSet,
        arbiter: &Arbiter,
        config: &LmConfig,
    ) -> Result<Finalised> {
        loop {
            let model = PeakModel::new(self.shape, set.peaks.len());
            let model = Transmitted::new(&model, self.transmission);
            let bounds = self.bounds(set.peaks.len(), self.min_width)?;
            let fit = curve_fit(&model, self.x, self.y, &set.params(), &bounds, config)?;
            let (values, errors) = sort_flat_by_centre(&fit.values, &fit.errors);

            if fit.success {
                match arbiter.check(&values.to_vec(), &errors) {
                    Ok(()) => {
                        return Ok(Finalised {
                            set: PeakSet::from_params(&values),
                            values,
                            errors,
                            refined: true,
                        })
                    }
                    Err(Rejection::NonPositiveHeight { .. }) => {
                        let mut fitted = PeakSet::from_params(&fit.values);
                        let pruned = prune_zero_heights(&mut fitted.peaks);
                        debug!("final refinement pruned {} zero-height peaks", pruned);
                        set = fitted;
                        continue;
                    }
                    Err(rejection) => warn!("final refinement rejected: {}", rejection),
                }
            } else {
                warn!("final refinement with {} peaks did not converge", set.peaks.len());
            }

            if set.peaks.pop().is_none() {
                let (values, _) = sort_flat_by_centre(&set.params(), &[]);
                let errors = vec![None; values.len()];
                return Ok(Finalised {
                    set,
                    values,
                    errors,
                    refined: false,
                });
            }
            debug!("retrying the final refinement with {} peaks", set.peaks.len());
        }
    }
}

/// Fit a separate exponent to each flank of every peak against the
/// background-free `signal`, centres and heights held.
fn asymmetrise(
    shape: PeakShape,
    x: &Array1<f64>,
    signal: &Array1<f64>,
    peaks: &[Peak],
    config: &LmConfig,
) -> Result<Vec<AsymmetricPeak>> {
    let model = AsymmetryModel::new(shape, peaks)?;
    let mut bounds = ParameterBounds::from_vec(Vec::with_capacity(3 * peaks.len()));
    for p in peaks {
        bounds.push(Bounds::new(p.width / ASYMMETRY_WIDTH_FACTOR, p.width * ASYMMETRY_WIDTH_FACTOR)?);
        bounds.push(Bounds::new(EXPONENT_RANGE.0, EXPONENT_RANGE.1)?);
        bounds.push(Bounds::new(EXPONENT_RANGE.0, EXPONENT_RANGE.1)?);
    }
    let fit = curve_fit(&model, x, signal, &AsymmetryModel::initial(peaks), &bounds, config)?;
    if !fit.success {
        warn!("asymmetric refinement of {} peaks did not converge", peaks.len());
    }
    Ok(model.peaks(&fit.values))
}

struct Finalised {
    set: PeakSet,
    values: Array1<f64>,
    errors: Vec<Option<f64>>,
    refined: bool,
}

/// Whether the peak count is unchanged and no peak, matched in centre order,
/// moved by more than a quarter of its FWHM.
fn settled(shape: PeakShape, old: &[Peak], new: &[Peak]) -> bool {
    if old.len() != new.len() {
        return false;
    }
    let mut old = old.to_vec();
    let mut new = new.to_vec();
    sort_by_centre(&mut old);
    sort_by_centre(&mut new);
    old.iter()
        .zip(new.iter())
        .all(|(a, b)| (a.centre - b.centre).abs() <= SETTLED_FRACTION * shape.fwhm_from_width(a.width))
}

/// Fit a SERS spectrum by iterative peak addition.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum; invalid options surface as `Bounds` or
/// `InvalidInput`. Solver non-convergence is absorbed.
pub fn fit_sers_iterative(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    options: &SersOptions,
) -> Result<SersFit> {
    fit_sers_iterative_with_cancel(x, y, options, None)
}

/// [`fit_sers_iterative`] that stops early when `cancel` is set, returning the
/// best peak set so far with `truncated = true`.
pub fn fit_sers_iterative_with_cancel(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    options: &SersOptions,
    cancel: Option<&CancelToken>,
) -> Result<SersFit> {
    let spectrum = Spectrum::new(x, y)?;
    let (x, y) = (spectrum.x(), spectrum.y());
    let n = spectrum.len();
    let shape = options.peak_type;
    let transmission = options
        .transmission
        .as_ref()
        .map(|t| spectrum.ascending(t.view()))
        .transpose()?;
    if let Some(t) = &transmission {
        if t.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(SpecFitError::InvalidInput(
                "transmission must be positive and finite".to_string(),
            ));
        }
    }

    let fwhm = estimate_fwhm(x.view(), y.view(), options.max_fwhm).unwrap_or(options.max_fwhm);
    let default_width = options
        .default_width
        .unwrap_or_else(|| shape.width_from_fwhm(fwhm));
    let max_width = shape.width_from_fwhm(options.max_fwhm);
    let refiner = Refiner {
        shape,
        x,
        y,
        transmission: transmission.as_ref(),
        span: spectrum.span(),
        min_width: options.min_width_factor * default_width,
        max_width,
    };
    debug!(
        "SERS fit: default width {:.4}, width range [{:.4}, {:.4}]",
        default_width, refiner.min_width, max_width
    );

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let (y_min, _) = min_max(y.view());
    let mut set = PeakSet {
        constant: y_min,
        peaks: options.initial_fit.clone(),
    };
    if !set.peaks.is_empty() {
        set = refiner.seed(set)?;
    }
    let mut loss = refiner.loss(&set)?;

    let mut regions = if options.add_peaks {
        options.regions.clamp(1, n)
    } else {
        n + 1
    };
    let mut iterations = 0;
    let mut truncated = false;
    while regions <= n {
        if cancelled(cancel) || iterations >= options.max_iterations {
            warn!("SERS fit stopped after {} steps with {} peaks", iterations, set.peaks.len());
            truncated = true;
            break;
        }
        iterations += 1;

        let current = refiner.model(&set)?;
        let search = RegionalSearch {
            shape,
            x,
            y,
            current: &current,
            default_width,
            max_width,
            envelope: refiner.transmission,
            weights: None,
        };
        let trial = search
            .insert(regions, &mut rng)?
            .filter(|t| t.peak.height > 0.0 && t.peak.width > 0.0);
        let Some(trial) = trial else {
            regions *= 5;
            debug!("no usable trial peak, regions -> {}", regions);
            continue;
        };

        let mut candidate = set.clone();
        candidate.peaks.push(trial.peak);
        let candidate = refiner.refine(candidate)?;
        let new_loss = refiner.loss(&candidate)?;

        if new_loss < loss * (1.0 - LOSS_TOLERANCE) {
            let settled = settled(shape, &set.peaks, &candidate.peaks);
            debug!(
                "step {}: peak at {:.3} from region {}, {} peaks, loss {:.6e}",
                iterations,
                trial.peak.centre,
                trial.region,
                candidate.peaks.len(),
                new_loss
            );
            set = candidate;
            loss = new_loss;
            if settled {
                regions *= 5;
                debug!("peaks settled, regions -> {}", regions);
            }
        } else {
            regions *= 5;
            debug!("step {} did not improve the fit, regions -> {}", iterations, regions);
        }
    }

    let arbiter = Arbiter::new(refiner.min_width, max_width);
    let Finalised {
        set,
        values,
        errors,
        refined,
    } = refiner.finalise(set, &arbiter, &options.lm)?;
    let loss = refiner.loss(&set)?;

    let asymmetric = if options.allow_asymmetry && !set.peaks.is_empty() {
        let mut signal = y - set.constant;
        if let Some(t) = &transmission {
            signal /= t;
        }
        asymmetrise(shape, x, &signal, &set.peaks, &options.lm)?
    } else {
        Vec::new()
    };
    info!(
        "SERS fit: {} peaks after {} steps{}",
        set.peaks.len(),
        iterations,
        if truncated { " (truncated)" } else { "" }
    );

    Ok(SersFit {
        shape,
        constant: set.constant,
        peaks: set.peaks,
        values,
        errors,
        loss,
        default_width,
        iterations,
        truncated,
        refined,
        asymmetric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_constant_signal_has_no_peaks() {
        let x = Array1::linspace(0.0, 99.0, 100);
        let y = Array1::from_elem(100, 5.0);
        let options = SersOptions::default().with_seed(1);
        let fit = fit_sers_iterative(x.view(), y.view(), &options).unwrap();
        assert!(fit.peaks.is_empty());
        assert_abs_diff_eq!(fit.constant, 5.0, epsilon = 1e-6);
        assert_eq!(fit.values.len(), 1);
        assert_eq!(fit.errors.len(), 1);
        assert!(!fit.truncated);
    }

    #[test]
    fn test_recovers_two_lorentzians() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let noise = Normal::new(0.0, 0.02).unwrap();
        let x = Array1::linspace(0.0, 299.0, 300);
        let y = x.mapv(|v| {
            1.0 + PeakShape::Lorentzian.eval(v, 90.0, 4.0, 5.0)
                + PeakShape::Lorentzian.eval(v, 200.0, 6.0, 3.0)
                + noise.sample(&mut rng)
        });
        let options = SersOptions::default().with_seed(4).with_regions(10);
        let fit = fit_sers_iterative(x.view(), y.view(), &options).unwrap();

        let strong: Vec<&Peak> = fit.peaks.iter().filter(|p| p.height > 1.0).collect();
        assert_eq!(strong.len(), 2);
        assert_abs_diff_eq!(strong[0].centre, 90.0, epsilon = 1.0);
        assert_abs_diff_eq!(strong[1].centre, 200.0, epsilon = 1.0);
        assert_eq!(fit.values.len(), fit.errors.len());
        for p in &fit.peaks {
            assert!(p.height >= 0.0);
        }
    }

    #[test]
    fn test_cancelled_fit_is_truncated() {
        let x = Array1::linspace(0.0, 99.0, 100);
        let y = x.mapv(|v| PeakShape::Gaussian.eval(v, 50.0, 3.0, 2.0));
        let token = CancelToken::new();
        token.cancel();
        let fit = fit_sers_iterative_with_cancel(
            x.view(),
            y.view(),
            &SersOptions::default().with_seed(2),
            Some(&token),
        )
        .unwrap();
        assert!(fit.truncated);
        assert_eq!(fit.iterations, 0);
        assert!(fit.peaks.is_empty());
    }

    #[test]
    fn test_initial_fit_is_refined() {
        let x = Array1::linspace(0.0, 199.0, 200);
        let y = x.mapv(|v| 0.5 + PeakShape::Lorentzian.eval(v, 100.0, 5.0, 4.0));
        let options = SersOptions::default()
            .with_seed(9)
            .with_initial_fit(vec![Peak::new(97.0, 4.0, 1.0)])
            .with_add_peaks(false);
        let fit = fit_sers_iterative(x.view(), y.view(), &options).unwrap();
        assert_eq!(fit.peaks.len(), 1);
        assert_abs_diff_eq!(fit.peaks[0].centre, 100.0, epsilon = 0.2);
        assert_abs_diff_eq!(fit.peaks[0].height, 4.0, epsilon = 0.1);
        assert!(fit.refined);
        assert_eq!(fit.iterations, 0);
        assert!(!fit.truncated);
    }

    #[test]
    fn test_transmission_scales_peaks_only() {
        let x = Array1::linspace(0.0, 199.0, 200);
        let t = Array1::linspace(0.4, 1.0, 200);
        let y: Array1<f64> = x
            .iter()
            .zip(t.iter())
            .map(|(&v, &ti)| 0.5 + ti * PeakShape::Lorentzian.eval(v, 100.0, 5.0, 4.0))
            .collect();
        let options = SersOptions::default()
            .with_seed(9)
            .with_initial_fit(vec![Peak::new(97.0, 4.0, 1.0)])
            .with_add_peaks(false)
            .with_transmission(t);
        let fit = fit_sers_iterative(x.view(), y.view(), &options).unwrap();
        assert_eq!(fit.peaks.len(), 1);
        assert_abs_diff_eq!(fit.peaks[0].centre, 100.0, epsilon = 0.2);
        assert_abs_diff_eq!(fit.peaks[0].height, 4.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.constant, 0.5, epsilon = 0.05);

        let short = options.clone().with_transmission(Array1::ones(10));
        assert!(matches!(
            fit_sers_iterative(x.view(), y.view(), &short),
            Err(SpecFitError::InputShape(_))
        ));
        let dark = options.with_transmission(Array1::zeros(200));
        assert!(matches!(
            fit_sers_iterative(x.view(), y.view(), &dark),
            Err(SpecFitError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_asymmetrise_recovers_flank_exponents() {
        let truth = AsymmetricPeak {
            centre: 60.0,
            width: 5.0,
            height: 3.0,
            alpha: 0.9,
            beta: 1.15,
        };
        let x = Array1::linspace(0.0, 119.0, 120);
        let signal = x.mapv(|v| truth.eval(PeakShape::Lorentzian, v));
        let peaks = [Peak::new(60.0, 4.0, 3.0)];
        let fitted =
            asymmetrise(PeakShape::Lorentzian, &x, &signal, &peaks, &LmConfig::default()).unwrap();
        assert_eq!(fitted.len(), 1);
        assert_abs_diff_eq!(fitted[0].width, 5.0, epsilon = 1e-4);
        assert_abs_diff_eq!(fitted[0].alpha, 0.9, epsilon = 1e-4);
        assert_abs_diff_eq!(fitted[0].beta, 1.15, epsilon = 1e-4);
        assert_eq!(fitted[0].centre, 60.0);
    }

    #[test]
    fn test_asymmetry_is_reported_per_peak() {
        let truth = AsymmetricPeak {
            centre: 100.0,
            width: 5.0,
            height: 4.0,
            alpha: 1.0,
            beta: 1.15,
        };
        let x = Array1::linspace(0.0, 199.0, 200);
        let y = x.mapv(|v| 0.5 + truth.eval(PeakShape::Lorentzian, v));
        let options = SersOptions::default()
            .with_seed(9)
            .with_initial_fit(vec![Peak::new(97.0, 4.0, 1.0)])
            .with_add_peaks(false);

        let symmetric = fit_sers_iterative(x.view(), y.view(), &options).unwrap();
        assert!(symmetric.asymmetric.is_empty());

        let fit = fit_sers_iterative(x.view(), y.view(), &options.with_asymmetry(true)).unwrap();
        assert_eq!(fit.asymmetric.len(), fit.peaks.len());
        let peak = fit.asymmetric[0];
        assert_eq!(peak.centre, fit.peaks[0].centre);
        assert_eq!(peak.height, fit.peaks[0].height);
        for exponent in [peak.alpha, peak.beta] {
            assert!((0.8..=1.2).contains(&exponent));
        }
        assert!(peak.beta > peak.alpha);
    }

    #[test]
    fn test_settled_matches_in_centre_order() {
        let old = [Peak::new(10.0, 2.0, 1.0), Peak::new(50.0, 2.0, 1.0)];
        let new = [Peak::new(50.5, 2.0, 1.0), Peak::new(10.2, 2.0, 1.0)];
        assert!(settled(PeakShape::Lorentzian, &old, &new));
        let moved = [Peak::new(52.0, 2.0, 1.0), Peak::new(10.2, 2.0, 1.0)];
        assert!(!settled(PeakShape::Lorentzian, &old, &moved));
        assert!(!settled(PeakShape::Lorentzian, &old, &new[..1]));
    }

    #[test]
    fn test_height_model_jacobian_is_the_shape() {
        let model = HeightModel {
            shape: PeakShape::Gaussian,
            fixed: vec![(5.0, 1.0)],
        };
        let x = Array1::linspace(0.0, 10.0, 11);
        let jac = model.jacobian(&x, &ndarray::array![0.0, 2.0]).unwrap();
        assert_abs_diff_eq!(jac[[5, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[[3, 0]], 1.0, epsilon = 1e-12);
        let y = model.eval(&x, &ndarray::array![1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(y[5], 3.0, epsilon = 1e-12);
    }
}
