//! Integration tests for `curve_fit` and `minimize_l1` on peak models.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1};
use specfit_rs::model::{curve_fit, l1_loss, minimize_l1, ModelFunction, VaryingSubset};
use specfit_rs::models::{Peak, PeakModel, PeakShape};
use specfit_rs::parameters::{Bounds, ParameterBounds};
use specfit_rs::LmConfig;

use crate::test_helpers::{init_logging, noise, synthesize};

fn peak_bounds(n_peaks: usize, lo: f64, hi: f64) -> ParameterBounds {
    let mut bounds = ParameterBounds::unbounded(1);
    for _ in 0..n_peaks {
        bounds.push(Bounds::new(lo, hi).unwrap());
        bounds.push(Bounds::min_only(0.0));
        bounds.push(Bounds::min_only(0.0));
    }
    bounds
}

#[test]
fn test_two_lorentzians_with_errors() {
    init_logging();
    let x = Array1::linspace(0.0, 199.0, 200);
    let truth = [Peak::new(80.0, 5.0, 10.0), Peak::new(130.0, 3.0, 7.0)];
    let y = synthesize(PeakShape::Lorentzian, &x, 0.5, &truth) + noise(200, 0.05, 11);

    let model = PeakModel::new(PeakShape::Lorentzian, 2);
    let initial = array![0.0, 78.0, 8.0, 8.0, 132.0, 6.0, 5.0];
    let fit = curve_fit(&model, &x, &y, &initial, &peak_bounds(2, 0.0, 199.0), &LmConfig::default())
        .unwrap();

    assert!(fit.success);
    assert!(fit.has_errors());
    assert_eq!(fit.errors.len(), fit.values.len());
    for (k, p) in truth.iter().enumerate() {
        let at = 1 + 3 * k;
        let centre_err = fit.errors[at].unwrap();
        assert!(centre_err > 0.0 && centre_err < 0.1);
        assert_abs_diff_eq!(fit.values[at], p.centre, epsilon = 5.0 * centre_err);
        assert_abs_diff_eq!(fit.values[at + 1], p.width, epsilon = 0.2);
        assert_abs_diff_eq!(fit.values[at + 2], p.height, epsilon = 0.2);
    }
}

#[test]
fn test_initial_guess_outside_bounds_is_clamped() {
    let x = Array1::linspace(0.0, 99.0, 100);
    let y = synthesize(PeakShape::Gaussian, &x, 1.0, &[Peak::new(40.0, 6.0, 3.0)]);
    let model = PeakModel::new(PeakShape::Gaussian, 1);
    let bounds = peak_bounds(1, 30.0, 60.0);

    let fit = curve_fit(&model, &x, &y, &array![1.0, 10.0, 8.0, 2.0], &bounds, &LmConfig::default())
        .unwrap();
    assert!(fit.success);
    assert_abs_diff_eq!(fit.values[1], 40.0, epsilon = 1e-4);
    assert_abs_diff_eq!(fit.values[2], 6.0, epsilon = 1e-4);
}

#[test]
fn test_wrong_bound_count_is_an_error() {
    let x = Array1::linspace(0.0, 9.0, 10);
    let y = Array1::zeros(10);
    let model = PeakModel::new(PeakShape::Gaussian, 1);
    let result = curve_fit(
        &model,
        &x,
        &y,
        &array![0.0, 5.0, 1.0, 1.0],
        &ParameterBounds::unbounded(2),
        &LmConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_l1_fit_resists_a_spike() {
    let x = Array1::linspace(0.0, 99.0, 100);
    let mut y = synthesize(PeakShape::Gaussian, &x, 2.0, &[Peak::new(50.0, 5.0, 4.0)]);
    y[10] += 40.0;
    y[85] += 40.0;
    let model = PeakModel::new(PeakShape::Gaussian, 1);
    let initial = array![1.0, 48.0, 7.0, 3.0];

    let fit = minimize_l1(&model, &x, &y, &initial, &peak_bounds(1, 0.0, 99.0), None).unwrap();
    assert_abs_diff_eq!(fit.params[0], 2.0, epsilon = 0.05);
    assert_abs_diff_eq!(fit.params[1], 50.0, epsilon = 0.05);
    assert_abs_diff_eq!(fit.params[3], 4.0, epsilon = 0.1);
    let predicted = model.eval(&x, &fit.params).unwrap();
    assert_abs_diff_eq!(fit.loss, l1_loss(&predicted, &y, None), epsilon = 1e-6);
}

#[test]
fn test_zero_weights_exclude_samples() {
    let x = Array1::linspace(0.0, 99.0, 100);
    let y = synthesize(PeakShape::Lorentzian, &x, 1.0, &[Peak::new(50.0, 3.0, 6.0)]);
    let weights = x.mapv(|v| if (v - 50.0).abs() < 15.0 { 0.0 } else { 1.0 });

    // Constant only: with the peak masked out the level is the baseline.
    let model = PeakModel::new(PeakShape::Lorentzian, 0);
    let fit = minimize_l1(&model, &x, &y, &array![0.0], &ParameterBounds::unbounded(1), Some(&weights))
        .unwrap();
    assert_abs_diff_eq!(fit.params[0], 1.0, epsilon = 0.1);
}

#[test]
fn test_varying_subset_holds_the_rest() {
    let x = Array1::linspace(0.0, 99.0, 100);
    let y = synthesize(PeakShape::Gaussian, &x, 0.0, &[Peak::new(30.0, 4.0, 2.0)]);
    let model = PeakModel::new(PeakShape::Gaussian, 1);

    // Only the height varies; centre and width stay at their true values.
    let subset = VaryingSubset::new(&model, array![0.0, 30.0, 4.0, 0.5], vec![3]).unwrap();
    let fit = curve_fit(
        &subset,
        &x,
        &y,
        &subset.initial(),
        &ParameterBounds::unbounded(1),
        &LmConfig::default(),
    )
    .unwrap();
    let full = subset.expand(&fit.values);
    assert_abs_diff_eq!(full[3], 2.0, epsilon = 1e-6);
    assert_eq!(full[1], 30.0);
    assert_eq!(full[2], 4.0);

    assert!(VaryingSubset::new(&model, array![0.0, 1.0], vec![0]).is_err());
}
