use approx::assert_abs_diff_eq;
use ndarray::Array1;
use specfit_rs::{fit_darkfield, DarkfieldOptions, Peak, PeakShape};

use crate::test_helpers::{init_logging, noise, synthesize};

#[test]
fn test_two_lorentzians_on_a_constant() {
    init_logging();
    let x = Array1::linspace(0.0, 199.0, 200);
    let truth = [Peak::new(80.0, 5.0, 10.0), Peak::new(130.0, 3.0, 7.0)];
    let y = synthesize(PeakShape::Lorentzian, &x, 0.5, &truth) + noise(200, 0.05, 3);

    let options = DarkfieldOptions::default().with_peak_type(PeakShape::Lorentzian);
    let fit = fit_darkfield(x.view(), y.view(), 2, &options)
        .unwrap()
        .expect("both peaks are resolved");

    let peaks = fit.peaks();
    assert_eq!(peaks.len(), 2);
    for (found, expected) in peaks.iter().zip(&truth) {
        assert_abs_diff_eq!(found.centre, expected.centre, epsilon = 0.5);
        assert_abs_diff_eq!(found.width, expected.width, epsilon = 0.5);
        assert_abs_diff_eq!(found.height, expected.height, epsilon = 0.3);
    }
    assert_abs_diff_eq!(fit.constant.value, 0.5, epsilon = 0.05);
    assert_eq!(fit.curve.len(), x.len());
}

#[test]
fn test_noise_is_rejected_by_the_gate() {
    let x = Array1::linspace(0.0, 999.0, 1000);
    let y = noise(1000, 1.0, 17);
    let options = DarkfieldOptions::default().with_noise_threshold(0.9);
    assert!(fit_darkfield(x.view(), y.view(), 2, &options).unwrap().is_none());
}

#[test]
fn test_descending_axis_gives_the_same_peaks() {
    let x = Array1::linspace(0.0, 199.0, 200);
    let y = synthesize(PeakShape::Gaussian, &x, 0.2, &[Peak::new(100.0, 10.0, 2.0)]);
    let rx: Array1<f64> = x.iter().rev().copied().collect();
    let ry: Array1<f64> = y.iter().rev().copied().collect();

    let options = DarkfieldOptions::default();
    let forward = fit_darkfield(x.view(), y.view(), 1, &options).unwrap().unwrap();
    let reversed = fit_darkfield(rx.view(), ry.view(), 1, &options).unwrap().unwrap();

    assert_abs_diff_eq!(forward.centres[0].value, reversed.centres[0].value, epsilon = 1e-6);
    // The curve comes back in the caller's order.
    assert_abs_diff_eq!(reversed.curve[0], forward.curve[199], epsilon = 1e-6);
}
