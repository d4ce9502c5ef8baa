use approx::assert_abs_diff_eq;
use ndarray::Array1;
use specfit_rs::{fit_sparse, Peak, PeakShape, SparseOptions};

use crate::test_helpers::{init_logging, noise, synthesize};

#[test]
fn test_three_lines_on_a_descending_axis() {
    init_logging();
    let x = Array1::linspace(1800.0, 800.0, 1001);
    let truth = [
        Peak::new(1000.0, 6.0, 8.0),
        Peak::new(1300.0, 4.0, 5.0),
        Peak::new(1600.0, 5.0, 12.0),
    ];
    let y = synthesize(PeakShape::Lorentzian, &x, 3.0, &truth) + noise(1001, 0.02, 21);

    let fit = fit_sparse(x.view(), y.view(), &SparseOptions::default())
        .unwrap()
        .expect("three isolated lines");

    assert_eq!(fit.peaks.len(), 3);
    for (found, expected) in fit.peaks.iter().zip(&truth) {
        assert_abs_diff_eq!(found.centre, expected.centre, epsilon = 0.2);
        assert_abs_diff_eq!(found.width, expected.width, epsilon = 0.2);
        assert_abs_diff_eq!(found.height, expected.height, epsilon = 0.2);
    }
    assert_abs_diff_eq!(fit.constant, 3.0, epsilon = 0.02);
    // The curve comes back in the caller's order.
    assert_abs_diff_eq!(fit.curve[400], y[400], epsilon = 0.1);
}

#[test]
fn test_pure_noise_yields_nothing() {
    let x = Array1::linspace(0.0, 499.0, 500);
    let y = noise(500, 0.1, 4) + 1.0;
    let options = SparseOptions::default().with_noise_threshold(4.0);
    assert!(fit_sparse(x.view(), y.view(), &options).unwrap().is_none());
}
