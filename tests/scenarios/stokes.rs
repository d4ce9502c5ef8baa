use approx::assert_abs_diff_eq;
use ndarray::Array1;
use specfit_rs::models::{NotchMask, Sigmoid};
use specfit_rs::{fit_stokes_antistokes, PeakShape, StokesOptions};

use crate::test_helpers::{init_logging, noise};

/// Raman spectrum seen through a notch filter at ±100 with a small laser leak.
fn notched_spectrum(x: &Array1<f64>) -> Array1<f64> {
    let notch = NotchMask {
        anti_stokes: Sigmoid::new(-100.0, -5.0),
        stokes: Sigmoid::new(100.0, 5.0),
    };
    let clean = x.mapv(|v| {
        let raman = 1.0
            + 2e-4 * v.abs()
            + PeakShape::Lorentzian.eval(v, 250.0, 15.0, 1.0)
            + PeakShape::Lorentzian.eval(v, 1580.0, 15.0, 0.4);
        notch.eval(v) * raman + 0.05 + PeakShape::Lorentzian.eval(v, 0.0, 10.0, 2.0)
    });
    clean + noise(x.len(), 0.005, 99)
}

#[test]
fn test_peaks_found_on_the_stokes_side() {
    init_logging();
    let x = Array1::linspace(-2000.0, 2000.0, 2001);
    let y = notched_spectrum(&x);
    let options = StokesOptions::default().with_seed(7);

    let fit = fit_stokes_antistokes(x.view(), y.view(), &options).unwrap();

    for expected in [250.0, 1580.0] {
        assert!(
            fit.peaks.centres.iter().any(|c| (c - expected).abs() <= 5.0),
            "no peak near {} in {:?}",
            expected,
            fit.peaks.centres
        );
    }
    assert!(fit.peaks.centres.iter().all(|c| c.abs() >= 100.0));
    assert!(fit.notch_edge > 50.0 && fit.notch_edge < 200.0);

    for i in 0..x.len() {
        assert_abs_diff_eq!(
            fit.background_removed[i] + fit.full_fit[i] - fit.peaks_only[i],
            y[i],
            epsilon = 1e-9
        );
    }
}
