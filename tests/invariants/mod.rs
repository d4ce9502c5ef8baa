//! Properties that hold for every accepted fit, whatever the input.

use ndarray::Array1;
use specfit_rs::arbiter::Arbiter;
use specfit_rs::{
    fit_darkfield, fit_sers_iterative, remove_baseline, DarkfieldOptions, Peak, PeakShape,
    PolynomialBaselineOptions, SersOptions,
};

use crate::test_helpers::{noise, synthesize};

#[test]
fn test_accepted_darkfield_fits_obey_the_arbiter() {
    let x = Array1::linspace(0.0, 299.0, 300);
    let cases: [(&[Peak], u64); 3] = [
        (&[Peak::new(150.0, 20.0, 3.0)], 1),
        (&[Peak::new(90.0, 10.0, 2.0), Peak::new(200.0, 15.0, 4.0)], 2),
        (&[Peak::new(60.0, 8.0, 1.0), Peak::new(150.0, 8.0, 2.0), Peak::new(240.0, 8.0, 1.5)], 3),
    ];

    for (truth, seed) in cases {
        let y = synthesize(PeakShape::Gaussian, &x, 0.3, truth) + noise(300, 0.02, seed);
        let Some(fit) = fit_darkfield(x.view(), y.view(), truth.len(), &DarkfieldOptions::default()).unwrap()
        else {
            continue;
        };

        let values = fit.values();
        let errors = fit.errors();
        assert_eq!(values.len(), errors.len());
        for i in 1..values.len() {
            assert!(values[i].abs() >= errors[i], "parameter {} is not significant", i);
        }
        // Default width range: the median spacing up to the full span.
        let arbiter = Arbiter::new(1.0, 299.0);
        assert_eq!(arbiter.check_peaks(&fit.peaks()), Ok(()));
        let centres: Vec<f64> = fit.centres.iter().map(|c| c.value).collect();
        assert!(centres.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_asking_for_too_many_peaks() {
    let x = Array1::linspace(0.0, 199.0, 200);
    let y = synthesize(PeakShape::Gaussian, &x, 0.5, &[Peak::new(100.0, 12.0, 3.0)]);
    let fit = fit_darkfield(x.view(), y.view(), 5, &DarkfieldOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(fit.centres.len(), 1);
    assert!((fit.centres[0].value - 100.0).abs() < 0.5);
}

#[test]
fn test_minimal_spectrum_runs() {
    let x = Array1::linspace(0.0, 7.0, 8);
    let y = x.mapv(|v| 1.0 + PeakShape::Gaussian.eval(v, 3.5, 1.0, 2.0));

    assert!(fit_darkfield(x.view(), y.view(), 1, &DarkfieldOptions::default()).is_ok());
    let sers = fit_sers_iterative(x.view(), y.view(), &SersOptions::default().with_seed(1)).unwrap();
    assert_eq!(sers.values.len(), sers.errors.len());
    let baseline = remove_baseline(x.view(), y.view(), 1, &PolynomialBaselineOptions::default()).unwrap();
    assert_eq!(baseline.output.len(), 8);
}

#[test]
fn test_too_short_spectrum_is_an_error() {
    let x = Array1::linspace(0.0, 6.0, 7);
    let y = Array1::from_elem(7, 1.0);
    assert!(fit_darkfield(x.view(), y.view(), 1, &DarkfieldOptions::default()).is_err());
    assert!(fit_sers_iterative(x.view(), y.view(), &SersOptions::default()).is_err());
}

#[test]
fn test_constant_sers_signal_has_no_peaks() {
    let x = Array1::linspace(100.0, 0.0, 64);
    let y = Array1::from_elem(64, 3.0);
    let fit = fit_sers_iterative(x.view(), y.view(), &SersOptions::default().with_seed(9)).unwrap();
    assert!(fit.peaks.is_empty());
    assert_eq!(fit.n_peaks(), 0);
}

#[test]
fn test_sers_peaks_are_non_negative() {
    let x = Array1::linspace(0.0, 249.0, 250);
    let truth = [Peak::new(60.0, 3.0, 2.0), Peak::new(180.0, 6.0, 1.0)];
    let y = synthesize(PeakShape::Lorentzian, &x, 0.4, &truth) + noise(250, 0.05, 31);
    let fit = fit_sers_iterative(x.view(), y.view(), &SersOptions::default().with_seed(3)).unwrap();
    assert_eq!(fit.values.len(), 1 + 3 * fit.peaks.len());
    assert_eq!(fit.values.len(), fit.errors.len());
    for p in &fit.peaks {
        assert!(p.height >= 0.0);
        assert!(p.width > 0.0);
    }
}

#[test]
fn test_polynomial_signal_is_removed() {
    let x = Array1::linspace(-50.0, 50.0, 201);
    let y = x.mapv(|v: f64| 2.0 - 0.03 * v + 4e-4 * v * v + 1e-6 * v.powi(3));
    let fit = remove_baseline(x.view(), y.view(), 3, &PolynomialBaselineOptions::default()).unwrap();
    assert!(fit.output.iter().all(|r| r.abs() < 1e-3));
}
