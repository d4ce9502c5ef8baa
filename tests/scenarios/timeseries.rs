use approx::assert_abs_diff_eq;
use ndarray::Array1;
use specfit_rs::{fit_timeseries, Peak, PeakShape, TimeSeriesFit, TimeSeriesOptions};

use crate::test_helpers::{init_logging, noise, stack, synthesize};

fn drifting_stack(x: &Array1<f64>) -> Vec<Array1<f64>> {
    [(100.0, 200.0), (102.0, 198.0), (104.0, 196.0)]
        .iter()
        .enumerate()
        .map(|(i, &(a, b))| {
            let peaks = [Peak::new(a, 4.0, 5.0), Peak::new(b, 4.0, 3.0)];
            synthesize(PeakShape::Lorentzian, x, 1.0, &peaks) + noise(x.len(), 0.01, 40 + i as u64)
        })
        .collect()
}

#[test]
fn test_tracks_follow_drifting_peaks() {
    init_logging();
    let x = Array1::linspace(0.0, 299.0, 300);
    let ys = stack(&drifting_stack(&x));
    let options = TimeSeriesOptions::default().with_reorder(true);

    let fits = fit_timeseries(x.view(), ys.view(), &[100.0, 200.0], 4.0, &options).unwrap();
    assert_eq!(fits.len(), 3);

    let expected = [[100.0, 200.0], [102.0, 198.0], [104.0, 196.0]];
    for (fit, want) in fits.iter().zip(&expected) {
        assert!(fit.is_complete());
        let centres: Vec<f64> = fit.centres().into_iter().flatten().collect();
        assert_abs_diff_eq!(centres[0], want[0], epsilon = 0.2);
        assert_abs_diff_eq!(centres[1], want[1], epsilon = 0.2);
        assert_eq!(fit.values().len(), fit.errors().len());
    }
}

#[test]
fn test_zero_rows_give_no_fits() {
    let x = Array1::linspace(0.0, 9.0, 10);
    let ys = ndarray::Array2::<f64>::zeros((0, 10));
    let fits = fit_timeseries(x.view(), ys.view(), &[5.0], 1.0, &TimeSeriesOptions::default()).unwrap();
    assert!(fits.is_empty());
}

/// Two peaks close to the guesses at 140 and 160: once the tall one sits between
/// the guesses, the fit started at 140 lands on the short one to its right.
fn crosstalk_stack(x: &Array1<f64>) -> Vec<Array1<f64>> {
    [(140.0, 160.0), (145.0, 165.0), (150.0, 165.0), (150.0, 158.0)]
        .iter()
        .map(|&(a, b)| {
            let peaks = [Peak::new(a, 4.0, 5.0), Peak::new(b, 4.0, 3.0)];
            synthesize(PeakShape::Lorentzian, x, 1.0, &peaks)
        })
        .collect()
}

fn track(fits: &[TimeSeriesFit], k: usize) -> Vec<f64> {
    fits.iter().map(|f| f.centres()[k].expect("every peak is fit")).collect()
}

#[test]
fn test_crossed_fits_are_untangled() {
    init_logging();
    let x = Array1::linspace(0.0, 298.0, 150);
    let ys = stack(&crosstalk_stack(&x));
    let guesses = [140.0, 160.0];

    let raw = fit_timeseries(x.view(), ys.view(), &guesses, 4.0, &TimeSeriesOptions::default()).unwrap();
    assert!(raw.iter().all(|f| f.is_complete()));
    // The third spectrum comes back with its peaks in the wrong slots.
    let crossed = raw[2].centres();
    assert!(crossed[0].unwrap() > crossed[1].unwrap());

    let options = TimeSeriesOptions::default().with_reorder(true);
    let fits = fit_timeseries(x.view(), ys.view(), &guesses, 4.0, &options).unwrap();
    let tall = track(&fits, 0);
    let short = track(&fits, 1);
    for (found, want) in tall.iter().zip([140.0, 145.0, 150.0, 150.0]) {
        assert_abs_diff_eq!(*found, want, epsilon = 0.05);
    }
    for (found, want) in short.iter().zip([160.0, 165.0, 165.0, 158.0]) {
        assert_abs_diff_eq!(*found, want, epsilon = 0.05);
    }

    // Heights travel with their centres.
    for fit in &fits {
        let heights: Vec<f64> = fit.peaks.iter().flatten().map(|e| e.peak.height).collect();
        assert_abs_diff_eq!(heights[0], 5.0, epsilon = 0.05);
        assert_abs_diff_eq!(heights[1], 3.0, epsilon = 0.05);
    }
}
