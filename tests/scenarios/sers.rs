use approx::assert_abs_diff_eq;
use ndarray::Array1;
use specfit_rs::{fit_sers_batch, fit_sers_iterative, Peak, PeakShape, SersOptions};

use crate::test_helpers::{init_logging, noise, stack, synthesize};

fn strongest(peaks: &[Peak], n: usize) -> Vec<Peak> {
    let mut sorted = peaks.to_vec();
    sorted.sort_by(|a, b| b.height.total_cmp(&a.height));
    sorted.truncate(n);
    sorted.sort_by(|a, b| a.centre.total_cmp(&b.centre));
    sorted
}

#[test]
fn test_three_peaks_discovered() {
    init_logging();
    let x = Array1::linspace(0.0, 399.0, 400);
    let truth = [
        Peak::new(70.0, 5.0, 4.0),
        Peak::new(210.0, 4.0, 6.0),
        Peak::new(320.0, 7.0, 2.5),
    ];
    let y = synthesize(PeakShape::Lorentzian, &x, 2.0, &truth) + noise(400, 0.02, 8);

    let options = SersOptions::default().with_seed(12).with_regions(20);
    let fit = fit_sers_iterative(x.view(), y.view(), &options).unwrap();

    let found = strongest(&fit.peaks, 3);
    assert_eq!(found.len(), 3);
    for (f, t) in found.iter().zip(&truth) {
        assert_abs_diff_eq!(f.centre, t.centre, epsilon = 1.0);
    }
    assert_abs_diff_eq!(fit.constant, 2.0, epsilon = 0.2);
    assert!(!fit.truncated);
}

#[test]
fn test_batch_seeded_from_the_median() {
    let x = Array1::linspace(0.0, 199.0, 200);
    let rows: Vec<Array1<f64>> = (0..4)
        .map(|i| {
            let peaks = [Peak::new(60.0, 4.0, 3.0 + 0.2 * i as f64), Peak::new(140.0, 5.0, 2.0)];
            synthesize(PeakShape::Lorentzian, &x, 0.5, &peaks) + noise(200, 0.01, 60 + i)
        })
        .collect();
    let ys = stack(&rows);

    let options = SersOptions::default().with_seed(5).with_regions(10);
    let fits = fit_sers_batch(x.view(), ys.view(), &options, true).unwrap();
    assert_eq!(fits.len(), 4);
    for fit in &fits {
        let found = strongest(&fit.peaks, 2);
        assert_eq!(found.len(), 2);
        assert_abs_diff_eq!(found[0].centre, 60.0, epsilon = 1.0);
        assert_abs_diff_eq!(found[1].centre, 140.0, epsilon = 1.0);
    }
}
