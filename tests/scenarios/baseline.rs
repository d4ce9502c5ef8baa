use ndarray::Array1;
use specfit_rs::{remove_baseline, BaselineOutput, PeakShape, PolynomialBaselineOptions};

use crate::test_helpers::init_logging;

fn background(v: f64) -> f64 {
    3.0 + 0.002 * v - 1.5e-5 * v * v
}

#[test]
fn test_quadratic_background_under_a_peak() {
    init_logging();
    let x = Array1::linspace(0.0, 1023.0, 1024);
    let peak = x.mapv(|v| PeakShape::Lorentzian.eval(v, 512.0, 8.0, 2.0));
    let y = x.mapv(background) + &peak;

    let fit = remove_baseline(x.view(), y.view(), 4, &PolynomialBaselineOptions::default()).unwrap();
    assert_eq!(fit.output.len(), x.len());
    for (i, &v) in x.iter().enumerate() {
        if (v - 512.0).abs() > 40.0 {
            assert!(
                (fit.output[i] - peak[i]).abs() <= 0.05,
                "residual background {} at x = {}",
                fit.output[i] - peak[i],
                v
            );
        }
    }
    // The peak itself survives the subtraction.
    assert!(fit.output[512] > 1.5);
}

#[test]
fn test_baseline_output_is_the_background() {
    let x = Array1::linspace(0.0, 1023.0, 1024);
    let y = x.mapv(|v| background(v) + PeakShape::Lorentzian.eval(v, 300.0, 6.0, 1.0));
    let options = PolynomialBaselineOptions::default().with_output(BaselineOutput::Baseline);

    let fit = remove_baseline(x.view(), y.view(), 2, &options).unwrap();
    assert_eq!(fit.output, fit.baseline);
    assert!((fit.output[800] - background(800.0)).abs() < 0.05);
}
