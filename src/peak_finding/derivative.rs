//! Local maxima from zero crossings of the first derivative.

use log::debug;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::signal::calculus::central_gradient;
use crate::signal::interpolate::at_fractional_index;

/// Fractional sample indices of the local maxima of a smoothed signal.
///
/// The first derivative is normalised by its largest magnitude. A crossing
/// between samples `n − 1` and `n` sits at `n − dY[n] / (dY[n] − dY[n−1])`;
/// an exact zero counts at its own index. Only crossings where the
/// interpolated second derivative is negative are kept.
pub fn maxima_indices(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Vec<f64> {
    let n = y.len();
    if n < 3 {
        return Vec::new();
    }

    let mut dy = central_gradient(x, y);
    let scale = dy.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    dy /= scale;
    let ddy = central_gradient(x, dy.view());

    let mut crossings = Vec::new();
    for i in 1..n {
        let (prev, cur) = (dy[i - 1], dy[i]);
        let at = if cur == 0.0 {
            i as f64
        } else if prev != 0.0 && prev.signum() != cur.signum() {
            i as f64 - cur / (cur - prev)
        } else {
            continue;
        };
        if at_fractional_index(ddy.view(), at) < 0.0 {
            crossings.push(at);
        }
    }
    crossings
}

/// A local maximum and the signal interpolated there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Maximum {
    pub position: f64,
    pub value: f64,
}

/// Local maxima of a smoothed signal, in axis order.
pub fn find_maxima(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Vec<Maximum> {
    let maxima: Vec<Maximum> = maxima_indices(x, y)
        .into_iter()
        .map(|i| Maximum {
            position: at_fractional_index(x, i),
            value: at_fractional_index(y, i),
        })
        .collect();
    debug!("derivative locator found {} maxima", maxima.len());
    maxima
}
