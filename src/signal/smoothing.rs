//! Gaussian smoothing.
//!
//! Samples beyond either end are mirrored about the edge (`d c b a | a b c d | d c b a`),
//! so a flat signal stays flat up to the boundaries.

use ndarray::{Array1, ArrayView1};

/// Kernel half-width in units of σ.
const TRUNCATE: f64 = 4.0;

/// Normalised Gaussian kernel of standard deviation `sigma` samples.
fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let two_sigma2 = 2.0 * sigma * sigma;
    let mut w: Vec<f64> = (-radius..=radius)
        .map(|dx| {
            let x = dx as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = w.iter().sum();
    for v in &mut w {
        *v /= sum;
    }
    w
}

/// Map an out-of-range index back into `[0, len)` by mirroring about the edges.
#[inline(always)]
pub(crate) fn reflect_index(idx: isize, len: usize) -> usize {
    let len_i = len as isize;
    if len == 0 {
        return 0;
    }
    let mut x = idx;
    if x < 0 || x >= len_i {
        x = x.rem_euclid(2 * len_i);
        if x >= len_i {
            x = 2 * len_i - 1 - x;
        }
    }
    x as usize
}

/// Gaussian filter with standard deviation `sigma` given in samples.
///
/// A non-positive `sigma` returns the input unchanged.
pub fn gaussian_filter1d(y: ArrayView1<f64>, sigma: f64) -> Array1<f64> {
    let n = y.len();
    if sigma <= 0.0 || !sigma.is_finite() || n == 0 {
        return y.to_owned();
    }

    let kernel = gaussian_kernel_1d(sigma);
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array1::zeros(n);
    for i in 0..n {
        let mut acc = 0.0;
        for (k, &w) in kernel.iter().enumerate() {
            let j = reflect_index(i as isize + k as isize - radius, n);
            acc += w * y[j];
        }
        out[i] = acc;
    }
    out
}

/// Gaussian filter with `sigma` expressed in axis units.
///
/// The width is converted to samples with the median sample spacing, so the
/// smoothing does not assume a uniform axis.
pub fn gaussian_filter_x(x: ArrayView1<f64>, y: ArrayView1<f64>, sigma_x: f64) -> Array1<f64> {
    let spacing = median_spacing(x);
    if spacing <= 0.0 {
        return y.to_owned();
    }
    gaussian_filter1d(y, sigma_x / spacing)
}

/// Median of |Δx|.
pub fn median_spacing(x: ArrayView1<f64>) -> f64 {
    if x.len() < 2 {
        return 0.0;
    }
    let diffs: Array1<f64> = (1..x.len()).map(|i| (x[i] - x[i - 1]).abs()).collect();
    crate::utils::stats::median(diffs.view())
}
