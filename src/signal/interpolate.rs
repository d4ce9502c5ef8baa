//! Interpolation on ascending axes.

use ndarray::{Array1, ArrayView1};

use crate::error::{Result, SpecFitError};

/// Index `i` such that `x[i] <= value < x[i+1]`, clamped to `[0, len − 2]`.
fn segment(x: ArrayView1<f64>, value: f64) -> usize {
    let n = x.len();
    if n < 2 || value <= x[0] {
        return 0;
    }
    if value >= x[n - 1] {
        return n - 2;
    }
    // binary search on the ascending axis
    let (mut lo, mut hi) = (0, n - 1);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if x[mid] <= value {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Linear interpolation of `(x, y)` at `value`; constant beyond the ends.
pub fn interp(value: f64, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let n = x.len();
    if n == 0 {
        return 0.0;
    }
    if value <= x[0] {
        return y[0];
    }
    if value >= x[n - 1] {
        return y[n - 1];
    }
    let i = segment(x, value);
    let t = (value - x[i]) / (x[i + 1] - x[i]);
    y[i] + t * (y[i + 1] - y[i])
}

/// Linear interpolation at every point of `at`.
pub fn interp_many(at: ArrayView1<f64>, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
    at.mapv(|v| interp(v, x, y))
}

/// Value of `values` at a fractional sample index.
pub fn at_fractional_index(values: ArrayView1<f64>, index: f64) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if index <= 0.0 {
        return values[0];
    }
    let i = index.floor() as usize;
    if i + 1 >= n {
        return values[n - 1];
    }
    let t = index - i as f64;
    values[i] + t * (values[i + 1] - values[i])
}

/// Index of the sample nearest to `value` on an ascending axis.
pub fn nearest_index(x: ArrayView1<f64>, value: f64) -> usize {
    let n = x.len();
    if n < 2 {
        return 0;
    }
    let i = segment(x, value);
    if (value - x[i]).abs() <= (x[i + 1] - value).abs() {
        i
    } else {
        i + 1
    }
}

/// Grid from `start` to `end` (inclusive, rounded) with the given step.
pub fn uniform_grid(start: f64, end: f64, step: f64) -> Array1<f64> {
    if step <= 0.0 || end < start {
        return Array1::from_elem(1, start);
    }
    let count = ((end - start) / step).round() as usize + 1;
    Array1::from_shape_fn(count, |i| start + i as f64 * step)
}

/// Smallest positive spacing of an ascending axis.
pub fn min_spacing(x: ArrayView1<f64>) -> f64 {
    (1..x.len())
        .map(|i| x[i] - x[i - 1])
        .filter(|d| *d > 0.0)
        .fold(f64::INFINITY, f64::min)
}

/// Natural cubic spline through ascending knots.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Array1<f64>,
    y: Array1<f64>,
    m: Array1<f64>,
}

impl CubicSpline {
    /// Fit the spline; the second derivative vanishes at both ends.
    pub fn new(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<Self> {
        let n = x.len();
        if n != y.len() || n < 2 {
            return Err(SpecFitError::InputShape(format!(
                "spline needs at least 2 paired knots, got {} and {}",
                n,
                y.len()
            )));
        }
        if (1..n).any(|i| x[i] <= x[i - 1]) {
            return Err(SpecFitError::InputShape(
                "spline knots must be strictly ascending".to_string(),
            ));
        }

        let mut m = Array1::zeros(n);
        if n > 2 {
            // Tridiagonal system for the interior second derivatives.
            let k = n - 2;
            let mut a = vec![0.0; k];
            let mut b = vec![0.0; k];
            let mut c = vec![0.0; k];
            let mut d = vec![0.0; k];
            for j in 0..k {
                let i = j + 1;
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                a[j] = h0;
                b[j] = 2.0 * (h0 + h1);
                c[j] = h1;
                d[j] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            }
            let interior = solve_tridiagonal(&a, &b, &c, &d);
            for (j, v) in interior.into_iter().enumerate() {
                m[j + 1] = v;
            }
        }

        Ok(Self {
            x: x.to_owned(),
            y: y.to_owned(),
            m,
        })
    }

    /// Evaluate at `value`; outside the knots the end cubic is extended.
    pub fn eval(&self, value: f64) -> f64 {
        let i = segment(self.x.view(), value);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - value) / h;
        let b = (value - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a.powi(3) - a) * self.m[i] + (b.powi(3) - b) * self.m[i + 1]) * h * h / 6.0
    }

    pub fn eval_many(&self, at: ArrayView1<f64>) -> Array1<f64> {
        at.mapv(|v| self.eval(v))
    }
}

/// Thomas algorithm for a tridiagonal system with sub-diagonal `a`, diagonal `b`,
/// super-diagonal `c` and right-hand side `d`.
pub(crate) fn solve_tridiagonal(a: &[f64], b: &[f64], c: &[f64], d: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut c_star = vec![0.0; n];
    let mut d_star = vec![0.0; n];
    if n == 0 {
        return d_star;
    }

    c_star[0] = c[0] / b[0];
    d_star[0] = d[0] / b[0];
    for i in 1..n {
        let m = b[i] - a[i] * c_star[i - 1];
        c_star[i] = c[i] / m;
        d_star[i] = (d[i] - a[i] * d_star[i - 1]) / m;
    }

    let mut out = vec![0.0; n];
    out[n - 1] = d_star[n - 1];
    for i in (0..n - 1).rev() {
        out[i] = d_star[i] - c_star[i] * out[i + 1];
    }
    out
}
