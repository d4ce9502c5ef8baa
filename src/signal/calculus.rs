//! Derivatives and integrals on sampled axes.

use ndarray::{Array1, ArrayView1};

/// First derivative of `y` with respect to `x`.
///
/// Interior samples use the central difference `(y[i+1] − y[i−1]) / (x[i+1] − x[i−1])`,
/// the two ends a one-sided difference. The output has the length of the input and
/// the spacing of `x` need not be uniform.
pub fn central_gradient(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
    let n = y.len();
    let mut g = Array1::zeros(n);
    if n < 2 {
        return g;
    }
    g[0] = (y[1] - y[0]) / (x[1] - x[0]);
    g[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        g[i] = (y[i + 1] - y[i - 1]) / (x[i + 1] - x[i - 1]);
    }
    g
}

/// First derivative with respect to the sample index.
pub fn index_gradient(y: ArrayView1<f64>) -> Array1<f64> {
    let n = y.len();
    let mut g = Array1::zeros(n);
    if n < 2 {
        return g;
    }
    g[0] = y[1] - y[0];
    g[n - 1] = y[n - 1] - y[n - 2];
    for i in 1..n - 1 {
        g[i] = 0.5 * (y[i + 1] - y[i - 1]);
    }
    g
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    (1..x.len())
        .map(|i| 0.5 * (x[i] - x[i - 1]) * (y[i] + y[i - 1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_gradient_of_quadratic_on_uneven_axis() {
        let x = array![0.0, 0.5, 2.0, 3.0, 5.0];
        let y = x.mapv(|v| 3.0 * v + 1.0);
        let g = central_gradient(x.view(), y.view());
        for v in g.iter() {
            assert_relative_eq!(*v, 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_index_gradient_keeps_length() {
        let y = array![0.0, 1.0, 4.0, 9.0];
        let g = index_gradient(y.view());
        assert_eq!(g.len(), 4);
        assert_relative_eq!(g[0], 1.0);
        assert_relative_eq!(g[1], 2.0);
        assert_relative_eq!(g[2], 4.0);
        assert_relative_eq!(g[3], 5.0);
    }

    #[test]
    fn test_trapezoid() {
        let x = Array1::linspace(0.0, 2.0, 201);
        let y = x.mapv(|v| v * v);
        assert_relative_eq!(trapezoid(x.view(), y.view()), 8.0 / 3.0, epsilon = 1e-4);
    }
}
