//! Order statistics and simple moments used by the noise rules.

use ndarray::ArrayView1;

fn sorted(values: ArrayView1<f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Median of the values; 0 for an empty input.
pub fn median(values: ArrayView1<f64>) -> f64 {
    let v = sorted(values);
    let n = v.len();
    if n == 0 {
        return 0.0;
    }
    let i = (n - 1) / 2;
    if n % 2 == 0 {
        0.5 * (v[i] + v[i + 1])
    } else {
        v[i]
    }
}

/// Percentile `q` (0–100) with linear interpolation between order statistics.
pub fn percentile(values: ArrayView1<f64>, q: f64) -> f64 {
    let v = sorted(values);
    let n = v.len();
    if n == 0 {
        return 0.0;
    }
    let h = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = h.floor() as usize;
    if lo + 1 >= n {
        return v[n - 1];
    }
    v[lo] + (h - lo as f64) * (v[lo + 1] - v[lo])
}

/// Root mean square; 0 for an empty input.
pub fn rms<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v * v, c + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

/// Minimum and maximum of the values.
pub fn min_max(values: ArrayView1<f64>) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Index of the smallest value in `values[start..end]`.
pub fn argmin_range(values: ArrayView1<f64>, start: usize, end: usize) -> usize {
    let mut best = start;
    for i in start..end.min(values.len()) {
        if values[i] < values[best] {
            best = i;
        }
    }
    best
}

/// Index of the largest value.
pub fn argmax(values: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}
