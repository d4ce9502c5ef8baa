use log::{debug, warn};

use super::TimeSeriesFit;

/// Greedy pairwise swaps of `order` that bring `positions` closer to `reference`.
///
/// A missing position contributes nothing to the cost.
fn settle_order(reference: &[f64], positions: &[Option<f64>], order: &mut [usize]) -> usize {
    let mut swaps = 0;
    let mut changed = true;
    while changed {
        changed = false;
        for a in 0..order.len() {
            for b in a + 1..order.len() {
                let mut gain = 0.0;
                if let Some(p) = positions[order[a]] {
                    gain += (reference[a] - p).abs() - (reference[b] - p).abs();
                }
                if let Some(p) = positions[order[b]] {
                    gain += (reference[b] - p).abs() - (reference[a] - p).abs();
                }
                if gain > 0.0 {
                    order.swap(a, b);
                    swaps += 1;
                    changed = true;
                }
            }
        }
    }
    swaps
}

/// Reorder the entries of every row so that each index follows one continuous
/// track of centres.
///
/// The walk starts at the first row with no missing entry and proceeds forwards
/// and then backwards, each row being matched against the centres of the
/// previously visited row. A missing entry keeps the previous centre as its
/// reference. Rows are left untouched and `false` is returned when no row is
/// complete.
pub fn reorder_by_centre<T, F>(rows: &mut [Vec<Option<T>>], centre: F) -> bool
where
    F: Fn(&T) -> f64,
{
    let Some(start) = rows
        .iter()
        .position(|row| !row.is_empty() && row.iter().all(Option::is_some))
    else {
        warn!("no complete fit to start reordering from");
        return false;
    };

    let initial: Vec<f64> = rows[start].iter().flatten().map(&centre).collect();
    let forward: Vec<usize> = (start + 1..rows.len()).collect();
    let backward: Vec<usize> = (0..start).rev().collect();

    let mut total = 0;
    for walk in [forward, backward] {
        let mut reference = initial.clone();
        for i in walk {
            let row = std::mem::take(&mut rows[i]);
            let k = row.len().min(reference.len());
            let positions: Vec<Option<f64>> = row.iter().map(|e| e.as_ref().map(&centre)).collect();
            let mut order: Vec<usize> = (0..row.len()).collect();
            total += settle_order(&reference[..k], &positions, &mut order[..k]);

            let mut slots: Vec<Option<Option<T>>> = row.into_iter().map(Some).collect();
            let reordered: Vec<Option<T>> = order
                .iter()
                .map(|&j| slots[j].take().flatten())
                .collect();
            for (r, e) in reference.iter_mut().zip(reordered.iter()) {
                if let Some(e) = e {
                    *r = centre(e);
                }
            }
            rows[i] = reordered;
        }
    }
    debug!("reordering applied {} swaps", total);
    true
}

/// Remove cross-talk between neighbouring peaks of a fitted time series.
///
/// See [`reorder_by_centre`]; the fits are expected in spectrum order.
pub fn reorder_peaks(fits: &mut [TimeSeriesFit]) -> bool {
    let mut rows: Vec<Vec<_>> = fits.iter_mut().map(|f| std::mem::take(&mut f.peaks)).collect();
    let applied = reorder_by_centre(&mut rows, |e| e.peak.centre);
    for (fit, row) in fits.iter_mut().zip(rows) {
        fit.peaks = row;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centres(rows: &[Vec<Option<f64>>], k: usize) -> Vec<Option<f64>> {
        rows.iter().map(|r| r[k]).collect()
    }

    #[test]
    fn test_swapped_row_is_restored() {
        let mut rows = vec![
            vec![Some(100.0), Some(200.0)],
            vec![Some(198.0), Some(102.0)],
            vec![Some(104.0), Some(196.0)],
        ];
        assert!(reorder_by_centre(&mut rows, |c| *c));
        assert_eq!(centres(&rows, 0), vec![Some(100.0), Some(102.0), Some(104.0)]);
        assert_eq!(centres(&rows, 1), vec![Some(200.0), Some(198.0), Some(196.0)]);
    }

    #[test]
    fn test_walks_backwards_from_first_complete_row() {
        let mut rows = vec![
            vec![Some(205.0), None],
            vec![Some(100.0), Some(200.0)],
            vec![Some(201.0), Some(101.0)],
        ];
        assert!(reorder_by_centre(&mut rows, |c| *c));
        assert_eq!(rows[0], vec![None, Some(205.0)]);
        assert_eq!(rows[1], vec![Some(100.0), Some(200.0)]);
        assert_eq!(rows[2], vec![Some(101.0), Some(201.0)]);
    }

    #[test]
    fn test_no_complete_row() {
        let mut rows: Vec<Vec<Option<f64>>> = vec![vec![None, Some(1.0)], vec![Some(2.0), None]];
        let before = rows.clone();
        assert!(!reorder_by_centre(&mut rows, |c| *c));
        assert_eq!(rows, before);
    }
}
