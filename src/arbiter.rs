//! Acceptance rules for refined peak fits.
//!
//! A fit is accepted when every peak parameter is larger than its own 1-σ error,
//! neighbouring peaks do not merge, all heights are positive and all widths lie in
//! the allowed range. The first violated rule is reported as a [`Rejection`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{unflatten, Peak};

/// Relative slack on the width range, absorbing round-off at active bounds.
const WIDTH_SLACK: f64 = 1e-9;

/// Why a fit was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Rejection {
    /// `|value| < error` for the parameter at this index of the flat vector.
    InsignificantParameter { index: usize, value: f64, error: f64 },

    /// The error of this parameter could not be estimated.
    UnknownError { index: usize },

    /// Two peaks, in centre order, overlap.
    Overlap { left: usize, right: usize },

    /// Peak with a zero or negative height.
    NonPositiveHeight { peak: usize },

    /// Peak whose width left `[min_width, max_width]`.
    WidthOutOfRange { peak: usize, width: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InsignificantParameter { index, value, error } => write!(
                f,
                "parameter {} ({:.4e}) is smaller than its error ({:.4e})",
                index, value, error
            ),
            Rejection::UnknownError { index } => {
                write!(f, "parameter {} has no error estimate", index)
            }
            Rejection::Overlap { left, right } => {
                write!(f, "peaks {} and {} overlap", left, right)
            }
            Rejection::NonPositiveHeight { peak } => {
                write!(f, "peak {} has a non-positive height", peak)
            }
            Rejection::WidthOutOfRange { peak, width } => {
                write!(f, "peak {} has width {:.4e} outside the allowed range", peak, width)
            }
        }
    }
}

/// Fit-quality rules for peaks of a given width range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arbiter {
    pub min_width: f64,
    pub max_width: f64,
}

impl Arbiter {
    pub fn new(min_width: f64, max_width: f64) -> Self {
        Self {
            min_width,
            max_width,
        }
    }

    /// Check a flat `[c, C₁, W₁, H₁, …]` fit and its errors.
    ///
    /// The constant is exempt from the significance rule. Peak indices in the
    /// returned rejection refer to centre order.
    pub fn check(&self, values: &[f64], errors: &[Option<f64>]) -> Result<(), Rejection> {
        for (index, (&value, error)) in values.iter().zip(errors.iter()).enumerate().skip(1) {
            match error {
                None => return Err(Rejection::UnknownError { index }),
                Some(e) if value.abs() < *e => {
                    return Err(Rejection::InsignificantParameter {
                        index,
                        value,
                        error: *e,
                    })
                }
                Some(_) => {}
            }
        }
        let (_, peaks) = unflatten(values);
        self.check_peaks(&peaks)
    }

    /// Geometric rules only: heights, widths and overlap.
    pub fn check_peaks(&self, peaks: &[Peak]) -> Result<(), Rejection> {
        let mut order: Vec<usize> = (0..peaks.len()).collect();
        order.sort_by(|&a, &b| peaks[a].centre.total_cmp(&peaks[b].centre));

        let lo = self.min_width * (1.0 - WIDTH_SLACK);
        let hi = self.max_width * (1.0 + WIDTH_SLACK);
        for (rank, &i) in order.iter().enumerate() {
            let p = &peaks[i];
            if p.height <= 0.0 {
                return Err(Rejection::NonPositiveHeight { peak: rank });
            }
            if p.width < lo || p.width > hi {
                return Err(Rejection::WidthOutOfRange {
                    peak: rank,
                    width: p.width,
                });
            }
        }

        for (rank, pair) in order.windows(2).enumerate() {
            let (a, b) = (&peaks[pair[0]], &peaks[pair[1]]);
            if a.width + b.width >= b.centre - a.centre {
                return Err(Rejection::Overlap {
                    left: rank,
                    right: rank + 1,
                });
            }
        }
        Ok(())
    }
}

/// Remove peaks whose height is not positive. Returns how many were removed.
pub fn prune_zero_heights(peaks: &mut Vec<Peak>) -> usize {
    let before = peaks.len();
    peaks.retain(|p| p.height > 0.0);
    before - peaks.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> Arbiter {
        Arbiter::new(1.0, 20.0)
    }

    #[test]
    fn test_accepts_clean_fit() {
        let values = [0.1, 50.0, 3.0, 10.0, 100.0, 4.0, 5.0];
        let errors = vec![Some(1.0), Some(0.1), Some(0.1), Some(0.2), Some(0.1), Some(0.1), Some(0.3)];
        assert_eq!(arbiter().check(&values, &errors), Ok(()));
    }

    #[test]
    fn test_constant_is_exempt() {
        let values = [0.01, 50.0, 3.0, 10.0];
        let errors = vec![Some(5.0), Some(0.1), Some(0.1), Some(0.2)];
        assert!(arbiter().check(&values, &errors).is_ok());
    }

    #[test]
    fn test_rejects_insignificant_and_unknown_errors() {
        let values = [0.0, 50.0, 3.0, 0.5];
        let errors = vec![None, Some(0.1), Some(0.1), Some(0.8)];
        assert!(matches!(
            arbiter().check(&values, &errors),
            Err(Rejection::InsignificantParameter { index: 3, .. })
        ));

        let errors = vec![None, Some(0.1), None, Some(0.1)];
        assert_eq!(
            arbiter().check(&values, &errors),
            Err(Rejection::UnknownError { index: 2 })
        );
    }

    #[test]
    fn test_rejects_overlap_in_centre_order() {
        let peaks = [
            Peak::new(60.0, 6.0, 1.0),
            Peak::new(10.0, 2.0, 1.0),
            Peak::new(50.0, 5.0, 1.0),
        ];
        assert_eq!(
            arbiter().check_peaks(&peaks),
            Err(Rejection::Overlap { left: 1, right: 2 })
        );
    }

    #[test]
    fn test_rejects_heights_and_widths() {
        let peaks = [Peak::new(10.0, 2.0, 0.0)];
        assert_eq!(
            arbiter().check_peaks(&peaks),
            Err(Rejection::NonPositiveHeight { peak: 0 })
        );
        let peaks = [Peak::new(10.0, 25.0, 1.0)];
        assert!(matches!(
            arbiter().check_peaks(&peaks),
            Err(Rejection::WidthOutOfRange { peak: 0, .. })
        ));
        let peaks = [Peak::new(10.0, 20.0, 1.0)];
        assert!(arbiter().check_peaks(&peaks).is_ok());
    }

    #[test]
    fn test_prune_zero_heights() {
        let mut peaks = vec![
            Peak::new(10.0, 2.0, 3.0),
            Peak::new(20.0, 2.0, 0.0),
            Peak::new(30.0, 2.0, 1.5),
        ];
        assert_eq!(prune_zero_heights(&mut peaks), 1);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[1].centre, 30.0);
        assert_eq!(prune_zero_heights(&mut peaks), 0);
    }

    #[test]
    fn test_rejection_display() {
        let r = Rejection::Overlap { left: 0, right: 1 };
        assert_eq!(r.to_string(), "peaks 0 and 1 overlap");
    }
}
