//! Regional trial insertion.
//!
//! The axis is split into `R` equal regions. Each region gets one trial peak at a
//! random centre inside it, which is refined by L1 minimisation on top of the
//! current model with its centre held inside the region. The region whose refined
//! trial leaves the smallest residual wins; ties go to the larger region index.

use log::{trace, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::Result;
use crate::model::{minimize_l1, ModelFunction};
use crate::models::{Peak, PeakShape};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::signal::interpolate::interp;
use crate::utils::stats::min_max;

/// One peak on top of a fixed offset, optionally multiplied by an envelope.
struct OffsetPeak<'a> {
    shape: PeakShape,
    offset: &'a Array1<f64>,
    envelope: Option<&'a Array1<f64>>,
}

impl ModelFunction for OffsetPeak<'_> {
    fn parameter_count(&self) -> usize {
        3
    }

    fn eval(&self, x: &Array1<f64>, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut out = self.offset.clone();
        for (i, &v) in x.iter().enumerate() {
            let p = self.shape.eval(v, params[0], params[1], params[2]);
            out[i] += self.envelope.map_or(p, |e| e[i] * p);
        }
        Ok(out)
    }

    fn jacobian(&self, x: &Array1<f64>, params: &Array1<f64>) -> Option<Array2<f64>> {
        let mut jac = Array2::zeros((x.len(), 3));
        for (i, &v) in x.iter().enumerate() {
            let (dc, dw, dh) = self.shape.partials(v, params[0], params[1], params[2]);
            let e = self.envelope.map_or(1.0, |e| e[i]);
            jac[[i, 0]] = e * dc;
            jac[[i, 1]] = e * dw;
            jac[[i, 2]] = e * dh;
        }
        Some(jac)
    }
}

/// Inputs of a regional search.
pub struct RegionalSearch<'a> {
    pub shape: PeakShape,
    pub x: &'a Array1<f64>,
    pub y: &'a Array1<f64>,

    /// Current model prediction the trial peak is added to.
    pub current: &'a Array1<f64>,

    /// Initial width of every trial peak.
    pub default_width: f64,

    /// Upper bound on the trial width.
    pub max_width: f64,

    /// Multiplier applied to the trial peak, e.g. a notch transmission.
    pub envelope: Option<&'a Array1<f64>>,

    /// Per-sample weights of the L1 residual.
    pub weights: Option<&'a Array1<f64>>,
}

/// The winning trial of a regional search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trial {
    pub peak: Peak,

    /// L1 residual with the trial peak included.
    pub loss: f64,

    pub region: usize,
}

impl RegionalSearch<'_> {
    /// Place and refine one trial peak per region and return the best one.
    ///
    /// Returns `None` when no region produced a usable trial.
    pub fn insert(&self, regions: usize, rng: &mut StdRng) -> Result<Option<Trial>> {
        let n = self.x.len();
        if n == 0 || regions == 0 {
            return Ok(None);
        }
        let lo = self.x[0];
        let hi = self.x[n - 1];
        let step = (hi - lo) / regions as f64;
        let (y_min, _) = min_max(self.y.view());

        let model = OffsetPeak {
            shape: self.shape,
            offset: self.current,
            envelope: self.envelope,
        };

        let mut best: Option<Trial> = None;
        for r in 0..regions {
            let start = lo + r as f64 * step;
            let end = if r + 1 == regions { hi } else { start + step };
            let centre = if end > start {
                rng.gen_range(start..end)
            } else {
                start
            };
            let height = (interp(centre, self.x.view(), self.y.view()) - y_min).max(0.0);

            let bounds = ParameterBounds::from_vec(vec![
                Bounds::new(start, end)?,
                Bounds::new(0.0, self.max_width)?,
                Bounds::min_only(0.0),
            ]);
            let initial = Array1::from_vec(vec![centre, self.default_width, height]);

            let fit = match minimize_l1(&model, self.x, self.y, &initial, &bounds, self.weights) {
                Ok(fit) => fit,
                Err(e) => {
                    warn!("trial peak in region {} failed: {}", r, e);
                    continue;
                }
            };
            trace!("region {}: trial loss {:.6e}", r, fit.loss);

            if best.map_or(true, |b| fit.loss <= b.loss) {
                best = Some(Trial {
                    peak: Peak::new(fit.params[0], fit.params[1], fit.params[2]),
                    loss: fit.loss,
                    region: r,
                });
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_finds_single_peak() {
        let x = Array1::linspace(0.0, 199.0, 200);
        let y = x.mapv(|v| PeakShape::Lorentzian.eval(v, 123.0, 4.0, 5.0));
        let current = Array1::zeros(200);
        let search = RegionalSearch {
            shape: PeakShape::Lorentzian,
            x: &x,
            y: &y,
            current: &current,
            default_width: 3.0,
            max_width: 20.0,
            envelope: None,
            weights: None,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let trial = search.insert(10, &mut rng).unwrap().unwrap();
        assert_eq!(trial.region, 6);
        assert_relative_eq!(trial.peak.centre, 123.0, epsilon = 0.5);
        assert_relative_eq!(trial.peak.height, 5.0, epsilon = 0.5);
    }

    #[test]
    fn test_same_seed_same_trial() {
        let x = Array1::linspace(0.0, 99.0, 100);
        let y = x.mapv(|v| PeakShape::Gaussian.eval(v, 40.0, 3.0, 2.0) + 0.1);
        let current = Array1::from_elem(100, 0.1);
        let search = RegionalSearch {
            shape: PeakShape::Gaussian,
            x: &x,
            y: &y,
            current: &current,
            default_width: 2.0,
            max_width: 10.0,
            envelope: None,
            weights: None,
        };
        let a = search.insert(5, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = search.insert(5, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ties_go_to_larger_region() {
        let x = Array1::linspace(0.0, 99.0, 100);
        let y = Array1::zeros(100);
        let current = Array1::zeros(100);
        let search = RegionalSearch {
            shape: PeakShape::Lorentzian,
            x: &x,
            y: &y,
            current: &current,
            default_width: 2.0,
            max_width: 10.0,
            envelope: None,
            weights: None,
        };
        let trial = search.insert(4, &mut StdRng::seed_from_u64(1)).unwrap().unwrap();
        assert_eq!(trial.region, 3);
        assert_eq!(trial.loss, 0.0);
    }
}
