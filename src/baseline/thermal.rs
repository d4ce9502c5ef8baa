//! Thermal background estimate for anti-Stokes spectra.
//!
//! The background is fitted to anchor samples: the local minima of a lightly
//! smoothed copy of the spectrum plus a few samples at each end of the axis. The
//! anchors take the raw intensities. Peaks sit above their surroundings, so the
//! minima between them follow the background.

use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::lm::LmConfig;
use crate::model::{curve_fit, VaryingSubset};
use crate::models::thermal::{ThermalBackground, ThermalModel};
use crate::parameters::bounds::{Bounds, ParameterBounds};
use crate::signal::smoothing::gaussian_filter1d;
use crate::spectrum::Spectrum;
use crate::utils::stats::min_max;

/// Starting temperature of the fit, in kelvin.
const INITIAL_TEMPERATURE: f64 = 300.0;

/// Lowest temperature the fit may reach, in kelvin.
const MIN_TEMPERATURE: f64 = 1.0;

/// Options of [`thermal_background`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalOptions {
    /// Add an occupation term at ambient temperature. Default: false
    pub ambient_term: bool,

    /// Fit the constant offset; off holds it at zero for spectra whose
    /// electronic background is already removed. Default: true
    pub vary_constant: bool,

    /// Standard deviation of the smoothing used to find minima, in samples. Default: 2
    pub smoothing: f64,

    /// Samples at each end of the axis always used as anchors. Default: 5
    pub edge_samples: usize,

    pub lm: LmConfig,
}

impl Default for ThermalOptions {
    fn default() -> Self {
        Self {
            ambient_term: false,
            vary_constant: true,
            smoothing: 2.0,
            edge_samples: 5,
            lm: LmConfig::default(),
        }
    }
}

impl ThermalOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_ambient_term(mut self, ambient_term: bool) -> Self {
        self.ambient_term = ambient_term;
        self
    }

    pub fn with_vary_constant(mut self, vary_constant: bool) -> Self {
        self.vary_constant = vary_constant;
        self
    }
}

/// Result of [`thermal_background`]; arrays are in the caller's sample order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalFit {
    pub background: ThermalBackground,

    /// The background over the axis.
    pub curve: Array1<f64>,

    /// `(y − background) / transmission`.
    pub signal: Array1<f64>,

    /// Anchor indices on the ascending axis.
    pub anchors: Vec<usize>,

    pub converged: bool,
}

/// Strict local minima of `s` plus `edge` samples at each end, ascending.
fn anchor_indices(s: ArrayView1<f64>, edge: usize) -> Vec<usize> {
    let n = s.len();
    let mut anchors: Vec<usize> = (1..n.saturating_sub(1))
        .filter(|&i| s[i] < s[i - 1] && s[i] < s[i + 1])
        .collect();
    let edge = edge.min(n);
    anchors.extend(0..edge);
    anchors.extend(n - edge..n);
    anchors.sort_unstable();
    anchors.dedup();
    anchors
}

/// Estimate the thermal background of an anti-Stokes spectrum.
///
/// `x` holds Raman shifts in cm⁻¹, all negative. `transmission` is the detector
/// response on the same samples; it multiplies the thermal term but not the
/// constant, and the returned signal is divided by it.
///
/// # Errors
///
/// `InputShape` for an invalid spectrum or a transmission of the wrong length;
/// `InvalidInput` when a shift is not negative or a transmission value is not
/// positive.
pub fn thermal_background(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    transmission: Option<ArrayView1<f64>>,
    options: &ThermalOptions,
) -> Result<ThermalFit> {
    let spectrum = Spectrum::new(x, y)?;
    let (x, y) = (spectrum.x(), spectrum.y());
    let (_, highest) = spectrum.span();
    if highest >= 0.0 {
        return Err(SpecFitError::InvalidInput(format!(
            "thermal background needs anti-Stokes shifts below zero, axis reaches {}",
            highest
        )));
    }
    let transmission = match transmission {
        Some(t) => spectrum.ascending(t)?,
        None => Array1::ones(spectrum.len()),
    };
    if transmission.iter().any(|&t| !(t.is_finite() && t > 0.0)) {
        return Err(SpecFitError::InvalidInput(
            "transmission must be positive and finite".to_string(),
        ));
    }

    let smooth = gaussian_filter1d(y.view(), options.smoothing);
    let anchors = anchor_indices(smooth.view(), options.edge_samples);
    let xa: Array1<f64> = anchors.iter().map(|&i| x[i]).collect();
    let ya: Array1<f64> = anchors.iter().map(|&i| y[i]).collect();
    let ta: Array1<f64> = anchors.iter().map(|&i| transmission[i]).collect();
    debug!("thermal background: {} anchors", anchors.len());

    let model = ThermalModel {
        ambient: options.ambient_term,
        transmission: Some(&ta),
    };
    let (y_min, y_max) = min_max(y.view());
    let unit = model.background(&Array1::from_vec(vec![1.0, INITIAL_TEMPERATURE, 0.0]));
    let peak_population = x
        .iter()
        .map(|&v| unit.population(v))
        .fold(0.0f64, f64::max);
    let amplitude = if peak_population > 0.0 {
        (y_max - y_min) / peak_population
    } else {
        1.0
    };
    let constant = if options.vary_constant { y_min } else { 0.0 };
    let initial = Array1::from_vec(vec![amplitude, INITIAL_TEMPERATURE, constant]);

    let (values, converged) = if options.vary_constant {
        let bounds = ParameterBounds::from_vec(vec![
            Bounds::min_only(0.0),
            Bounds::min_only(MIN_TEMPERATURE),
            Bounds::unbounded(),
        ]);
        let fit = curve_fit(&model, &xa, &ya, &initial, &bounds, &options.lm)?;
        (fit.values, fit.success)
    } else {
        let held = VaryingSubset::new(&model, initial, vec![0, 1])?;
        let bounds =
            ParameterBounds::from_vec(vec![Bounds::min_only(0.0), Bounds::min_only(MIN_TEMPERATURE)]);
        let fit = curve_fit(&held, &xa, &ya, &held.initial(), &bounds, &options.lm)?;
        (held.expand(&fit.values), fit.success)
    };
    if !converged {
        warn!("thermal background fit did not converge");
    }

    let background = model.background(&values);
    let curve = background.eval_many(x.view(), Some(transmission.view()));
    let signal = (y - &curve) / &transmission;
    info!(
        "thermal background: T = {:.1} K, amplitude {:.4e}, constant {:.4e}",
        background.temperature, background.amplitude, background.constant
    );

    Ok(ThermalFit {
        background,
        curve: spectrum.restore_order(curve),
        signal: spectrum.restore_order(signal),
        anchors,
        converged,
    })
}
