//! Box constraints on fit parameters.
//!
//! Every parameter of a flat fit vector carries a `Bounds`. The solver keeps its
//! iterates feasible by projecting each trial point onto the box described by a
//! `ParameterBounds`, so the model is never evaluated outside the bounds.
//!
//! [`BoundsTransform`] is the alternative: a change of variables that maps an
//! unbounded internal value onto the box, so an unconstrained solver cannot leave
//! it.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Expected bounds for {expected} parameters, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Represents the bounds constraints on a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        // JSON has no infinity, so open ends are written as null
        let mut state = serializer.serialize_struct("Bounds", 2)?;
        let min = if self.min.is_finite() { Some(self.min) } else { None };
        let max = if self.max.is_finite() { Some(self.max) } else { None };
        state.serialize_field("min", &min)?;
        state.serialize_field("max", &max)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            min: Option<f64>,

            #[serde(default)]
            max: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;

        let min = helper.min.unwrap_or(NEG_INFINITY);
        let max = helper.max.unwrap_or(INFINITY);

        Ok(Bounds { min, max })
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }
}

impl Bounds {
    /// Create a new bounds constraints with min and max values
    ///
    /// # Examples
    ///
    /// ```
    /// use specfit_rs::parameters::bounds::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 10.0).unwrap();
    /// assert_eq!(bounds.min, 0.0);
    /// assert_eq!(bounds.max, 10.0);
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min > max || min.is_nan() || max.is_nan() {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// Create an unbounded constraint (negative infinity to positive infinity)
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Create a bounds constraint with only a minimum value
    pub fn min_only(min: f64) -> Self {
        Self { min, max: INFINITY }
    }

    /// Create a bounds constraint with only a maximum value
    pub fn max_only(max: f64) -> Self {
        Self {
            min: NEG_INFINITY,
            max,
        }
    }

    /// Check if a value is within the bounds
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp a value to be within the bounds
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Whether `value` sits on the lower bound.
    pub fn at_lower(&self, value: f64) -> bool {
        self.min.is_finite() && value <= self.min
    }

    /// Whether `value` sits on the upper bound.
    pub fn at_upper(&self, value: f64) -> bool {
        self.max.is_finite() && value >= self.max
    }

    pub fn has_lower_bound(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.max.is_finite()
    }
}

/// Change of variables between an unbounded internal value and a bounded one.
///
/// One-sided bounds use `min - 1 + √(i² + 1)` (or its mirror), two-sided bounds
/// use `min + (sin i + 1)·(max - min)/2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsTransform {
    bounds: Bounds,
}

impl BoundsTransform {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// Bounded value of an internal value.
    pub fn to_external(&self, internal_value: f64) -> f64 {
        let b = &self.bounds;
        match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => internal_value,
            (true, false) => b.min - 1.0 + (internal_value * internal_value + 1.0).sqrt(),
            (false, true) => b.max + 1.0 - (internal_value * internal_value + 1.0).sqrt(),
            (true, true) => b.min + (internal_value.sin() + 1.0) * (b.max - b.min) / 2.0,
        }
    }

    /// Internal value of a bounded value; values outside the box are clamped first.
    pub fn to_internal(&self, external_value: f64) -> f64 {
        let b = &self.bounds;
        let v = b.clamp(external_value);
        match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => v,
            (true, false) => ((v - b.min + 1.0).powi(2) - 1.0).sqrt(),
            (false, true) => ((b.max - v + 1.0).powi(2) - 1.0).sqrt(),
            (true, true) => {
                if b.max == b.min {
                    return 0.0;
                }
                (2.0 * (v - b.min) / (b.max - b.min) - 1.0).clamp(-1.0, 1.0).asin()
            }
        }
    }

    /// `d external / d internal` at an internal value.
    pub fn derivative(&self, internal_value: f64) -> f64 {
        let b = &self.bounds;
        let i = internal_value;
        match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => 1.0,
            (true, false) => i / (i * i + 1.0).sqrt(),
            (false, true) => -i / (i * i + 1.0).sqrt(),
            (true, true) => i.cos() * (b.max - b.min) / 2.0,
        }
    }
}

/// Bounds for every entry of a flat parameter vector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterBounds {
    bounds: Vec<Bounds>,
}

impl ParameterBounds {
    /// All parameters unbounded.
    pub fn unbounded(n: usize) -> Self {
        Self {
            bounds: vec![Bounds::unbounded(); n],
        }
    }

    pub fn from_vec(bounds: Vec<Bounds>) -> Self {
        Self { bounds }
    }

    /// Append the bounds of one more parameter.
    pub fn push(&mut self, bounds: Bounds) {
        self.bounds.push(bounds);
    }

    pub fn extend(&mut self, other: &ParameterBounds) {
        self.bounds.extend_from_slice(&other.bounds);
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bounds> {
        self.bounds.get(index)
    }

    /// Replace the bounds of one parameter; out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, bounds: Bounds) {
        if let Some(b) = self.bounds.get_mut(index) {
            *b = bounds;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bounds> {
        self.bounds.iter()
    }

    /// Check the bounds describe `n` parameters.
    pub fn check_len(&self, n: usize) -> Result<(), BoundsError> {
        if self.bounds.len() != n {
            return Err(BoundsError::LengthMismatch {
                expected: n,
                actual: self.bounds.len(),
            });
        }
        Ok(())
    }

    /// Project a parameter vector onto the box.
    pub fn project(&self, params: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(
            params
                .iter()
                .zip(self.bounds.iter())
                .map(|(&p, b)| b.clamp(p)),
        )
    }

    fn transforms(&self) -> impl Iterator<Item = BoundsTransform> + '_ {
        self.bounds.iter().map(|&b| BoundsTransform::new(b))
    }

    /// Internal values of a parameter vector, see [`BoundsTransform`].
    pub fn to_internal(&self, params: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(params.iter().zip(self.transforms()).map(|(&p, t)| t.to_internal(p)))
    }

    /// Bounded values of an internal vector.
    pub fn to_external(&self, internal: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(internal.iter().zip(self.transforms()).map(|(&i, t)| t.to_external(i)))
    }

    /// `d external / d internal` for every entry of an internal vector.
    pub fn external_derivative(&self, internal: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(internal.iter().zip(self.transforms()).map(|(&i, t)| t.derivative(i)))
    }

    /// Whether every parameter lies inside its bounds.
    pub fn contains(&self, params: &Array1<f64>) -> bool {
        params
            .iter()
            .zip(self.bounds.iter())
            .all(|(&p, b)| b.is_within_bounds(p))
    }

    /// Zero the gradient components that point out of the box at active bounds.
    ///
    /// `gradient` is the gradient of the cost; a descent step moves along its
    /// negative, so a positive component at the lower bound (or a negative one at
    /// the upper bound) cannot be followed.
    pub fn project_gradient(&self, params: &Array1<f64>, gradient: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(
            params
                .iter()
                .zip(gradient.iter())
                .zip(self.bounds.iter())
                .map(|((&p, &g), b)| {
                    if (b.at_lower(p) && g > 0.0) || (b.at_upper(p) && g < 0.0) {
                        0.0
                    } else {
                        g
                    }
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_bounds_creation() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();
        assert_eq!(bounds.min, 0.0);
        assert_eq!(bounds.max, 10.0);

        assert!(Bounds::new(10.0, 0.0).is_err());

        let bounds = Bounds::unbounded();
        assert_eq!(bounds.min, NEG_INFINITY);
        assert_eq!(bounds.max, INFINITY);

        let bounds = Bounds::min_only(5.0);
        assert_eq!(bounds.min, 5.0);
        assert!(bounds.max.is_infinite());
    }

    #[test]
    fn test_clamp_and_activity() {
        let bounds = Bounds::new(0.0, 1.0).unwrap();
        assert_eq!(bounds.clamp(-3.0), 0.0);
        assert_eq!(bounds.clamp(0.25), 0.25);
        assert_eq!(bounds.clamp(4.0), 1.0);
        assert!(bounds.at_lower(0.0));
        assert!(bounds.at_upper(1.0));
        assert!(!Bounds::unbounded().at_lower(-1e300));
    }

    #[test]
    fn test_projection() {
        let pb = ParameterBounds::from_vec(vec![
            Bounds::unbounded(),
            Bounds::min_only(0.0),
            Bounds::new(-1.0, 1.0).unwrap(),
        ]);
        let projected = pb.project(&array![-5.0, -2.0, 3.0]);
        assert_eq!(projected, array![-5.0, 0.0, 1.0]);
        assert!(pb.contains(&projected));

        // Gradient pushing the second parameter below zero is suppressed
        let g = pb.project_gradient(&projected, &array![1.0, 2.0, -1.0]);
        assert_eq!(g, array![1.0, 0.0, 0.0]);
        let g = pb.project_gradient(&projected, &array![1.0, -2.0, 1.0]);
        assert_eq!(g, array![1.0, -2.0, 1.0]);
    }

    #[test]
    fn test_transform_round_trip_stays_inside() {
        let pb = ParameterBounds::from_vec(vec![
            Bounds::unbounded(),
            Bounds::min_only(0.0),
            Bounds::max_only(2.0),
            Bounds::new(-1.0, 3.0).unwrap(),
        ]);
        let external = array![-7.5, 4.0, -3.0, 0.5];
        let internal = pb.to_internal(&external);
        let back = pb.to_external(&internal);
        for (a, b) in external.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-12);
        }

        // Any internal value maps into the box
        for i in [-1e3, -2.0, 0.0, 0.3, 7.0, 1e3] {
            let e = pb.to_external(&array![i, i, i, i]);
            assert!(pb.contains(&e));
        }

        // Outside values are clamped on the way in
        let back = pb.to_external(&pb.to_internal(&array![0.0, -5.0, 9.0, 10.0]));
        assert!((back[1] - 0.0).abs() < 1e-12);
        assert!((back[2] - 2.0).abs() < 1e-12);
        assert!((back[3] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_transform_derivative_matches_difference() {
        let pb = ParameterBounds::from_vec(vec![Bounds::min_only(1.0), Bounds::new(0.0, 4.0).unwrap()]);
        let internal = array![0.7, -0.4];
        let d = pb.external_derivative(&internal);
        let h = 1e-6;
        for k in 0..2 {
            let mut up = internal.clone();
            let mut down = internal.clone();
            up[k] += h;
            down[k] -= h;
            let numeric = (pb.to_external(&up)[k] - pb.to_external(&down)[k]) / (2.0 * h);
            assert!((numeric - d[k]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_serde_open_ends() {
        let bounds = Bounds::min_only(0.0);
        let json = serde_json::to_string(&bounds).unwrap();
        assert_eq!(json, r#"{"min":0.0,"max":null}"#);
        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bounds);
    }

    #[test]
    fn test_length_check() {
        let pb = ParameterBounds::unbounded(3);
        assert!(pb.check_len(3).is_ok());
        assert_eq!(
            pb.check_len(4),
            Err(BoundsError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
