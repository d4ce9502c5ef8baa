//! Box bounds on solver parameters.

pub mod bounds;

pub use bounds::{Bounds, BoundsError, BoundsTransform, ParameterBounds};
