use thiserror::Error;

use crate::parameters::bounds::BoundsError;

/// Error types for the specfit-rs library.
///
/// Only structural problems surface as errors. Noise gating, empty peak lists,
/// solver non-convergence and rejected fits are reported through the result types.
#[derive(Error, Debug)]
pub enum SpecFitError {
    /// The spectrum axes are unusable: unequal lengths, non-monotone axis, too few samples.
    #[error("Invalid spectrum shape: {0}")]
    InputShape(String),

    /// Error indicating a mismatch in matrix or vector dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating a singular matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Error during function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// Invalid option or argument value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// Bound constraint error.
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for specfit-rs operations.
pub type Result<T> = std::result::Result<T, SpecFitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpecFitError::InputShape("x has 10 samples, y has 9".to_string());
        assert!(format!("{}", err).contains("x has 10 samples, y has 9"));

        let err = SpecFitError::DimensionMismatch("expected 4 parameters, got 3".to_string());
        assert!(format!("{}", err).contains("expected 4 parameters"));
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<f64>("not json").unwrap_err();
        let err: SpecFitError = json_err.into();
        match err {
            SpecFitError::JsonError(_) => (),
            _ => panic!("Expected JsonError variant"),
        }

        let bounds_err = BoundsError::InvalidBounds { min: 2.0, max: 1.0 };
        let err: SpecFitError = bounds_err.into();
        assert!(matches!(err, SpecFitError::Bounds(_)));
    }
}
