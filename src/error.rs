use thiserror::Error;

/// Error types for the dispfit-rs library.
///
/// Numerical degeneracies inside the model functions are never reported through
/// this type; they are resolved locally by limit or sentinel substitution.
#[derive(Error, Debug)]
pub enum DispError {
    /// Missing setup or an incompatible model / experiment pairing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A parameter name outside the known vocabulary.
    #[error("Unknown parameter name: '{0}'")]
    UnknownParameter(String),

    /// A parameter that exists but has no meaning for the given model.
    #[error("The parameter '{param}' is not part of the {model} model")]
    ParameterNotInModel { param: String, model: String },

    /// A spin or cluster lacks the observables needed for fitting.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Error indicating a mismatch in array or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating the algorithm failed to converge.
    #[error("Algorithm failed to converge: {0}")]
    ConvergenceFailure(String),

    /// Error indicating optimisation failed.
    #[error("Optimisation failed: {0}")]
    Optimisation(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lookup of a spin or cluster identifier failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for dispfit-rs operations.
pub type Result<T> = std::result::Result<T, DispError>;

impl DispError {
    /// Whether this error signals caller misuse that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispError::Configuration(_)
                | DispError::UnknownParameter(_)
                | DispError::ParameterNotInModel { .. }
                | DispError::DimensionMismatch(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispError::DimensionMismatch("expected 3 values, got 2".to_string());
        assert!(format!("{}", err).contains("expected 3 values, got 2"));

        let err = DispError::ParameterNotInModel {
            param: "k_AB".to_string(),
            model: "CR72".to_string(),
        };
        let text = format!("{}", err);
        assert!(text.contains("k_AB"));
        assert!(text.contains("CR72"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DispError::Configuration("no model".to_string()).is_fatal());
        assert!(DispError::UnknownParameter("foo".to_string()).is_fatal());
        assert!(!DispError::InsufficientData("spin :1".to_string()).is_fatal());
        assert!(!DispError::ConvergenceFailure("max iterations".to_string()).is_fatal());
    }

    #[test]
    fn test_json_conversion() {
        let json_err = serde_json::from_str::<f64>("not a number").unwrap_err();
        let err: DispError = json_err.into();
        match err {
            DispError::JsonError(_) => (),
            _ => panic!("Expected JsonError variant"),
        }
    }
}
