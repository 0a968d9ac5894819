//! Error types for mdao-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] mdao_core::Error),

    #[error("singular matrix")]
    SingularMatrix,

    #[error("'{solver}' failed to converge after {iterations} iterations")]
    ConvergenceFailed { solver: String, iterations: usize },

    #[error("invalid matrix dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("solver error: {0}")]
    SolverError(String),

    #[error("recording failed: {0}")]
    Recording(String),
}

impl Error {
    /// Whether this is a recoverable analysis failure: a component's numeric
    /// failure, or non-convergence promoted to an error.
    pub fn is_analysis_failure(&self) -> bool {
        match self {
            Error::Core(e) => e.is_analysis_failure(),
            Error::ConvergenceFailed { .. } => true,
            _ => false,
        }
    }

    /// Whether a caller may retry after adjusting inputs.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Core(e) => e.is_recoverable(),
            Error::ConvergenceFailed { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Recording(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Recording(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err: Error = mdao_core::Error::analysis("bad point").into();
        assert!(err.is_analysis_failure());
        let err = Error::ConvergenceFailed {
            solver: "NL: Newton".into(),
            iterations: 10,
        };
        assert!(err.is_analysis_failure());
        assert_eq!(err.to_string(), "'NL: Newton' failed to converge after 10 iterations");
        assert!(!Error::SingularMatrix.is_recoverable());
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: Error = mdao_core::Error::VariableNotFound("comp.x".into()).into();
        assert_eq!(err.to_string(), "variable not found: 'comp.x'");
    }
}
