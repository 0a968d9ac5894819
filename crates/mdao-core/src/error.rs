//! Error types for mdao-core.

use thiserror::Error;

use crate::vector::VarRole;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("'{system}': Attempt to set value of '{name}' in {role} vector when it is read only.")]
    ReadOnlyViolation {
        system: String,
        name: String,
        role: VarRole,
    },

    #[error("'{system}': analysis failed: {msg}")]
    AnalysisFailure { system: String, msg: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("variable not found: '{0}'")]
    VariableNotFound(String),

    #[error("'{system}': partial derivative of '{of}' with respect to '{wrt}' was not declared")]
    UndeclaredPartial {
        system: String,
        of: String,
        wrt: String,
    },

    #[error("size mismatch for '{name}': expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{system}': {operation} is not implemented")]
    NotImplemented {
        system: String,
        operation: &'static str,
    },
}

impl Error {
    /// Recoverable numeric failure raised from inside a component callback.
    ///
    /// The owning system path is filled in by the caller via [`Error::in_system`].
    pub fn analysis(msg: impl Into<String>) -> Self {
        Error::AnalysisFailure {
            system: String::new(),
            msg: msg.into(),
        }
    }

    /// Attach a system path to errors that were raised without one.
    pub fn in_system(self, path: &str) -> Self {
        match self {
            Error::AnalysisFailure { system, msg } if system.is_empty() => {
                Error::AnalysisFailure {
                    system: path.to_string(),
                    msg,
                }
            }
            Error::UndeclaredPartial { system, of, wrt } if system.is_empty() => {
                Error::UndeclaredPartial {
                    system: path.to_string(),
                    of,
                    wrt,
                }
            }
            Error::NotImplemented { system, operation } if system.is_empty() => {
                Error::NotImplemented {
                    system: path.to_string(),
                    operation,
                }
            }
            other => other,
        }
    }

    /// Whether a caller may catch this error and retry with adjusted inputs.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AnalysisFailure { .. } | Error::ReadOnlyViolation { .. }
        )
    }

    pub fn is_analysis_failure(&self) -> bool {
        matches!(self, Error::AnalysisFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_message() {
        let err = Error::ReadOnlyViolation {
            system: "bad".into(),
            name: "a".into(),
            role: VarRole::Input,
        };
        assert_eq!(
            err.to_string(),
            "'bad': Attempt to set value of 'a' in input vector when it is read only."
        );
    }

    #[test]
    fn test_in_system_fills_empty_path_only() {
        let err = Error::analysis("negative discriminant").in_system("comp1");
        assert_eq!(
            err,
            Error::AnalysisFailure {
                system: "comp1".into(),
                msg: "negative discriminant".into()
            }
        );

        let err = err.in_system("outer");
        assert!(matches!(err, Error::AnalysisFailure { ref system, .. } if system == "comp1"));
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::analysis("x").is_recoverable());
        assert!(!Error::Configuration("x".into()).is_recoverable());
    }
}
