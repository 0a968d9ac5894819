//! Error types for mdao-components.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("cannot parse '{expr}' at position {pos}: {msg}")]
    Parse {
        expr: String,
        pos: usize,
        msg: String,
    },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' takes {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid component definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Core(#[from] mdao_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
