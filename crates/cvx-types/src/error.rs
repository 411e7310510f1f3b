use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid component id {input:?}: {reason}")]
    InvalidComponentId { input: String, reason: String },

    #[error("invalid version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },
}

pub type TypeResult<T> = Result<T, TypeError>;
