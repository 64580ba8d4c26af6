//! Error types for rule registration and configuration resolution.

use serde::{Deserialize, Serialize};
use std::fmt;

use cascade_criteria::SelectorError;

/// Stable error codes, used by automation and the CLI's JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A mandatory input is missing, empty, or contains null entries.
    ArgumentRequired,
    /// A supplied value has the wrong shape or resolves to nothing usable.
    ArgumentInvalid,
    /// A well-formed request cannot be satisfied in the current state.
    OperationInvalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgumentRequired => write!(f, "ARGUMENT_REQUIRED"),
            Self::ArgumentInvalid => write!(f, "ARGUMENT_INVALID"),
            Self::OperationInvalid => write!(f, "OPERATION_INVALID"),
        }
    }
}

/// Errors raised by the engine and its collaborators.
///
/// Nothing is recovered silently: any of these aborts the whole `add` or
/// `select` call that raised it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CascadeError {
    #[error("argument required: {0}")]
    ArgumentRequired(String),

    #[error("argument invalid: {0}")]
    ArgumentInvalid(String),

    #[error("operation invalid: {0}")]
    OperationInvalid(String),
}

impl CascadeError {
    pub fn required(message: impl Into<String>) -> Self {
        Self::ArgumentRequired(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::ArgumentInvalid(message.into())
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::OperationInvalid(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArgumentRequired(_) => ErrorKind::ArgumentRequired,
            Self::ArgumentInvalid(_) => ErrorKind::ArgumentInvalid,
            Self::OperationInvalid(_) => ErrorKind::OperationInvalid,
        }
    }

    /// Machine-readable form for JSON error output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<SelectorError> for CascadeError {
    fn from(err: SelectorError) -> Self {
        CascadeError::ArgumentRequired(err.to_string())
    }
}
