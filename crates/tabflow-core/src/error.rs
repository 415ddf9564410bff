use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Plan(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Plan(e.to_string())
    }
}

/// Why a query stopped before draining on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// The caller asked for it (token or `Query::cancel`).
    Canceled,
    /// The query ran past its configured timeout.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Canceled => write!(f, "query canceled"),
            CancelReason::DeadlineExceeded => write!(f, "query deadline exceeded"),
        }
    }
}
