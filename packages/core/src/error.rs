//! Error types shared across the build pipeline.

use thiserror::Error;

use crate::QueueStatus;

/// Per-activity build failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// Required descriptive fields are missing; no build was attempted.
    #[error("Validation failed: missing {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("No generation handle registered after waiting {waited_ms}ms")]
    BridgeUnavailable { waited_ms: u64 },

    #[error("Build timed out after {0}ms")]
    Timeout(u64),

    #[error("Bridge build failed: {0}")]
    Bridge(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(String),

    /// Building the placeholder artifact itself failed.
    #[error("Fallback failed: {0}")]
    Fallback(String),
}

impl BuildError {
    pub fn validation<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BuildError::Validation {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    /// Failures detected before any build work ran.
    pub fn is_validation(&self) -> bool {
        matches!(self, BuildError::Validation { .. })
    }
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        BuildError::Store(err.to_string())
    }
}

/// Misuse of the queue controller, raised at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("No build function configured - call set_build_function before start")]
    MissingBuildFunction,

    #[error("Cannot {operation} while the queue is {status}")]
    InvalidState {
        operation: &'static str,
        status: QueueStatus,
    },
}

/// Key-value artifact store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// External persistence adapter failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("Duplicate artifact code: {0}")]
    Duplicate(String),

    #[error("Persistence backend error: {0}")]
    Backend(String),
}
