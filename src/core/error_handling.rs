//! Error taxonomy for the download orchestrator
//!
//! Every fallible operation in the core reports one of a small, closed set of
//! errors. Callers use [`OrchestratorError::is_retryable`] and
//! [`OrchestratorError::category`] to decide what to show and whether a
//! "try again" button makes sense. The core itself never retries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::models::SessionState;

/// Coarse error categories used for display grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Caller supplied something unusable (empty URL, bad endpoint)
    Input,
    /// Backend endpoint did not answer the reachability probe
    Connectivity,
    /// Transient I/O failure during a request
    Network,
    /// Backend answered and explicitly rejected the operation
    Backend,
    /// Backend answered with something that does not fit the contract
    Protocol,
    /// Operation attempted from a session state that forbids it
    State,
    /// Local persistence failed
    Storage,
}

/// Session operations that can be rejected by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAction {
    Start,
    Cancel,
    Retry,
}

impl std::fmt::Display for SessionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the orchestration core
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    Network(String),

    /// `code` is the HTTP status when the rejection came from a response,
    /// `None` when it arrived as an `error` event on the progress stream.
    #[error("{message}")]
    Backend { code: Option<u16>, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Cannot {action} session {session_id} while it is {from}")]
    InvalidStateTransition {
        session_id: String,
        from: SessionState,
        action: SessionAction,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl OrchestratorError {
    /// Whether a caller-driven retry can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unreachable(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) => ErrorCategory::Input,
            Self::Unreachable(_) => ErrorCategory::Connectivity,
            Self::Network(_) => ErrorCategory::Network,
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::MalformedResponse(_) => ErrorCategory::Protocol,
            Self::InvalidStateTransition { .. } => ErrorCategory::State,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Text suitable for a session's `error_detail`.
    ///
    /// Backend messages are passed through untouched; everything else gets
    /// its category prefix from `Display`.
    pub fn detail(&self) -> String {
        match self {
            Self::Backend {
                code: Some(code),
                message,
            } => format!("{message} (code {code})"),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::MalformedResponse(error.to_string())
        } else if let (true, Some(status)) = (error.is_status(), error.status()) {
            Self::Backend {
                code: Some(status.as_u16()),
                message: error.to_string(),
            }
        } else if error.is_timeout() {
            Self::Network(format!("request timed out: {error}"))
        } else {
            Self::Network(error.to_string())
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        Self::MalformedResponse(error.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Result type alias for orchestrator operations
pub type AppResult<T> = Result<T, OrchestratorError>;

/// Convenience constructors used across the core
pub mod errors {
    use super::OrchestratorError;

    pub fn invalid_input(message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::InvalidInput(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::MalformedResponse(message.into())
    }

    pub fn backend(code: Option<u16>, message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::Backend {
            code,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::Storage(message.into())
    }
}
