//! Worker error types
//!
//! One taxonomy for the whole dispatch core. The variants matter to
//! callers: `TransientNetwork` is retried with backoff at the layer that
//! issued the call, `AuthenticationFailed` stops the worker, and
//! `EngineRejected` surfaces engine-side refusals that retrying cannot fix.

use thiserror::Error;

/// Worker foundation error type
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Handler already registered for task type: {0}")]
    DuplicateRegistration(String),

    #[error("No handler registered for task type: {0}")]
    HandlerNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Engine rejected request ({status}): {message}")]
    EngineRejected { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job source error: {0}")]
    JobSource(String),

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    /// Transient errors are safe to retry after a backoff. Everything else
    /// is either fatal or needs a code/config change.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::TransientNetwork(_))
    }

    /// Fatal errors terminate the worker rather than one loop iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::AuthenticationFailed(_))
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return WorkerError::TransientNetwork(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return WorkerError::AuthenticationFailed(err.to_string());
            }
            if status.is_server_error() {
                return WorkerError::TransientNetwork(err.to_string());
            }
            return WorkerError::EngineRejected {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        WorkerError::TransientNetwork(err.to_string())
    }
}

/// Result type alias for WorkerError
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WorkerError::TransientNetwork("connection reset".to_string()).is_transient());
        assert!(!WorkerError::AuthenticationFailed("bad credentials".to_string()).is_transient());
        assert!(!WorkerError::Configuration("missing client id".to_string()).is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(WorkerError::AuthenticationFailed("expired secret".to_string()).is_fatal());
        assert!(!WorkerError::TransientNetwork("timeout".to_string()).is_fatal());
        assert!(!WorkerError::ShutdownInProgress.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::EngineRejected {
            status: 400,
            message: "unknown job key".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Engine rejected request (400): unknown job key"
        );

        let err = WorkerError::HandlerNotFound("validate-lead".to_string());
        assert!(err.to_string().contains("validate-lead"));
    }
}
