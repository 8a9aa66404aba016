//! Engine error types.

use thiserror::Error;

/// Errors returned by an [`Engine`](crate::Engine) implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine reported that the container, exec instance or image does
    /// not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine answered with a non-success status.
    #[error("engine returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the engine's error body.
        message: String,
    },

    /// Reading a response did not finish within the allotted time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// HTTP-level failure talking to the engine socket.
    #[error("transport error: {0}")]
    Transport(#[from] hyper::Error),

    /// Could not reach the engine socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request or response body.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// `true` when the engine reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
