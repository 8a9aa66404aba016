//! Errors surfaced by the lifecycle handlers.
//!
//! The kinds matter for logs only: on the wire every failure is a single
//! `{"Err": "<message>"}` body.

use std::path::PathBuf;

use axum::response::{IntoResponse, Response};
use libengine::EngineError;
use thiserror::Error;

use crate::protocol::ErrorResponse;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume {0} not found")]
    NotFound(String),

    #[error("volume {0} is currently used by a container")]
    InUse(String),

    #[error("invalid volume name {0:?}")]
    InvalidName(String),

    #[error("{} already exists and it's not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("{context}: {source}")]
    Orchestration {
        context: &'static str,
        #[source]
        source: EngineError,
    },
}

impl VolumeError {
    /// Wrap an engine failure together with the step that failed.
    pub fn orchestration(context: &'static str) -> impl FnOnce(EngineError) -> Self {
        move |source| Self::Orchestration { context, source }
    }
}

impl IntoResponse for VolumeError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "volume request failed");
        ErrorResponse {
            err: self.to_string(),
        }
        .into_response()
    }
}
