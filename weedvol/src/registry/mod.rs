//! Durable store of [`Volume`] records, keyed by name.
//!
//! Two interchangeable backends sit behind the [`Registry`] trait and are
//! picked at startup:
//!
//! - [`local::LocalRegistry`]: one JSON state file on this host.
//! - [`xline::XlineRegistry`]: one key per volume in an Xline/etcd cluster,
//!   so several hosts see the same volumes.

pub mod local;
pub mod xline;

use async_trait::async_trait;
use thiserror::Error;

use crate::volume::Volume;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("volume {0} not found")]
    NotFound(String),

    #[error("state file {path}: {source}")]
    State {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Xline(#[from] Box<etcd_client::Error>),

    #[error("registry task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<etcd_client::Error> for RegistryError {
    fn from(e: etcd_client::Error) -> Self {
        RegistryError::Xline(Box::new(e))
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch one record. A missing record is `Ok(None)`; an error means the
    /// state is unknown, not that the volume is absent.
    async fn get(&self, name: &str) -> Result<Option<Volume>, RegistryError>;

    /// Insert or fully replace the record for `volume.name`.
    async fn put(&self, volume: &Volume) -> Result<(), RegistryError>;

    /// Delete one record, failing with [`RegistryError::NotFound`] if absent.
    async fn delete(&self, name: &str) -> Result<(), RegistryError>;

    /// All records, in no particular order.
    async fn list(&self) -> Result<Vec<Volume>, RegistryError>;

    /// Whether other hosts read and write the same records.
    fn shared(&self) -> bool {
        false
    }
}
