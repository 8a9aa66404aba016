//! Registry backed by an Xline (etcd-compatible) cluster.
//!
//! k: `<prefix>/volumes/<name>`, v: JSON-encoded [`Volume`].

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, KvClient, PutOptions};
use tracing::{debug, info};

use super::{Registry, RegistryError};
use crate::config::XlineConfig;
use crate::volume::Volume;

#[derive(Clone)]
pub struct XlineRegistry {
    kv: KvClient,
    prefix: String,
}

impl XlineRegistry {
    pub async fn connect(config: &XlineConfig) -> Result<Self, RegistryError> {
        let mut opts = if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            ConnectOptions::default().with_user(user.clone(), pass.clone())
        } else {
            ConnectOptions::default()
        };
        if let Some(secs) = config.connect_timeout {
            opts = opts.with_connect_timeout(Duration::from_secs(secs));
        }

        let client = Client::connect(config.endpoints.clone(), Some(opts)).await?;
        info!(endpoints = ?config.endpoints, prefix = %config.prefix, "connected to xline");
        Ok(Self {
            kv: client.kv_client(),
            prefix: config.prefix.trim_end_matches('/').to_owned(),
        })
    }

    fn volumes_prefix(&self) -> String {
        format!("{}/volumes/", self.prefix)
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.volumes_prefix())
    }
}

#[async_trait]
impl Registry for XlineRegistry {
    async fn get(&self, name: &str) -> Result<Option<Volume>, RegistryError> {
        let mut kv = self.kv.clone();
        let resp = kv.get(self.key(name), None).await?;
        match resp.kvs().first() {
            Some(entry) => Ok(Some(serde_json::from_slice(entry.value())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, volume: &Volume) -> Result<(), RegistryError> {
        let value = serde_json::to_vec(volume)?;
        let mut kv = self.kv.clone();
        kv.put(self.key(&volume.name), value, Some(PutOptions::new()))
            .await?;
        debug!(volume = %volume.name, connections = volume.connections, "volume stored");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let mut kv = self.kv.clone();
        let resp = kv.delete(self.key(name), None).await?;
        if resp.deleted() == 0 {
            return Err(RegistryError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Volume>, RegistryError> {
        let mut kv = self.kv.clone();
        let resp = kv
            .get(self.volumes_prefix(), Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs()
            .iter()
            .map(|entry| serde_json::from_slice(entry.value()).map_err(RegistryError::from))
            .collect()
    }

    fn shared(&self) -> bool {
        true
    }
}
