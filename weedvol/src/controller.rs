//! The per-volume lifecycle state machine.
//!
//! ```text
//! Absent --create--> Unmounted --mount--> Mounted --unmount (last)--> Unmounted --remove--> Absent
//!                                  ^  |
//!                                  +--+ mount / unmount (not last)
//! ```
//!
//! Helper containers are started on the 0 → 1 connection transition and
//! stopped on 1 → 0. Around each of those side effects an [`Intent`] is
//! persisted first and cleared afterwards so an interrupted transition can be
//! finished by [`Controller::reconcile`] or by the next mount.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::error::VolumeError;
use crate::orchestrator::MountOrchestrator;
use crate::registry::{Registry, RegistryError};
use crate::volume::{Intent, Volume};

pub const SCOPE: &str = "local";

pub struct Controller {
    registry: Arc<dyn Registry>,
    orchestrator: MountOrchestrator,
    volume_root: PathBuf,
    locks: NameLocks,
}

impl Controller {
    pub fn new(
        registry: Arc<dyn Registry>,
        orchestrator: MountOrchestrator,
        volume_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            volume_root: volume_root.into(),
            locks: NameLocks::default(),
        }
    }

    async fn lock(&self, name: &str) -> NameGuard<'_> {
        self.locks.lock(name).await
    }

    async fn fetch(&self, name: &str) -> Result<Volume, VolumeError> {
        self.registry
            .get(name)
            .await?
            .ok_or_else(|| VolumeError::NotFound(name.to_owned()))
    }

    #[instrument(skip(self))]
    pub async fn create(
        &self,
        name: &str,
        opts: &BTreeMap<String, String>,
    ) -> Result<(), VolumeError> {
        let mut volume = Volume::new(name, opts, &self.volume_root)?;
        let _guard = self.lock(name).await;
        // A re-create refreshes options but must not forget live mounts.
        if let Some(existing) = self.registry.get(name).await? {
            volume.connections = existing.connections;
            volume.intent = existing.intent;
        }
        self.registry.put(&volume).await?;
        info!(mountpoint = %volume.mountpoint.display(), options = ?volume.options, "volume created");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        let _guard = self.lock(name).await;
        let volume = self.fetch(name).await?;
        if volume.in_use() {
            return Err(VolumeError::InUse(name.to_owned()));
        }
        // The record is the only trace of a helper left by a failed unmount.
        if let Some(intent) = volume.intent {
            warn!(%intent, "stopping leftover helper before removal");
            self.orchestrator.stop(&volume).await?;
        }

        match tokio::fs::remove_dir_all(&volume.mountpoint).await {
            Ok(()) => debug!(mountpoint = %volume.mountpoint.display(), "mountpoint removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(mountpoint = %volume.mountpoint.display(), error = %e, "failed to remove mountpoint"),
        }

        self.registry.delete(name).await.map_err(|e| match e {
            RegistryError::NotFound(name) => VolumeError::NotFound(name),
            e => e.into(),
        })?;
        info!("volume removed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn mount(&self, name: &str, id: &str) -> Result<PathBuf, VolumeError> {
        let _guard = self.lock(name).await;
        let mut volume = self.fetch(name).await?;

        if let Some(intent) = volume.intent {
            warn!(%intent, "found interrupted transition, stopping leftover helper");
            if let Err(e) = self.orchestrator.stop(&volume).await {
                warn!(error = %e, "cleanup of leftover helper failed");
            }
            volume.connections = 0;
            volume.intent = None;
        }

        if volume.connections == 0 {
            volume.intent = Some(Intent::Starting);
            self.registry.put(&volume).await?;

            let started = match prepare_mountpoint(&volume.mountpoint).await {
                Ok(()) => self.orchestrator.start(&volume).await,
                Err(e) => Err(e),
            };
            if let Err(e) = started {
                volume.intent = None;
                if let Err(put_err) = self.registry.put(&volume).await {
                    warn!(error = %put_err, "failed to clear start intent");
                }
                return Err(e);
            }

            volume.connections = 1;
            volume.intent = None;
        } else {
            volume.connections += 1;
        }
        self.registry.put(&volume).await?;

        info!(connections = volume.connections, "volume mounted");
        Ok(volume.mountpoint)
    }

    #[instrument(skip(self))]
    pub async fn unmount(&self, name: &str, id: &str) -> Result<(), VolumeError> {
        let _guard = self.lock(name).await;
        let mut volume = self.fetch(name).await?;

        match volume.connections {
            0 => {
                warn!("unmount of a volume with no connections, ignoring");
                return Ok(());
            }
            1 => {
                volume.connections = 0;
                volume.intent = Some(Intent::Stopping);
                self.registry.put(&volume).await?;

                self.orchestrator.stop(&volume).await?;

                volume.intent = None;
                self.registry.put(&volume).await?;
            }
            _ => {
                volume.connections -= 1;
                self.registry.put(&volume).await?;
            }
        }

        info!(connections = volume.connections, "volume unmounted");
        Ok(())
    }

    pub async fn path(&self, name: &str) -> Result<PathBuf, VolumeError> {
        Ok(self.fetch(name).await?.mountpoint)
    }

    pub async fn get(&self, name: &str) -> Result<Volume, VolumeError> {
        self.fetch(name).await
    }

    pub async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        Ok(self.registry.list().await?)
    }

    pub fn capabilities(&self) -> &'static str {
        SCOPE
    }

    /// Finish transitions a previous process left half done: run the stop
    /// sequence again and mark the volume unmounted. Skipped for shared
    /// registries, where the intent may belong to another host.
    pub async fn reconcile(&self) -> Result<usize, VolumeError> {
        if self.registry.shared() {
            debug!("shared registry, skipping reconciliation");
            return Ok(0);
        }

        let mut reconciled = 0;
        for volume in self.registry.list().await? {
            let Some(intent) = volume.intent else {
                continue;
            };
            let _guard = self.lock(&volume.name).await;
            warn!(volume = %volume.name, %intent, "reconciling interrupted transition");

            if let Err(e) = self.orchestrator.stop(&volume).await {
                warn!(volume = %volume.name, error = %e, "stop during reconciliation failed");
            }
            let volume = Volume {
                connections: 0,
                intent: None,
                ..volume
            };
            self.registry.put(&volume).await?;
            reconciled += 1;
        }

        if reconciled > 0 {
            info!(count = reconciled, "reconciliation finished");
        }
        Ok(reconciled)
    }
}

/// Serialises mutations of one volume name. Entries are dropped once no
/// task holds or waits for them.
#[derive(Default)]
struct NameLocks(Mutex<HashMap<String, Arc<AsyncMutex<()>>>>);

struct NameGuard<'a> {
    locks: &'a NameLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lock(&self, name: &str) -> NameGuard<'_> {
        let lock = self.table().entry(name.to_owned()).or_default().clone();
        NameGuard {
            locks: self,
            name: name.to_owned(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.locks.table();
        drop(self.guard.take());
        if table
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.name);
        }
    }
}

/// Accept an existing directory, create a missing one with mode 0755, and
/// refuse anything else.
async fn prepare_mountpoint(path: &Path) -> Result<(), VolumeError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(VolumeError::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(path)
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
