//! Single-host registry persisted to one JSON state file.
//!
//! The whole name → volume map is rewritten on every mutation through a
//! temporary file in the same directory and an atomic rename, so a crash
//! mid-write leaves either the previous or the new state on disk. Memory is
//! only updated after the file write succeeded.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Registry, RegistryError};
use crate::volume::Volume;

pub struct LocalRegistry {
    state_path: PathBuf,
    volumes: RwLock<HashMap<String, Volume>>,
}

impl LocalRegistry {
    /// Load `state_path` if it exists, otherwise start empty.
    ///
    /// A state file that cannot be read or parsed is an error: starting empty
    /// would silently forget mounted volumes.
    pub async fn open(state_path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let state_path = state_path.into();
        let volumes: HashMap<String, Volume> = match tokio::fs::read(&state_path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(state_path = %state_path.display(), "no state found");
                HashMap::new()
            }
            Err(e) => return Err(state_error(&state_path, e)),
        };

        let dir = state_dir(&state_path).to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| state_error(&dir, e))?;

        info!(
            state_path = %state_path.display(),
            count = volumes.len(),
            "local registry loaded",
        );
        Ok(Self {
            state_path,
            volumes: RwLock::new(volumes),
        })
    }

    async fn persist(&self, volumes: &HashMap<String, Volume>) -> Result<(), RegistryError> {
        let data = serde_json::to_vec(volumes)?;
        let path = self.state_path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &data)).await?
    }
}

fn state_dir(state_path: &Path) -> &Path {
    match state_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn state_error(path: &Path, source: std::io::Error) -> RegistryError {
    RegistryError::State {
        path: path.display().to_string(),
        source,
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), RegistryError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".seaweedfs-state")
        .tempfile_in(state_dir(path))
        .map_err(|e| state_error(path, e))?;
    tmp.write_all(data).map_err(|e| state_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| state_error(path, e))?;
    tmp.persist(path).map_err(|e| state_error(path, e.error))?;
    Ok(())
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn get(&self, name: &str) -> Result<Option<Volume>, RegistryError> {
        Ok(self.volumes.read().await.get(name).cloned())
    }

    async fn put(&self, volume: &Volume) -> Result<(), RegistryError> {
        let mut volumes = self.volumes.write().await;
        let mut next = volumes.clone();
        next.insert(volume.name.clone(), volume.clone());
        self.persist(&next).await?;
        *volumes = next;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let mut volumes = self.volumes.write().await;
        if !volumes.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_owned()));
        }
        let mut next = volumes.clone();
        next.remove(name);
        self.persist(&next).await?;
        *volumes = next;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Volume>, RegistryError> {
        Ok(self.volumes.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn volume(name: &str) -> Volume {
        Volume::new(
            name,
            &BTreeMap::from([("uid".to_owned(), "1000".to_owned())]),
            Path::new("/mnt/docker-volumes"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("seaweedfs-state.json");

        {
            let registry = LocalRegistry::open(&path).await.unwrap();
            let mut vol = volume("vol1");
            vol.connections = 2;
            registry.put(&vol).await.unwrap();
            registry.put(&volume("vol2")).await.unwrap();
        }

        let registry = LocalRegistry::open(&path).await.unwrap();
        let vol1 = registry.get("vol1").await.unwrap().unwrap();
        assert_eq!(vol1.mountpoint, PathBuf::from("/mnt/docker-volumes/vol1"));
        assert_eq!(vol1.options, vec!["uid=1000"]);
        assert_eq!(vol1.connections, 2);
        assert!(registry.get("vol2").await.unwrap().is_some());
        assert!(registry.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_reflects_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::open(tmp.path().join("s.json")).await.unwrap();
        registry.put(&volume("a")).await.unwrap();
        registry.put(&volume("b")).await.unwrap();
        registry.delete("a").await.unwrap();

        let names: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::open(tmp.path().join("s.json")).await.unwrap();
        let err = registry.delete("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(n) if n == "ghost"));
    }

    #[tokio::test]
    async fn corrupt_state_fails_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s.json");
        std::fs::write(&path, br#"{"vol1": {"Name": "vol1", "Mountp"#).unwrap();
        let err = LocalRegistry::open(&path).await.err().unwrap();
        assert!(matches!(err, RegistryError::Corrupt(_)));
    }

    #[tokio::test]
    async fn writes_leave_no_temporary_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s.json");
        let registry = LocalRegistry::open(&path).await.unwrap();
        for name in ["a", "b", "c"] {
            registry.put(&volume(name)).await.unwrap();
        }
        registry.delete("b").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("s.json")]);

        let on_disk: HashMap<String, Volume> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 2);
    }
}
