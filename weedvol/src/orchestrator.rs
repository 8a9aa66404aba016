//! Starting and stopping the per-volume FUSE helper containers.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libengine::{BindMount, ContainerSpec, DeviceMapping, Engine, Propagation};
use nix::unistd::{Gid, Group, Uid, User};
use tracing::{debug, info, instrument, warn};

use crate::error::VolumeError;
use crate::plugin_dir::PluginDir;
use crate::volume::{MountOptions, Volume};

/// How helper containers are built.
#[derive(Debug, Clone)]
pub struct HelperSettings {
    pub image: String,
    pub filer: String,
    pub network: String,
    pub container_prefix: String,
    pub unmount_timeout: Duration,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            image: "svendowideit/seaweedfs-volume-plugin-rootfs:next".to_string(),
            filer: "filer:8888".to_string(),
            network: "seaweedfs_internal".to_string(),
            container_prefix: "seaweed-volume-plugin-".to_string(),
            unmount_timeout: Duration::from_secs(5),
        }
    }
}

/// Ownership to apply to a mountpoint before the helper starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ownership {
    pub uid: Option<Uid>,
    pub gid: Option<Gid>,
    pub mode: Option<u32>,
}

impl Ownership {
    /// Resolve `uid`/`gid` by account name first, then as raw numeric ids
    /// (which need no account). Anything else is left unset.
    pub fn resolve(opts: &MountOptions) -> Self {
        let uid = opts.uid.as_deref().and_then(lookup_user);
        let gid = opts.gid.as_deref().and_then(lookup_group);
        let mode = opts
            .umask
            .as_deref()
            .and_then(|m| match u32::from_str_radix(m, 8) {
                Ok(mode) => Some(mode),
                Err(_) => {
                    warn!(umask = m, "ignoring non-octal umask");
                    None
                }
            });
        Self { uid, gid, mode }
    }

    /// The user the helper runs as.
    pub fn helper_user(&self) -> String {
        self.uid.map_or_else(|| "0".to_string(), |uid| uid.to_string())
    }

    /// Best effort: each failure is logged and the rest still applied.
    pub fn apply(&self, path: &Path) {
        if self.uid.is_some() || self.gid.is_some() {
            if let Err(e) = nix::unistd::chown(path, self.uid, self.gid) {
                warn!(path = %path.display(), uid = ?self.uid, gid = ?self.gid, error = %e, "chown failed");
            }
        }
        if let Some(mode) = self.mode {
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
                warn!(path = %path.display(), mode = %format!("{mode:o}"), error = %e, "chmod failed");
            }
        }
    }
}

fn lookup_user(spec: &str) -> Option<Uid> {
    match User::from_name(spec) {
        Ok(Some(user)) => return Some(user.uid),
        Ok(None) => {}
        Err(e) => debug!(user = spec, error = %e, "user lookup by name failed"),
    }
    match spec.parse() {
        Ok(raw) => Some(Uid::from_raw(raw)),
        Err(_) => {
            warn!(uid = spec, "unknown user, not changing owner");
            None
        }
    }
}

fn lookup_group(spec: &str) -> Option<Gid> {
    match Group::from_name(spec) {
        Ok(Some(group)) => return Some(group.gid),
        Ok(None) => {}
        Err(e) => debug!(group = spec, error = %e, "group lookup by name failed"),
    }
    match spec.parse() {
        Ok(raw) => Some(Gid::from_raw(raw)),
        Err(_) => {
            warn!(gid = spec, "unknown group, not changing group");
            None
        }
    }
}

pub struct MountOrchestrator {
    engine: Arc<dyn Engine>,
    helper: HelperSettings,
    plugin_dir: PluginDir,
    volume_root: PathBuf,
}

impl MountOrchestrator {
    pub fn new(
        engine: Arc<dyn Engine>,
        helper: HelperSettings,
        plugin_dir: PluginDir,
        volume_root: impl Into<PathBuf>,
    ) -> Self {
        let volume_root = volume_root.into();
        if plugin_dir.path().is_none() {
            warn!(
                volume_root = %volume_root.display(),
                "plugin directory unresolved, helpers bind the volume root directly"
            );
        }
        Self {
            engine,
            helper,
            plugin_dir,
            volume_root,
        }
    }

    pub fn container_name(&self, volume: &str) -> String {
        format!("{}{volume}", self.helper.container_prefix)
    }

    fn bind_source(&self) -> String {
        self.plugin_dir
            .propagated_mount()
            .unwrap_or_else(|| format!("{}/", self.volume_root.display()))
    }

    /// The container that runs `weed mount` for `volume`.
    pub fn helper_spec(&self, volume: &Volume, user: String) -> ContainerSpec {
        let mountpoint = volume.mountpoint.display().to_string();
        ContainerSpec {
            name: Some(self.container_name(&volume.name)),
            image: self.helper.image.clone(),
            user: Some(user),
            entrypoint: vec!["weed".into()],
            cmd: vec![
                "-v".into(),
                "2".into(),
                "mount".into(),
                format!("-filer={}", self.helper.filer),
                format!("-dir={mountpoint}"),
                format!("-filer.path={mountpoint}"),
            ],
            cap_add: vec!["SYS_ADMIN".into()],
            devices: vec![DeviceMapping {
                path_on_host: "/dev/fuse".into(),
                path_in_container: "/dev/fuse".into(),
                cgroup_permissions: "rwm".into(),
            }],
            mounts: vec![BindMount {
                source: self.bind_source(),
                target: format!("{}/", self.volume_root.display()),
                read_only: false,
                propagation: Propagation::RShared,
            }],
            security_opt: vec!["apparmor=unconfined".into()],
            networks: vec![self.helper.network.clone()],
            auto_remove: true,
        }
    }

    /// Prepare the mountpoint and launch the helper. Returns once the
    /// container is started; the FUSE mount itself is not awaited.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn start(&self, volume: &Volume) -> Result<(), VolumeError> {
        tokio::fs::create_dir_all(&volume.mountpoint).await?;

        let ownership = Ownership::resolve(&volume.mount_options());
        ownership.apply(&volume.mountpoint);

        let spec = self.helper_spec(volume, ownership.helper_user());
        self.engine
            .pull_image(&spec.image)
            .await
            .map_err(VolumeError::orchestration("pull helper image"))?;
        let id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(VolumeError::orchestration("create helper container"))?;
        if let Err(e) = self.engine.start_container(&id).await {
            // The name is fixed per volume; a leftover would block the next attempt.
            if let Err(rm) = self.engine.remove_container(&id, true, true).await {
                warn!(id = %id, error = %rm, "failed to remove helper that did not start");
            }
            return Err(VolumeError::orchestration("start helper container")(e));
        }
        info!(id = %id, mountpoint = %volume.mountpoint.display(), "helper started");
        Ok(())
    }

    /// Unmount inside the helper and remove it. Only removal errors are
    /// returned; a helper that is already gone counts as stopped.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn stop(&self, volume: &Volume) -> Result<(), VolumeError> {
        let name = self.container_name(&volume.name);
        let cmd = vec![
            "umount".to_string(),
            volume.mountpoint.display().to_string(),
        ];
        match self
            .engine
            .exec(&name, &cmd, "0", self.helper.unmount_timeout)
            .await
        {
            Ok(out) => debug!(stdout = %out.stdout_lossy(), stderr = %out.stderr_lossy(), "umount finished"),
            Err(e) => warn!(container = %name, error = %e, "umount in helper failed"),
        }

        let state = match self.engine.inspect_container(&name).await {
            Ok(state) => state,
            Err(e) if e.is_not_found() => {
                info!(container = %name, "helper already gone");
                return Ok(());
            }
            Err(e) => return Err(VolumeError::orchestration("inspect helper container")(e)),
        };
        debug!(id = %state.id, status = %state.status, "removing helper");

        match self.engine.remove_container(&state.id, true, true).await {
            Ok(()) => {
                info!(container = %name, "helper removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(VolumeError::orchestration("remove helper container")(e)),
        }
    }
}
