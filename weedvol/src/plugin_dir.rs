//! Locating this plugin's directory on the host.
//!
//! When the plugin runs as a managed engine plugin its filesystem is a rootfs
//! somewhere under the engine's plugins root, and helper containers need the
//! host-side path of `<plugin_dir>/propagated-mount/` to share mounts back.
//! The path is found by writing a marker file locally and asking a probe
//! container, which sees the host's plugins root, where that file shows up.

use std::fmt;
use std::path::{Path, PathBuf};

use libengine::{
    BindMount, ContainerSpec, Engine, EngineError, Output, Propagation, WaitCondition,
};
use tracing::{debug, info, instrument, warn};

const ROOTFS: &str = "/rootfs";

/// Host-side directory of the running plugin, if it could be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginDir(Option<PathBuf>);

impl PluginDir {
    pub fn known(path: impl Into<PathBuf>) -> Self {
        Self(Some(path.into()))
    }

    pub fn unresolved() -> Self {
        Self(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.0.as_deref()
    }

    /// `<plugin_dir>/propagated-mount/`.
    pub fn propagated_mount(&self) -> Option<String> {
        self.0
            .as_ref()
            .map(|dir| format!("{}/propagated-mount/", dir.display()))
    }

    /// Run the probe container once. Any failure leaves the directory
    /// unresolved; it is logged, never returned.
    #[instrument(skip(engine))]
    pub async fn resolve(engine: &dyn Engine, image: &str, plugins_root: &Path) -> Self {
        match probe(engine, image, plugins_root).await {
            Ok(Some(dir)) => {
                info!(plugin_dir = %dir.display(), "resolved plugin directory");
                Self::known(dir)
            }
            Ok(None) => {
                warn!("marker not visible under plugins root, assuming plugin runs on the host");
                Self::unresolved()
            }
            Err(e) => {
                warn!(error = %e, "plugin directory probe failed");
                Self::unresolved()
            }
        }
    }
}

impl fmt::Display for PluginDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(dir) => write!(f, "{}", dir.display()),
            None => f.write_str("<unresolved>"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error("marker file: {0}")]
    Marker(#[from] std::io::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

async fn probe(
    engine: &dyn Engine,
    image: &str,
    plugins_root: &Path,
) -> Result<Option<PathBuf>, ProbeError> {
    let marker = tempfile::Builder::new()
        .prefix("weedvol-probe-")
        .tempfile_in(std::env::temp_dir())?;
    let marker_path = marker.path().to_path_buf();
    let marker_name = marker_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let root = plugins_root.display().to_string();
    let spec = ContainerSpec {
        image: image.to_owned(),
        entrypoint: vec!["find".into()],
        cmd: vec![root.clone(), "-name".into(), marker_name],
        mounts: vec![BindMount {
            source: root.clone(),
            target: root.clone(),
            read_only: true,
            propagation: Propagation::Private,
        }],
        ..Default::default()
    };

    let id = engine.run_container(&spec).await?;
    let logs: Result<Output, EngineError> = async {
        let code = engine.wait_container(&id, WaitCondition::NotRunning).await?;
        debug!(id = %id, code, "probe exited");
        engine.container_logs(&id, true, false).await
    }
    .await;
    if let Err(e) = engine.remove_container(&id, true, true).await {
        warn!(id = %id, error = %e, "failed to remove probe container");
    }

    let output = logs?.stdout_lossy();
    debug!(output = %output, "probe output");
    Ok(parse_probe_output(&output, &root, &marker_path))
}

/// Take the first line naming a path under `plugins_root`, drop anything
/// before that path, and strip the `/rootfs<marker>` tail.
pub fn parse_probe_output(output: &str, plugins_root: &str, marker: &Path) -> Option<PathBuf> {
    let suffix = format!("{ROOTFS}{}", marker.display());
    output
        .lines()
        .filter_map(|line| line.find(plugins_root).map(|at| line[at..].trim_end()))
        .find_map(|path| path.strip_suffix(suffix.as_str()))
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/var/lib/docker/plugins/";

    #[test]
    fn parses_plain_find_output() {
        let marker = Path::new("/tmp/weedvol-probe-abc123");
        let out = "/var/lib/docker/plugins/0a1b2c/rootfs/tmp/weedvol-probe-abc123\n";
        assert_eq!(
            parse_probe_output(out, ROOT, marker),
            Some(PathBuf::from("/var/lib/docker/plugins/0a1b2c"))
        );
    }

    #[test]
    fn strips_leading_garbage() {
        let marker = Path::new("/tmp/m");
        let out = "\u{1}\0\0\0\0\0\0\u{2b}/var/lib/docker/plugins/ffee/rootfs/tmp/m\r\n";
        assert_eq!(
            parse_probe_output(out, ROOT, marker),
            Some(PathBuf::from("/var/lib/docker/plugins/ffee"))
        );
    }

    #[test]
    fn ignores_unrelated_lines() {
        let marker = Path::new("/tmp/m");
        let out = "find: permission denied\n/var/lib/docker/plugins/x/other/tmp/m\n/var/lib/docker/plugins/good/rootfs/tmp/m\n";
        assert_eq!(
            parse_probe_output(out, ROOT, marker),
            Some(PathBuf::from("/var/lib/docker/plugins/good"))
        );
        assert_eq!(parse_probe_output("", ROOT, marker), None);
        assert_eq!(parse_probe_output("/tmp/m\n", ROOT, marker), None);
    }

    #[test]
    fn propagated_mount_path() {
        let dir = PluginDir::known("/var/lib/docker/plugins/abc");
        assert_eq!(
            dir.propagated_mount().as_deref(),
            Some("/var/lib/docker/plugins/abc/propagated-mount/")
        );
        assert_eq!(PluginDir::unresolved().propagated_mount(), None);
        assert_eq!(PluginDir::unresolved().to_string(), "<unresolved>");
    }
}
