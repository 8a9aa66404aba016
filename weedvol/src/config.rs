use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use serde::Deserialize;

pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/seaweedfs.sock";
pub const STATE_FILE: &str = "seaweedfs-state.json";

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Unix socket the plugin protocol is served on
    #[arg(long, env = "WEEDVOL_SOCKET", default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// State root; the local registry lives in `<root>/state/`
    #[arg(long, env = "WEEDVOL_ROOT", default_value = "/mnt")]
    pub root: PathBuf,

    /// Directory holding one mountpoint per volume
    #[arg(long, env = "WEEDVOL_VOLUME_ROOT", default_value = "/mnt/docker-volumes")]
    pub volume_root: PathBuf,

    /// Registry backend
    #[arg(long, env = "WEEDVOL_REGISTRY", value_enum, default_value_t = RegistryKind::Local)]
    pub registry: RegistryKind,

    /// YAML file with Xline connection settings, required for `--registry xline`
    #[arg(long, env = "WEEDVOL_XLINE_CONFIG")]
    pub xline_config: Option<PathBuf>,

    /// Docker Engine endpoint, `unix:///path` or a bare socket path
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_socket: Option<String>,

    /// Image run for helper containers
    #[arg(
        long,
        env = "WEEDVOL_HELPER_IMAGE",
        default_value = "svendowideit/seaweedfs-volume-plugin-rootfs:next"
    )]
    pub helper_image: String,

    /// Filer address handed to `weed mount`
    #[arg(long, env = "WEEDVOL_FILER", default_value = "filer:8888")]
    pub filer: String,

    /// Network helper containers join
    #[arg(long, env = "WEEDVOL_HELPER_NETWORK", default_value = "seaweedfs_internal")]
    pub helper_network: String,

    /// Host directory where the engine keeps plugin roots
    #[arg(long, env = "WEEDVOL_PLUGINS_ROOT", default_value = "/var/lib/docker/plugins/")]
    pub plugins_root: PathBuf,

    /// Host path of this plugin's directory; skips the probe container when set
    #[arg(long, env = "WEEDVOL_PLUGIN_DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Seconds to wait for `umount` inside a helper
    #[arg(long, env = "WEEDVOL_UNMOUNT_TIMEOUT", default_value_t = 5)]
    pub unmount_timeout: u64,

    /// Verbose logging
    #[arg(
        long,
        env = "DEBUG",
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RegistryKind {
    Local,
    Xline,
}

impl Args {
    pub fn state_path(&self) -> PathBuf {
        self.root.join("state").join(STATE_FILE)
    }

    pub fn unmount_timeout(&self) -> Duration {
        Duration::from_secs(self.unmount_timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct XlineConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Seconds.
    pub connect_timeout: Option<u64>,
}

fn default_prefix() -> String {
    "/weedvol".to_string()
}

pub fn load_xline_config(path: &Path) -> Result<XlineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read xline config from {}", path.display()))?;
    let cfg: XlineConfig =
        serde_yaml::from_str(&content).context("Failed to parse xline YAML config")?;
    if cfg.endpoints.is_empty() {
        anyhow::bail!("xline config {} lists no endpoints", path.display());
    }
    Ok(cfg)
}
