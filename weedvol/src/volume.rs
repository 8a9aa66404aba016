//! The persisted volume record and its mount options.
//!
//! Field names are PascalCase on the wire so that state files written by
//! earlier releases of the plugin (`{"Options":null,"Name":..,"Mountpoint":..}`)
//! still load.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::VolumeError;

/// A side effect that was started but not yet confirmed finished.
///
/// Persisted before the orchestrator is invoked and cleared once it returns,
/// so a crash in between leaves a trace for startup reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Starting,
    Stopping,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    /// `key` or `key=value` strings, in the order they were captured.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub options: Vec<String>,
    pub mountpoint: PathBuf,
    /// Outstanding mount requests.
    #[serde(default)]
    pub connections: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Volume {
    /// Build a fresh, unmounted record for `name` under `volume_root`.
    pub fn new(
        name: &str,
        opts: &BTreeMap<String, String>,
        volume_root: &Path,
    ) -> Result<Self, VolumeError> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_owned(),
            options: encode_options(opts),
            mountpoint: volume_root.join(name),
            connections: 0,
            intent: None,
        })
    }

    pub fn in_use(&self) -> bool {
        self.connections > 0
    }

    pub fn mount_options(&self) -> MountOptions {
        MountOptions::parse(&self.options)
    }
}

/// A volume name must be one plain path component so its mountpoint stays
/// under the volume root.
pub fn validate_name(name: &str) -> Result<(), VolumeError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name => Ok(()),
        _ => Err(VolumeError::InvalidName(name.to_owned())),
    }
}

fn encode_options(opts: &BTreeMap<String, String>) -> Vec<String> {
    opts.iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect()
}

/// The options the mount orchestrator understands. Everything else in
/// [`Volume::options`] is kept but ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub uid: Option<String>,
    pub gid: Option<String>,
    pub umask: Option<String>,
}

impl MountOptions {
    pub fn parse<S: AsRef<str>>(options: &[S]) -> Self {
        let mut parsed = Self::default();
        for option in options {
            let Some((key, value)) = option.as_ref().split_once('=') else {
                continue;
            };
            let slot = match key {
                "uid" => &mut parsed.uid,
                "gid" => &mut parsed.gid,
                "umask" => &mut parsed.umask,
                _ => continue,
            };
            if !value.is_empty() {
                *slot = Some(value.to_owned());
            }
        }
        parsed
    }
}
