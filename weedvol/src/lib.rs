//! `weedvol` serves the Docker volume plugin protocol for SeaweedFS.
//!
//! Every volume maps to a directory under the volume root. The first mount of
//! a volume starts a helper container running `weed mount` on that
//! directory; the last unmount stops it. Volume records live in a
//! [`registry::Registry`], either a local state file or an Xline cluster.

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod plugin_dir;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod volume;

pub use controller::Controller;
pub use error::VolumeError;
pub use orchestrator::{HelperSettings, MountOrchestrator};
pub use plugin_dir::PluginDir;
pub use volume::{Intent, Volume};
