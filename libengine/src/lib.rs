//! # libengine: container execution client for weedvol
//!
//! `libengine` is the narrow slice of a container engine that the volume
//! plugin needs in order to run its FUSE mount helpers: pull an image,
//! create/start/inspect/remove a container, exec a command inside it, wait for
//! it to exit and read its logs.
//!
//! | Module | Purpose |
//! |---|---|
//! | [`engine`] | [`Engine`] trait, the seam the plugin is written against. |
//! | [`docker`] | [`DockerEngine`], the Docker Engine API implementation. |
//! | [`transport`] | HTTP/1.1 over a unix socket. |
//! | [`stream`] | Demultiplexing of framed stdout/stderr streams. |
//! | [`types`] | Container spec, state and output types. |
//! | [`error`] | [`EngineError`]. |

pub mod docker;
pub mod engine;
pub mod error;
pub mod stream;
pub mod transport;
pub mod types;

pub use docker::DockerEngine;
pub use engine::Engine;
pub use error::EngineError;
pub use types::*;
