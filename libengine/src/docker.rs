//! [`Engine`] implementation for the Docker Engine API.
//!
//! Worth reading: <https://docs.docker.com/engine/api/latest/>. Only
//! unversioned paths are used so the daemon serves its own default API
//! version.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::stream::demux;
use crate::transport::{UnixHttpClient, encode_query, read_success};
use crate::types::{ContainerSpec, ContainerState, Output, WaitCondition};

/// Default location of the Docker daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Docker Engine API client speaking over a unix socket.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: UnixHttpClient,
}

impl DockerEngine {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            client: UnixHttpClient::new(socket),
        }
    }

    /// Build a client from a `DOCKER_HOST`-style value: `unix:///path` or a
    /// bare path. `None` or an empty value selects [`DEFAULT_DOCKER_SOCKET`].
    pub fn from_host(host: Option<&str>) -> Result<Self, EngineError> {
        match host.map(str::trim).filter(|h| !h.is_empty()) {
            None => Ok(Self::new(DEFAULT_DOCKER_SOCKET)),
            Some(h) => {
                if let Some(path) = h.strip_prefix("unix://") {
                    Ok(Self::new(path))
                } else if h.starts_with('/') {
                    Ok(Self::new(h))
                } else {
                    Err(EngineError::InvalidRequest(format!(
                        "unsupported docker host {h}: only unix sockets are supported"
                    )))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty")]
    entrypoint: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    cmd: &'a [String],
    host_config: HostConfig<'a>,
    networking_config: NetworkingConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig<'a> {
    auto_remove: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_mode: Option<&'a str>,
    cap_add: &'a [String],
    security_opt: &'a [String],
    devices: Vec<Device<'a>>,
    mounts: Vec<Mount<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Device<'a> {
    path_on_host: &'a str,
    path_in_container: &'a str,
    cgroup_permissions: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Mount<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    source: &'a str,
    target: &'a str,
    read_only: bool,
    bind_options: BindOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BindOptions {
    propagation: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkingConfig<'a> {
    endpoints_config: HashMap<&'a str, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecCreateBody<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    user: &'a str,
    cmd: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartBody {
    detach: bool,
    tty: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    id: String,
    #[serde(default)]
    name: String,
    state: InspectState,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitResponse {
    status_code: i64,
    #[serde(default)]
    error: Option<WaitError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct PullProgress {
    #[serde(default)]
    error: Option<String>,
}

fn is_empty(v: &&[String]) -> bool {
    v.is_empty()
}

fn create_body(spec: &ContainerSpec) -> CreateBody<'_> {
    CreateBody {
        image: &spec.image,
        user: spec.user.as_deref(),
        entrypoint: &spec.entrypoint,
        cmd: &spec.cmd,
        host_config: HostConfig {
            auto_remove: spec.auto_remove,
            network_mode: spec.networks.first().map(String::as_str),
            cap_add: &spec.cap_add,
            security_opt: &spec.security_opt,
            devices: spec
                .devices
                .iter()
                .map(|d| Device {
                    path_on_host: &d.path_on_host,
                    path_in_container: &d.path_in_container,
                    cgroup_permissions: &d.cgroup_permissions,
                })
                .collect(),
            mounts: spec
                .mounts
                .iter()
                .map(|m| Mount {
                    kind: "bind",
                    source: &m.source,
                    target: &m.target,
                    read_only: m.read_only,
                    bind_options: BindOptions {
                        propagation: m.propagation.as_str(),
                    },
                })
                .collect(),
        },
        networking_config: NetworkingConfig {
            endpoints_config: spec
                .networks
                .iter()
                .map(|n| (n.as_str(), serde_json::json!({})))
                .collect(),
        },
    }
}

/// Split an image reference into the `fromImage` and `tag` query values of
/// the pull endpoint. Digest references are passed through whole.
fn split_image_ref(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    match image.rfind(':') {
        Some(pos) if !image[pos + 1..].contains('/') => (&image[..pos], Some(&image[pos + 1..])),
        _ => (image, Some("latest")),
    }
}

/// The pull endpoint answers 200 and then reports failures inline in its
/// progress stream.
fn pull_error(body: &[u8]) -> Option<String> {
    serde_json::Deserializer::from_slice(body)
        .into_iter::<PullProgress>()
        .filter_map(Result::ok)
        .find_map(|p| p.error)
}

const NO_BODY: Option<&()> = None;

#[async_trait]
impl Engine for DockerEngine {
    #[instrument(skip(self))]
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let (from, tag) = split_image_ref(image);
        let mut path = format!("/images/create?fromImage={}", encode_query(from));
        if let Some(tag) = tag {
            path.push_str(&format!("&tag={}", encode_query(tag)));
        }
        let body = self.client.call(Method::POST, &path, NO_BODY).await?;
        debug!(image, progress = %String::from_utf8_lossy(&body), "image pull finished");
        match pull_error(&body) {
            Some(message) => Err(EngineError::Api {
                status: 500,
                message,
            }),
            None => Ok(()),
        }
    }

    #[instrument(skip(self, spec), fields(name = ?spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let path = match &spec.name {
            Some(name) => format!("/containers/create?name={}", encode_query(name)),
            None => "/containers/create".to_owned(),
        };
        let created: IdResponse = self
            .client
            .call_json(Method::POST, &path, Some(&create_body(spec)))
            .await?;
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let path = format!("/containers/{}/start", encode_query(id));
        self.client.call(Method::POST, &path, NO_BODY).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        user: &str,
        timeout: Duration,
    ) -> Result<Output, EngineError> {
        let path = format!("/containers/{}/exec", encode_query(id));
        let exec: IdResponse = self
            .client
            .call_json(
                Method::POST,
                &path,
                Some(&ExecCreateBody {
                    attach_stdin: false,
                    attach_stdout: true,
                    attach_stderr: true,
                    tty: false,
                    user,
                    cmd,
                }),
            )
            .await?;

        let path = format!("/exec/{}/start", encode_query(&exec.id));
        let response = self
            .client
            .send(
                Method::POST,
                &path,
                Some(&ExecStartBody {
                    detach: false,
                    tty: false,
                }),
            )
            .await?;
        let raw = read_success(response, Some(timeout)).await?;
        Ok(demux(&raw))
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, id: &str) -> Result<ContainerState, EngineError> {
        let path = format!("/containers/{}/json", encode_query(id));
        let inspect: InspectResponse = self.client.call_json(Method::GET, &path, NO_BODY).await?;
        Ok(ContainerState {
            id: inspect.id,
            name: inspect.name.trim_start_matches('/').to_owned(),
            status: inspect.state.status,
            running: inspect.state.running,
            exit_code: inspect.state.exit_code,
        })
    }

    #[instrument(skip(self))]
    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        volumes: bool,
    ) -> Result<(), EngineError> {
        let path = format!(
            "/containers/{}?force={}&v={}",
            encode_query(id),
            force,
            volumes
        );
        self.client.call(Method::DELETE, &path, NO_BODY).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn wait_container(
        &self,
        id: &str,
        condition: WaitCondition,
    ) -> Result<i64, EngineError> {
        let path = format!(
            "/containers/{}/wait?condition={}",
            encode_query(id),
            condition.as_str()
        );
        let waited: WaitResponse = self.client.call_json(Method::POST, &path, NO_BODY).await?;
        if let Some(err) = waited.error.filter(|e| !e.message.is_empty()) {
            return Err(EngineError::Api {
                status: 500,
                message: err.message,
            });
        }
        Ok(waited.status_code)
    }

    #[instrument(skip(self))]
    async fn container_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Output, EngineError> {
        let path = format!(
            "/containers/{}/logs?stdout={}&stderr={}",
            encode_query(id),
            stdout,
            stderr
        );
        let raw = self.client.call(Method::GET, &path, NO_BODY).await?;
        Ok(demux(&raw))
    }
}
