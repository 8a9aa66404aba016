//! HTTP handlers for the volume plugin protocol, served on a unix socket.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use tokio::net::UnixListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::Controller;
use crate::error::VolumeError;
use crate::protocol::{
    self, ActivateResponse, Capabilities, CapabilitiesResponse, CreateRequest, Empty, GetResponse,
    ListResponse, MountRequest, MountpointResponse, NameRequest, Plugin, VOLUME_DRIVER,
};

type AppState = State<Arc<Controller>>;
type PluginResult<T> = Result<Plugin<T>, VolumeError>;

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

/// Bind `socket`, replacing a stale socket file, and serve until `shutdown`
/// resolves. The socket file is removed on the way out.
pub async fn serve<F>(socket: &Path, controller: Arc<Controller>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(parent) = socket.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(socket).await {
        Ok(()) => info!(socket = %socket.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(socket)?;
    info!(socket = %socket.display(), "listening");

    let result = axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown)
        .await;
    let _ = tokio::fs::remove_file(socket).await;
    result
}

async fn activate() -> Plugin<ActivateResponse> {
    Plugin(ActivateResponse {
        implements: vec![VOLUME_DRIVER],
    })
}

async fn create(State(ctl): AppState, body: Bytes) -> PluginResult<Empty> {
    let req: CreateRequest = protocol::parse(&body)?;
    ctl.create(&req.name, &req.opts.unwrap_or_default()).await?;
    Ok(Plugin(Empty {}))
}

async fn remove(State(ctl): AppState, body: Bytes) -> PluginResult<Empty> {
    let req: NameRequest = protocol::parse(&body)?;
    ctl.remove(&req.name).await?;
    Ok(Plugin(Empty {}))
}

async fn mount(State(ctl): AppState, body: Bytes) -> PluginResult<MountpointResponse> {
    let req: MountRequest = protocol::parse(&body)?;
    let mountpoint = ctl.mount(&req.name, &req.id).await?;
    Ok(Plugin(MountpointResponse { mountpoint }))
}

async fn unmount(State(ctl): AppState, body: Bytes) -> PluginResult<Empty> {
    let req: MountRequest = protocol::parse(&body)?;
    ctl.unmount(&req.name, &req.id).await?;
    Ok(Plugin(Empty {}))
}

async fn path(State(ctl): AppState, body: Bytes) -> PluginResult<MountpointResponse> {
    let req: NameRequest = protocol::parse(&body)?;
    let mountpoint = ctl.path(&req.name).await?;
    Ok(Plugin(MountpointResponse { mountpoint }))
}

async fn get(State(ctl): AppState, body: Bytes) -> PluginResult<GetResponse> {
    let req: NameRequest = protocol::parse(&body)?;
    let volume = ctl.get(&req.name).await?;
    Ok(Plugin(GetResponse {
        volume: volume.into(),
    }))
}

async fn list(State(ctl): AppState) -> PluginResult<ListResponse> {
    let volumes = ctl.list().await?;
    Ok(Plugin(ListResponse {
        volumes: volumes.into_iter().map(Into::into).collect(),
    }))
}

async fn capabilities(State(ctl): AppState) -> Plugin<CapabilitiesResponse> {
    Plugin(CapabilitiesResponse {
        capabilities: Capabilities {
            scope: ctl.capabilities(),
        },
    })
}
