mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::{Body, Method, StatusCode};
use libengine::transport::UnixHttpClient;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use weedvol::protocol::PLUGIN_CONTENT_TYPE;
use weedvol::server;

struct Plugin {
    client: UnixHttpClient,
    socket: PathBuf,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
    harness: common::Harness,
}

impl Plugin {
    async fn start() -> Self {
        let harness = common::harness().await;
        let socket = harness.dir.path().join("run").join("seaweedfs.sock");
        // A leftover socket file from a previous run must not block startup.
        std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
        std::fs::write(&socket, b"").unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn({
            let socket = socket.clone();
            let controller = harness.controller.clone();
            async move {
                server::serve(&socket, controller, async {
                    let _ = stopped.await;
                })
                .await
            }
        });
        wait_for_socket(&socket).await;

        Self {
            client: UnixHttpClient::new(&socket),
            socket,
            stop: Some(stop),
            task,
            harness,
        }
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let res = self.client.send(Method::POST, path, body.as_ref()).await.unwrap();
        let status = res.status();
        assert_eq!(res.headers()["content-type"], PLUGIN_CONTENT_TYPE);
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn ok(&self, path: &str, body: Value) -> Value {
        let (status, value) = self.post(path, Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{path}: {value}");
        value
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
        assert!(!self.socket.exists());
    }
}

async fn wait_for_socket(socket: &Path) {
    for _ in 0..100 {
        if tokio::net::UnixStream::connect(socket).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("plugin socket {} never came up", socket.display());
}

#[tokio::test]
async fn activate_handshake() {
    let plugin = Plugin::start().await;
    let (status, body) = plugin.post("/Plugin.Activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
    plugin.shutdown().await;
}

#[tokio::test]
async fn volume_requests_round_trip() {
    let plugin = Plugin::start().await;
    let mountpoint = plugin
        .harness
        .volume_root()
        .join("vol1")
        .display()
        .to_string();

    assert_eq!(
        plugin
            .ok("/VolumeDriver.Create", json!({"Name": "vol1", "Opts": {"uid": "0"}}))
            .await,
        json!({})
    );
    assert_eq!(
        plugin
            .ok("/VolumeDriver.Mount", json!({"Name": "vol1", "ID": "abc"}))
            .await,
        json!({"Mountpoint": mountpoint})
    );
    assert_eq!(
        plugin.ok("/VolumeDriver.Path", json!({"Name": "vol1"})).await,
        json!({"Mountpoint": mountpoint})
    );
    assert_eq!(
        plugin.ok("/VolumeDriver.Get", json!({"Name": "vol1"})).await,
        json!({"Volume": {"Name": "vol1", "Mountpoint": mountpoint}})
    );
    assert_eq!(
        plugin.ok("/VolumeDriver.List", json!({})).await,
        json!({"Volumes": [{"Name": "vol1", "Mountpoint": mountpoint}]})
    );
    assert_eq!(
        plugin.ok("/VolumeDriver.Capabilities", json!({})).await,
        json!({"Capabilities": {"Scope": "local"}})
    );

    let (status, body) = plugin
        .post("/VolumeDriver.Remove", Some(json!({"Name": "vol1"})))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"Err": "volume vol1 is currently used by a container"})
    );

    plugin
        .ok("/VolumeDriver.Unmount", json!({"Name": "vol1", "ID": "abc"}))
        .await;
    plugin.ok("/VolumeDriver.Remove", json!({"Name": "vol1"})).await;
    assert_eq!(
        plugin.ok("/VolumeDriver.List", json!({})).await,
        json!({"Volumes": []})
    );
    assert_eq!(plugin.harness.engine.starts(), 1);
    assert_eq!(plugin.harness.engine.removes(), 1);

    plugin.shutdown().await;
}

#[tokio::test]
async fn errors_use_err_body() {
    let plugin = Plugin::start().await;

    let (status, body) = plugin
        .post("/VolumeDriver.Get", Some(json!({"Name": "missing"})))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"Err": "volume missing not found"}));

    let (status, body) = plugin
        .post("/VolumeDriver.Create", Some(json!({"Name": "../escape"})))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().contains("invalid volume name"));

    plugin.shutdown().await;
}

#[tokio::test]
async fn docker_content_type_and_empty_bodies() {
    let plugin = Plugin::start().await;

    // The engine labels bodies with its own media type.
    let request = hyper::Request::post("/VolumeDriver.Create")
        .header("host", "localhost")
        .header("content-type", "application/vnd.docker.plugins.v1.2+json")
        .body(Body::from(r#"{"Name":"typed","Opts":null}"#))
        .unwrap();
    let stream = tokio::net::UnixStream::connect(&plugin.socket).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::handshake(stream).await.unwrap();
    tokio::spawn(conn);
    let res = sender.send_request(request).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    drop(sender);

    let (status, body) = plugin.post("/VolumeDriver.List", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Volumes"][0]["Name"], "typed");

    plugin.shutdown().await;
}
