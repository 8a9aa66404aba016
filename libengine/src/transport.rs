//! HTTP/1.1 over a unix domain socket.
//!
//! Each request opens a fresh connection; the engine and plugin sockets are
//! local and requests are rare, so there is no pooling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::EngineError;

/// A minimal HTTP client bound to one unix socket.
#[derive(Debug, Clone)]
pub struct UnixHttpClient {
    socket: PathBuf,
}

impl UnixHttpClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send a request with an optional JSON body and return the raw response.
    ///
    /// `path` is the origin-form target, query string included.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response<Body>, EngineError> {
        let stream = UnixStream::connect(&self.socket).await?;
        let (mut sender, conn) = hyper::client::conn::handshake(stream).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "unix http connection closed with error");
            }
        });

        let builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, "localhost");
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(body)?)),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

        debug!(%method, %path, "sending request");
        Ok(sender.send_request(request).await?)
    }

    /// Send a request and return the body of a successful response.
    pub async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Bytes, EngineError> {
        let response = self.send(method, path, body).await?;
        read_success(response, None).await
    }

    /// Like [`Self::call`], then decode the body as JSON.
    pub async fn call_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, EngineError> {
        let bytes = self.call(method, path, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Collect the body of `response`, mapping non-2xx statuses to errors.
///
/// With `timeout` set, collecting the body gives up after that long.
pub async fn read_success(
    response: Response<Body>,
    timeout: Option<Duration>,
) -> Result<Bytes, EngineError> {
    let status = response.status();
    let body = response.into_body();
    let bytes = match timeout {
        Some(limit) => tokio::time::timeout(limit, hyper::body::to_bytes(body))
            .await
            .map_err(|_| EngineError::Timeout(limit))??,
        None => hyper::body::to_bytes(body).await?,
    };

    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(bytes);
    }

    let message = error_message(&bytes);
    if status == StatusCode::NOT_FOUND {
        Err(EngineError::NotFound(message))
    } else {
        Err(EngineError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extract `{"message": ...}` from an engine error body, falling back to the
/// raw text.
fn error_message(body: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(e) => e.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_owned(),
    }
}

/// Percent-encode a query parameter value.
pub fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
