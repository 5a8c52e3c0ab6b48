// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pebble supervisor client.
//!
//! Speaks Pebble's HTTP API over its unix socket. Every request opens a fresh
//! HTTP/1 connection; hooks are short-lived and make only a handful of calls.
//!
//! Commands run through `POST /v1/exec`. The environment travels in the
//! request body, and output is read from the task's stdio and stderr
//! websockets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::UnixStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::traits::*;
use crate::config::Config;
use crate::layer::Layer;

/// Extra time granted to calls that themselves wait server-side.
const WAIT_MARGIN: Duration = Duration::from_secs(5);

/// Marks the end of a websocket stream in either direction.
const END_COMMAND: &str = r#"{"command":"end"}"#;

type TaskSocket = WebSocketStream<UnixStream>;

/// Response envelope shared by every Pebble endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "status-code", default)]
    status_code: u16,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    change: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResult {
    #[serde(default)]
    message: String,
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Change {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct Task {
    #[serde(default)]
    data: Value,
}

impl Change {
    /// Exit code recorded by an exec task, -1 when missing.
    fn exit_code(&self) -> i32 {
        self.tasks
            .first()
            .and_then(|task| task.data.get("exit-code"))
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(-1)
    }
}

/// Per-path outcome of a files request.
#[derive(Debug, Deserialize)]
struct FileResult {
    path: String,
    #[serde(default)]
    error: Option<ErrorResult>,
}

impl Envelope {
    fn is_not_found(&self) -> bool {
        self.kind == "error"
            && (self.status_code == 404
                || self
                    .result
                    .get("kind")
                    .and_then(Value::as_str)
                    .is_some_and(|k| k == "not-found"))
    }

    /// Turn error envelopes into errors and hand back the result.
    fn into_result(self) -> Result<Value> {
        if self.kind == "error" {
            let message = serde_json::from_value::<ErrorResult>(self.result)
                .map(|e| e.message)
                .unwrap_or_default();
            return Err(SupervisorError::Api {
                status_code: self.status_code,
                message,
            });
        }
        Ok(self.result)
    }
}

/// Pebble client.
pub struct PebbleClient {
    socket: PathBuf,
    timeout: Duration,
}

impl PebbleClient {
    /// Create a client for the given socket.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create from the hook process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.pebble_socket).with_timeout(config.pebble_timeout)
    }

    /// Set the per-request timeout; also bounds change waits.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Socket path.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Envelope> {
        debug!(method = %method, path = %path, "Pebble request");
        match tokio::time::timeout(timeout, self.send(method, path, content_type, body)).await {
            Ok(result) => result,
            Err(_) => Err(SupervisorError::Timeout(path.to_string())),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<Envelope> {
        let stream = self.connect().await?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(|e| SupervisorError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Pebble connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| SupervisorError::Connection(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| SupervisorError::Connection(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| SupervisorError::Connection(e.to_string()))?
            .to_bytes();

        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(status = %status, error = %e, "Pebble returned an unreadable response");
            SupervisorError::Json(e)
        })
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket).await.map_err(|e| {
            SupervisorError::Connection(format!("{}: {}", self.socket.display(), e))
        })
    }

    /// Open one of an exec task's websockets.
    async fn task_socket(&self, task_id: &str, name: &str) -> Result<TaskSocket> {
        let stream = self.connect().await?;
        let url = format!("ws://localhost/v1/tasks/{}/websocket/{}", task_id, name);
        let (socket, _) = tokio_tungstenite::client_async(url, stream)
            .await
            .map_err(|e| SupervisorError::Connection(format!("{} websocket: {}", name, e)))?;
        Ok(socket)
    }

    async fn get(&self, path: &str) -> Result<Envelope> {
        self.request(Method::GET, path, None, Bytes::new(), self.timeout)
            .await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Envelope> {
        let body = Bytes::from(serde_json::to_vec(body)?);
        self.request(
            Method::POST,
            path,
            Some("application/json"),
            body,
            self.timeout,
        )
        .await
    }

    /// Block until an asynchronous change is ready.
    async fn wait_change(&self, id: &str, timeout: Duration) -> Result<Change> {
        let path = path_with_query(
            &format!("/v1/changes/{}/wait", id),
            &[("timeout", &format!("{}s", timeout.as_secs()))],
        )?;
        let envelope = self
            .request(Method::GET, &path, None, Bytes::new(), timeout + WAIT_MARGIN)
            .await?;
        let change: Change = serde_json::from_value(envelope.into_result()?)?;
        if let Some(message) = change.err.clone().filter(|e| !e.is_empty()) {
            return Err(SupervisorError::ChangeFailed {
                id: change.id,
                message,
            });
        }
        debug!(change = %change.id, status = %change.status, "Change ready");
        Ok(change)
    }

    /// Post a services action and wait for the resulting change.
    async fn services_action(&self, action: &str, names: &[&str]) -> Result<()> {
        let envelope = self
            .post_json(
                "/v1/services",
                &json!({ "action": action, "services": names }),
            )
            .await?;
        let change = envelope.change.clone();
        envelope.into_result()?;
        match change {
            Some(id) => self.wait_change(&id, self.timeout).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Signal end of input on the stdio socket, then read the command's stdout.
async fn read_stdio(mut socket: TaskSocket) -> Result<String> {
    socket
        .send(Message::Text(END_COMMAND.into()))
        .await
        .map_err(stream_error)?;
    read_output(socket).await
}

/// Collect binary frames until the end marker or a close.
async fn read_output(mut socket: TaskSocket) -> Result<String> {
    let mut output = Vec::new();
    while let Some(message) = socket.next().await {
        match message.map_err(stream_error)? {
            Message::Binary(data) => output.extend_from_slice(&data),
            Message::Text(_) | Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(String::from_utf8_lossy(&output).into_owned())
}

fn stream_error(e: tungstenite::Error) -> SupervisorError {
    SupervisorError::Connection(format!("exec stream: {}", e))
}

/// Build a request target with an encoded query string.
fn path_with_query(path: &str, query: &[(&str, &str)]) -> Result<String> {
    let url = reqwest::Url::parse_with_params(&format!("http://localhost{}", path), query)
        .map_err(|e| SupervisorError::Connection(format!("invalid request path {}: {}", path, e)))?;
    Ok(match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    })
}

/// Pick a multipart boundary absent from the payload.
fn boundary_for(contents: &[u8]) -> String {
    let mut boundary = "insights-operator-boundary".to_string();
    while contents
        .windows(boundary.len())
        .any(|w| w == boundary.as_bytes())
    {
        boundary.push('x');
    }
    boundary
}

/// Encode a files write request as `multipart/form-data`.
fn multipart_body(boundary: &str, request: &Value, path: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(contents.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"request\"\r\n\
             Content-Type: application/json\r\n\r\n{request}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{path}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            b = boundary,
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

/// Fail on the first per-path error, ignoring not-found when allowed.
fn check_file_results(result: Value, ignore_not_found: bool) -> Result<()> {
    let results: Vec<FileResult> = serde_json::from_value(result)?;
    for entry in results {
        if let Some(error) = entry.error {
            if ignore_not_found && error.kind == "not-found" {
                continue;
            }
            return Err(SupervisorError::Api {
                status_code: 400,
                message: format!("{}: {}", entry.path, error.message),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl Supervisor for PebbleClient {
    fn supervisor_type(&self) -> &'static str {
        "pebble"
    }

    async fn can_connect(&self) -> bool {
        match self.get("/v1/system-info").await {
            Ok(envelope) => envelope.into_result().is_ok(),
            Err(e) => {
                debug!(error = %e, "Pebble not reachable");
                false
            }
        }
    }

    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()> {
        let yaml = serde_yaml::to_string(layer)?;
        let body = json!({
            "action": "add",
            "label": label,
            "combine": combine,
            "format": "yaml",
            "layer": yaml,
        });
        self.post_json("/v1/layers", &body).await?.into_result()?;
        info!(label = %label, services = layer.services.len(), "Layer added");
        Ok(())
    }

    async fn replan(&self) -> Result<()> {
        self.services_action("replan", &[]).await?;
        info!("Replan complete");
        Ok(())
    }

    async fn services(&self, names: &[&str]) -> Result<Vec<ServiceInfo>> {
        let path = if names.is_empty() {
            "/v1/services".to_string()
        } else {
            path_with_query("/v1/services", &[("names", &names.join(","))])?
        };
        let result = self.get(&path).await?.into_result()?;
        Ok(serde_json::from_value(result)?)
    }

    async fn stop(&self, names: &[&str]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        self.services_action("stop", names).await?;
        info!(services = ?names, "Services stopped");
        Ok(())
    }

    async fn push(&self, path: &str, contents: &[u8], make_dirs: bool) -> Result<()> {
        let request = json!({
            "action": "write",
            "files": [{ "path": path, "make-dirs": make_dirs }],
        });
        let boundary = boundary_for(contents);
        let body = multipart_body(&boundary, &request, path, contents);
        let envelope = self
            .request(
                Method::POST,
                "/v1/files",
                Some(&format!("multipart/form-data; boundary={}", boundary)),
                Bytes::from(body),
                self.timeout,
            )
            .await?;
        check_file_results(envelope.into_result()?, false)?;
        debug!(path = %path, bytes = contents.len(), "File pushed");
        Ok(())
    }

    async fn remove_path(&self, path: &str, recursive: bool) -> Result<()> {
        let body = json!({
            "action": "remove",
            "paths": [{ "path": path, "recursive": recursive }],
        });
        let envelope = self.post_json("/v1/files", &body).await?;
        if envelope.is_not_found() {
            return Ok(());
        }
        check_file_results(envelope.into_result()?, true)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = path_with_query(
            "/v1/files",
            &[("action", "list"), ("path", path), ("itself", "true")],
        )?;
        let envelope = self.get(&target).await?;
        if envelope.is_not_found() {
            return Ok(false);
        }
        envelope.into_result()?;
        Ok(true)
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let program = request.command.first().cloned().unwrap_or_default();
        let body = json!({
            "command": request.command,
            "environment": request.environment,
            "timeout": format!("{}s", request.timeout.as_secs()),
            "split-stderr": true,
        });
        debug!(command = ?request.command, "Executing in workload container");

        let envelope = self.post_json("/v1/exec", &body).await?;
        let status_code = envelope.status_code;
        let change_id = envelope.change.clone();
        let result = envelope.into_result()?;
        let (Some(change_id), Some(task_id)) =
            (change_id, result.get("task-id").and_then(Value::as_str))
        else {
            return Err(SupervisorError::Api {
                status_code,
                message: "exec response without change or task id".to_string(),
            });
        };

        // The command starts once all three sockets are connected.
        let run = async {
            let control = self.task_socket(task_id, "control").await?;
            let stdio = self.task_socket(task_id, "stdio").await?;
            let stderr = self.task_socket(task_id, "stderr").await?;
            let (stdout, stderr) = tokio::try_join!(read_stdio(stdio), read_output(stderr))?;
            drop(control);
            let change = self.wait_change(&change_id, request.timeout).await?;
            Ok::<_, SupervisorError>((change.exit_code(), stdout, stderr))
        };
        let (exit_code, stdout, stderr) =
            match tokio::time::timeout(request.timeout + WAIT_MARGIN, run).await {
                Ok(result) => result?,
                Err(_) => return Err(SupervisorError::Timeout(program)),
            };

        if exit_code != 0 {
            return Err(SupervisorError::ExitCode {
                exit_code,
                stdout,
                stderr,
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }
}
