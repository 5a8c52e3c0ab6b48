// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for insights-operator integration tests.
//!
//! Provides TestContext wiring a reconciler to in-memory model and supervisor,
//! plus small fakes for Pebble's socket and the hook tools.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;

use insights_operator::metadata::CharmMetadata;
use insights_operator::model::{MockModel, RelationData, RelationId};
use insights_operator::reconciler::Reconciler;
use insights_operator::supervisor::MockSupervisor;
use insights_operator::workload::StaticProbe;

pub const UNIT: &str = "ubuntu-insights/0";
pub const MOUNT: &str = "/var/lib/ubuntu-insights/";
pub const WORKLOAD_VERSION: &str = "1.0.0";

pub const METADATA: &str = r#"
name: ubuntu-insights
containers:
  ubuntu-insights-server:
    resource: ubuntu-insights-server-image
    mounts:
      - storage: reports-cache
        location: /var/lib/ubuntu-insights/
"#;

pub const METADATA_WITHOUT_MOUNT: &str = r#"
name: ubuntu-insights
containers:
  ubuntu-insights-server:
    resource: ubuntu-insights-server-image
"#;

/// Reconciler wired to mocks.
pub struct TestContext {
    pub model: Arc<MockModel>,
    pub supervisor: Arc<MockSupervisor>,
    pub reconciler: Reconciler,
}

impl TestContext {
    /// Single unit with the reports cache mounted.
    pub fn new() -> Self {
        Self::with_metadata(METADATA)
    }

    /// Single unit with the given metadata document.
    pub fn with_metadata(yaml: &str) -> Self {
        let metadata = CharmMetadata::from_yaml(yaml).expect("valid metadata");
        Self::build(Arc::new(MockModel::new(UNIT, metadata)), MockSupervisor::new())
    }

    /// Single unit whose Pebble cannot be reached.
    pub fn unreachable() -> Self {
        let metadata = CharmMetadata::from_yaml(METADATA).expect("valid metadata");
        Self::build(
            Arc::new(MockModel::new(UNIT, metadata)),
            MockSupervisor::unreachable(),
        )
    }

    /// Another unit of the same application, with its own workload.
    pub fn peer(&self, unit: &str) -> Self {
        Self::build(Arc::new(self.model.peer(unit)), MockSupervisor::new())
    }

    fn build(model: Arc<MockModel>, supervisor: MockSupervisor) -> Self {
        let supervisor = Arc::new(supervisor);
        let reconciler = Reconciler::new(
            model.clone(),
            supervisor.clone(),
            Arc::new(StaticProbe(Some(WORKLOAD_VERSION.to_string()))),
        )
        .with_model_identity("insights", "7c9a");
        Self {
            model,
            supervisor,
            reconciler,
        }
    }

    /// Relate to a database provider that has not answered yet.
    pub async fn add_database(&self) -> RelationId {
        self.model.add_relation("database", "postgresql-k8s").await
    }

    /// Relate to a database provider that published full credentials.
    pub async fn add_ready_database(&self) -> RelationId {
        let relation = self.add_database().await;
        self.model
            .set_remote_app_data(&relation, ready_bag("db.example:5432"))
            .await;
        relation
    }
}

/// Provider bag with credentials for the given endpoint.
pub fn ready_bag(endpoints: &str) -> RelationData {
    RelationData::from([
        ("endpoints".to_string(), endpoints.to_string()),
        ("username".to_string(), "insights_user".to_string()),
        ("password".to_string(), "s3cret".to_string()),
        ("database".to_string(), "insights".to_string()),
    ])
}

/// A request seen by [`FakePebble`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

type Responder = dyn Fn(&str, &str) -> (u16, String) + Send + Sync;
type StreamSource = dyn Fn(&str) -> Vec<u8> + Send + Sync;

/// Minimal HTTP/1.1 server on a unix socket answering with canned JSON.
///
/// Websocket upgrades are accepted as exec task streams: `stdio` and
/// `stderr` send their canned output followed by the end marker.
pub struct FakePebble {
    pub socket: PathBuf,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    _dir: tempfile::TempDir,
}

impl FakePebble {
    /// Start serving; `respond(method, target)` picks status and body.
    pub fn start(respond: impl Fn(&str, &str) -> (u16, String) + Send + Sync + 'static) -> Self {
        Self::start_with_streams(respond, |_| Vec::new())
    }

    /// Like [`FakePebble::start`]; `output(name)` feeds the task websocket `name`.
    pub fn start_with_streams(
        respond: impl Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
        output: impl Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("pebble.socket");
        let listener = UnixListener::bind(&socket).expect("bind pebble socket");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);
        let output: Arc<StreamSource> = Arc::new(output);

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    respond.clone(),
                    output.clone(),
                    recorded.clone(),
                ));
            }
        });

        Self {
            socket,
            requests,
            _dir: dir,
        }
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }
}

async fn serve(
    mut stream: UnixStream,
    respond: Arc<Responder>,
    output: Arc<StreamSource>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };

    let upgrade = request
        .header("upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    if upgrade {
        let key = request.header("sec-websocket-key").unwrap_or_default();
        let accept = derive_accept_key(key.as_bytes());
        let name = request.target.rsplit('/').next().unwrap_or_default().to_string();
        recorded.lock().await.push(request);
        let handshake = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept
        );
        if stream.write_all(handshake.as_bytes()).await.is_err() {
            return;
        }
        let mut socket = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        if name != "control" {
            let _ = socket.send(Message::Binary(output(&name))).await;
            let _ = socket
                .send(Message::Text(r#"{"command":"end"}"#.to_string()))
                .await;
        }
        while let Some(Ok(_)) = socket.next().await {}
        return;
    }

    let (status, body) = respond(&request.method, &request.target);
    recorded.lock().await.push(request);
    let response = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut UnixStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        target,
        headers,
        body: buf[header_end..].to_vec(),
    })
}

/// Write an executable shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
}
