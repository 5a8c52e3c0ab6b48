// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Model implementation backed by the agent's hook tools.
//!
//! Every call spawns the corresponding tool (`config-get`, `relation-get`,
//! `status-set`, ...) and parses its `--format=json` output. Tools are found
//! on `PATH` unless a tools directory is configured.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::*;
use crate::config::Config;
use crate::metadata::CharmMetadata;
use crate::status::UnitStatus;

/// Default upper bound for a single hook tool call.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Model access through hook tools.
pub struct HookTools {
    unit_name: String,
    metadata: CharmMetadata,
    tools_dir: Option<PathBuf>,
    timeout: Duration,
}

impl HookTools {
    /// Create a client for the given unit.
    pub fn new(unit_name: impl Into<String>, metadata: CharmMetadata) -> Self {
        Self {
            unit_name: unit_name.into(),
            metadata,
            tools_dir: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Create from the hook process configuration.
    pub fn from_config(config: &Config, metadata: CharmMetadata) -> Self {
        let tools = Self::new(config.unit_name.clone(), metadata);
        match &config.hook_tools_dir {
            Some(dir) => tools.with_tools_dir(dir.clone()),
            None => tools,
        }
    }

    /// Resolve tools from a directory instead of `PATH`.
    pub fn with_tools_dir(mut self, dir: PathBuf) -> Self {
        self.tools_dir = Some(dir);
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn program(&self, tool: &str) -> PathBuf {
        match &self.tools_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    /// Run a tool and return its stdout.
    async fn run(&self, tool: &str, args: &[String]) -> Result<String> {
        self.run_with_input(tool, args, None).await
    }

    /// Run a tool, feeding `input` on stdin, and return its stdout.
    ///
    /// Arguments are logged; input and output are not. Relation data goes
    /// through stdin and `secret-get` prints credentials.
    async fn run_with_input(
        &self,
        tool: &str,
        args: &[String],
        input: Option<&[u8]>,
    ) -> Result<String> {
        debug!(tool = %tool, args = ?args, "Running hook tool");

        let mut cmd = Command::new(self.program(tool));
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let call = async {
            let mut child = cmd.spawn()?;
            if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
                stdin.write_all(input).await?;
            }
            child.wait_with_output().await
        };
        let output = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(ModelError::Timeout(tool.to_string())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let lowered = stderr.to_lowercase();
            if lowered.contains("permission denied") {
                return Err(ModelError::PermissionDenied(stderr));
            }
            if lowered.contains("not found") {
                return Err(ModelError::NotFound(stderr));
            }
            return Err(ModelError::ToolFailed {
                tool: tool.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a tool with `--format=json` and decode its output.
    ///
    /// Empty output decodes as JSON `null`.
    async fn run_json<T: DeserializeOwned>(&self, tool: &str, args: &[String]) -> Result<T> {
        let mut full = vec!["--format=json".to_string()];
        full.extend_from_slice(args);
        let stdout = self.run(tool, &full).await?;
        let trimmed = stdout.trim();
        let body = if trimmed.is_empty() { "null" } else { trimmed };
        Ok(serde_json::from_str(body)?)
    }
}

/// Parse `opened-ports` entries such as `8080/tcp`; other protocols and ranges are skipped.
fn parse_tcp_ports(entries: &[String]) -> BTreeSet<u16> {
    entries
        .iter()
        .filter_map(|entry| {
            let (port, proto) = entry.split_once('/')?;
            if proto != "tcp" {
                return None;
            }
            port.parse().ok()
        })
        .collect()
}

/// `relation-set` arguments; the settings themselves are read from stdin.
fn relation_set_args(relation: &RelationId, scope: Scope) -> Vec<String> {
    let mut args = vec!["-r".to_string(), relation.to_string()];
    if scope == Scope::App {
        args.push("--app".to_string());
    }
    args.extend(["--file".to_string(), "-".to_string()]);
    args
}

#[async_trait]
impl Model for HookTools {
    fn unit_name(&self) -> &str {
        &self.unit_name
    }

    fn metadata(&self) -> &CharmMetadata {
        &self.metadata
    }

    async fn is_leader(&self) -> Result<bool> {
        let leader: Option<bool> = self.run_json("is-leader", &[]).await?;
        Ok(leader.unwrap_or(false))
    }

    async fn config(&self) -> Result<serde_json::Value> {
        let config: Option<serde_json::Value> =
            self.run_json("config-get", &["--all".to_string()]).await?;
        Ok(config.unwrap_or_else(|| serde_json::Value::Object(Default::default())))
    }

    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>> {
        let raw: Option<Vec<String>> = self
            .run_json("relation-ids", &[endpoint.to_string()])
            .await?;
        Ok(raw
            .unwrap_or_default()
            .iter()
            .filter_map(|id| RelationId::parse(id))
            .collect())
    }

    async fn relation_units(&self, relation: &RelationId) -> Result<Vec<String>> {
        let units: Option<Vec<String>> = self
            .run_json("relation-list", &["-r".to_string(), relation.to_string()])
            .await?;
        Ok(units.unwrap_or_default())
    }

    async fn remote_app(&self, relation: &RelationId) -> Result<Option<String>> {
        let app: Option<String> = self
            .run_json(
                "relation-list",
                &["-r".to_string(), relation.to_string(), "--app".to_string()],
            )
            .await?;
        Ok(app.filter(|a| !a.is_empty()))
    }

    async fn relation_get(&self, relation: &RelationId, bag: &DataBag) -> Result<RelationData> {
        let mut args = vec!["-r".to_string(), relation.to_string()];
        let target = match bag {
            DataBag::LocalUnit => self.unit_name.clone(),
            DataBag::LocalApp => {
                args.push("--app".to_string());
                self.app_name().to_string()
            }
            DataBag::RemoteUnit(unit) => unit.clone(),
            DataBag::RemoteApp(app) => {
                args.push("--app".to_string());
                app.clone()
            }
        };
        args.push("-".to_string());
        args.push(target);

        let data: Option<RelationData> = self.run_json("relation-get", &args).await?;
        Ok(data.unwrap_or_default())
    }

    async fn relation_set(
        &self,
        relation: &RelationId,
        scope: Scope,
        data: &RelationData,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        // Values go through stdin so they never show up in argv or logs.
        let input = serde_json::to_vec(data)?;
        self.run_with_input("relation-set", &relation_set_args(relation, scope), Some(&input))
            .await?;
        Ok(())
    }

    async fn secret_get(&self, secret_id: &str) -> Result<RelationData> {
        let content: Option<RelationData> = self
            .run_json("secret-get", &[secret_id.to_string()])
            .await?;
        content.ok_or_else(|| ModelError::NotFound(secret_id.to_string()))
    }

    async fn set_status(&self, status: &UnitStatus) -> Result<()> {
        self.run(
            "status-set",
            &[status.name().to_string(), status.message().to_string()],
        )
        .await?;
        Ok(())
    }

    async fn set_ports(&self, ports: &[u16]) -> Result<()> {
        let opened: Option<Vec<String>> = self.run_json("opened-ports", &[]).await?;
        let opened = parse_tcp_ports(&opened.unwrap_or_default());
        let wanted: BTreeSet<u16> = ports.iter().copied().collect();

        for port in opened.difference(&wanted) {
            info!(port = *port, "Closing port");
            self.run("close-port", &[format!("{}/tcp", port)]).await?;
        }
        for port in wanted.difference(&opened) {
            info!(port = *port, "Opening port");
            self.run("open-port", &[format!("{}/tcp", port)]).await?;
        }
        Ok(())
    }

    async fn set_workload_version(&self, version: &str) -> Result<()> {
        self.run("application-version-set", &[version.to_string()])
            .await?;
        Ok(())
    }
}
