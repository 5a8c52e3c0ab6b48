// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock supervisor for testing.
//!
//! Simulates Pebble's plan, replan and file semantics in memory without a
//! workload container.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::layer::{Layer, ServiceSpec, Startup};

/// What `exec` does.
#[derive(Debug, Clone)]
pub enum ExecBehaviour {
    /// Exit 0 with the given stdout.
    Succeed(String),
    /// Exit with a code and stderr.
    Fail {
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },
}

#[derive(Debug)]
struct MockState {
    connectable: bool,
    fail_pushes: bool,
    layers: Vec<(String, Layer)>,
    /// Running services with the definition they were started from.
    running: BTreeMap<String, ServiceSpec>,
    files: BTreeMap<String, Vec<u8>>,
    exec_behaviour: ExecBehaviour,
    exec_calls: Vec<ExecRequest>,
    replans: usize,
}

/// Mock supervisor for testing.
pub struct MockSupervisor {
    state: Mutex<MockState>,
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSupervisor {
    /// Create a reachable supervisor with an empty plan.
    pub fn new() -> Self {
        Self::with_connectable(true)
    }

    /// Create a supervisor that cannot be reached.
    pub fn unreachable() -> Self {
        Self::with_connectable(false)
    }

    fn with_connectable(connectable: bool) -> Self {
        Self {
            state: Mutex::new(MockState {
                connectable,
                fail_pushes: false,
                layers: Vec::new(),
                running: BTreeMap::new(),
                files: BTreeMap::new(),
                exec_behaviour: ExecBehaviour::Succeed(String::new()),
                exec_calls: Vec::new(),
                replans: 0,
            }),
        }
    }

    /// Toggle reachability.
    pub async fn set_connectable(&self, connectable: bool) {
        self.state.lock().await.connectable = connectable;
    }

    /// Make file writes fail while still answering other calls.
    pub async fn fail_pushes(&self, fail: bool) {
        self.state.lock().await.fail_pushes = fail;
    }

    /// Decide what subsequent `exec` calls do.
    pub async fn set_exec_behaviour(&self, behaviour: ExecBehaviour) {
        self.state.lock().await.exec_behaviour = behaviour;
    }

    /// Every command executed so far.
    pub async fn exec_calls(&self) -> Vec<ExecRequest> {
        self.state.lock().await.exec_calls.clone()
    }

    /// Number of replans requested.
    pub async fn replan_count(&self) -> usize {
        self.state.lock().await.replans
    }

    /// A layer as currently stored.
    pub async fn layer(&self, label: &str) -> Option<Layer> {
        let state = self.state.lock().await;
        state
            .layers
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, layer)| layer.clone())
    }

    /// All layers combined in order.
    pub async fn plan(&self) -> Layer {
        combined_plan(&self.state.lock().await.layers)
    }

    /// Contents of a pushed file.
    pub async fn file(&self, path: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Names of running services.
    pub async fn running(&self) -> Vec<String> {
        self.state.lock().await.running.keys().cloned().collect()
    }

    /// Start a service directly, as if Pebble had started it earlier.
    pub async fn start_service(&self, name: &str) {
        let mut state = self.state.lock().await;
        let plan = combined_plan(&state.layers);
        if let Some(spec) = plan.services.get(name) {
            state.running.insert(name.to_string(), spec.clone());
        }
    }
}

fn combined_plan(layers: &[(String, Layer)]) -> Layer {
    let mut plan = Layer::default();
    for (_, layer) in layers {
        plan.combine(layer);
    }
    plan
}

fn unreachable_error() -> SupervisorError {
    SupervisorError::Connection("socket not available".to_string())
}

#[async_trait]
impl Supervisor for MockSupervisor {
    fn supervisor_type(&self) -> &'static str {
        "mock"
    }

    async fn can_connect(&self) -> bool {
        self.state.lock().await.connectable
    }

    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        match state.layers.iter_mut().find(|(l, _)| l == label) {
            Some((_, existing)) if combine => existing.combine(layer),
            Some(_) => {
                return Err(SupervisorError::Api {
                    status_code: 400,
                    message: format!("layer \"{}\" already exists", label),
                });
            }
            None => state.layers.push((label.to_string(), layer.clone())),
        }
        Ok(())
    }

    async fn replan(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        state.replans += 1;
        let plan = combined_plan(&state.layers);
        for (name, spec) in plan.services {
            let changed = state.running.get(&name) != Some(&spec);
            match spec.startup {
                Startup::Enabled if changed => {
                    state.running.insert(name, spec);
                }
                Startup::Disabled if changed => {
                    state.running.remove(&name);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn services(&self, names: &[&str]) -> Result<Vec<ServiceInfo>> {
        let state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        let plan = combined_plan(&state.layers);
        Ok(plan
            .services
            .iter()
            .filter(|(name, _)| names.is_empty() || names.contains(&name.as_str()))
            .map(|(name, spec)| ServiceInfo {
                name: name.clone(),
                startup: spec.startup,
                current: if state.running.contains_key(name) {
                    ServiceState::Active
                } else {
                    ServiceState::Inactive
                },
            })
            .collect())
    }

    async fn stop(&self, names: &[&str]) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        let plan = combined_plan(&state.layers);
        for name in names {
            if !plan.services.contains_key(*name) {
                return Err(SupervisorError::Api {
                    status_code: 400,
                    message: format!("service \"{}\" does not exist", name),
                });
            }
        }
        for name in names {
            state.running.remove(*name);
        }
        Ok(())
    }

    async fn push(&self, path: &str, contents: &[u8], _make_dirs: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        if state.fail_pushes {
            return Err(SupervisorError::Api {
                status_code: 500,
                message: format!("cannot write {}", path),
            });
        }
        state.files.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn remove_path(&self, path: &str, recursive: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        state
            .files
            .retain(|p, _| p != path && !(recursive && p.starts_with(&prefix)));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(state
            .files
            .keys()
            .any(|p| p == path || p.starts_with(&prefix)))
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(unreachable_error());
        }
        state.exec_calls.push(request.clone());
        match &state.exec_behaviour {
            ExecBehaviour::Succeed(stdout) => Ok(ExecOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            ExecBehaviour::Fail { exit_code, stderr } => Err(SupervisorError::ExitCode {
                exit_code: *exit_code,
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
        }
    }
}
