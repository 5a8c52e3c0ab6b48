// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor trait definitions.
//!
//! Defines the abstract interface to the process supervisor running inside
//! the workload container.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layer::{Layer, Startup};

/// Errors from supervisor operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The supervisor socket could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The API answered with an error.
    #[error("API error {status_code}: {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Message from the supervisor.
        message: String,
    },

    /// An asynchronous change finished in error.
    #[error("Change {id} failed: {message}")]
    ChangeFailed {
        /// Change id.
        id: String,
        /// Error reported for the change.
        message: String,
    },

    /// Executed command exited with a non-zero code.
    #[error("Exit code {exit_code}: {stderr}")]
    ExitCode {
        /// Exit code from the process.
        exit_code: i32,
        /// Standard output.
        stdout: String,
        /// Standard error output.
        stderr: String,
    },

    /// Request or command timed out.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Layer serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Run state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Running.
    Active,
    /// Not running.
    Inactive,
    /// Waiting to be restarted after a failure.
    Backoff,
    /// Gave up restarting.
    Error,
}

/// Service as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Startup mode in the current plan.
    pub startup: Startup,
    /// Run state.
    pub current: ServiceState,
}

impl ServiceInfo {
    /// Whether the service is up.
    pub fn is_running(&self) -> bool {
        self.current == ServiceState::Active
    }
}

/// One-shot command to run in the workload container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Extra environment.
    pub environment: BTreeMap<String, String>,
    /// Kill the command after this long.
    pub timeout: Duration,
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error output.
    pub stderr: String,
}

/// Trait for process supervisors.
///
/// The operator never starts workload processes itself: it describes them in
/// a layer and asks the supervisor to converge ("replan").
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Supervisor type identifier (e.g., "pebble", "mock")
    fn supervisor_type(&self) -> &'static str;

    /// Whether the supervisor answers at all.
    async fn can_connect(&self) -> bool;

    /// Add a layer, or with `combine` merge into the layer of the same label.
    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()>;

    /// Converge running processes with the plan: start enabled services,
    /// restart changed ones, stop changed disabled ones.
    async fn replan(&self) -> Result<()>;

    /// Services in the plan; all of them when `names` is empty.
    async fn services(&self, names: &[&str]) -> Result<Vec<ServiceInfo>>;

    /// Stop services.
    async fn stop(&self, names: &[&str]) -> Result<()>;

    /// Write a file.
    async fn push(&self, path: &str, contents: &[u8], make_dirs: bool) -> Result<()>;

    /// Remove a path; a missing path is not an error.
    async fn remove_path(&self, path: &str, recursive: bool) -> Result<()>;

    /// Whether a path exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Run a command to completion.
    ///
    /// A non-zero exit is reported as [`SupervisorError::ExitCode`].
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput>;
}
