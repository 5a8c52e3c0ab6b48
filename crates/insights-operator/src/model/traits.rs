// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Model trait definitions.
//!
//! Defines the abstract interface to the model agent: configuration,
//! relation data, secrets, leadership, ports and status.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::CharmMetadata;
use crate::status::UnitStatus;

/// Errors from model operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// A hook tool exited with a non-zero code.
    #[error("{tool} failed with exit code {exit_code}: {stderr}")]
    ToolFailed {
        /// Hook tool name.
        tool: String,
        /// Exit code from the tool.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// The agent refused access (e.g. reading a bag this unit may not see).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A hook tool did not answer in time.
    #[error("{0} timed out")]
    Timeout(String),

    /// Requested relation or secret does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tool output was not the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Key/value content of a relation data bag.
pub type RelationData = BTreeMap<String, String>;

/// Relation identifier as handed out by the agent, e.g. `database:3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId {
    /// Endpoint name from the metadata.
    pub endpoint: String,
    /// Numeric id, unique within the model.
    pub id: u32,
}

impl RelationId {
    /// Create a relation id.
    pub fn new(endpoint: impl Into<String>, id: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            id,
        }
    }

    /// Parse `endpoint:id`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (endpoint, id) = raw.rsplit_once(':')?;
        if endpoint.is_empty() {
            return None;
        }
        Some(Self::new(endpoint, id.parse().ok()?))
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.id)
    }
}

/// Which data bag of a relation to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataBag {
    /// This unit's bag.
    LocalUnit,
    /// This application's bag (leader writes, every unit reads).
    LocalApp,
    /// A remote unit's bag.
    RemoteUnit(String),
    /// The remote application's bag.
    RemoteApp(String),
}

/// Which local bag to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// This unit's bag.
    Unit,
    /// This application's bag; leader only.
    App,
}

/// Access to the model agent for the current hook.
///
/// Implementations are synchronous from the hook's point of view: each call
/// completes (or fails) before the next one starts.
#[async_trait]
pub trait Model: Send + Sync {
    /// Name of this unit, e.g. `ubuntu-insights/0`.
    fn unit_name(&self) -> &str;

    /// Application this unit belongs to.
    fn app_name(&self) -> &str {
        self.unit_name()
            .split_once('/')
            .map(|(app, _)| app)
            .unwrap_or_else(|| self.unit_name())
    }

    /// Static charm metadata.
    fn metadata(&self) -> &CharmMetadata;

    /// Whether this unit is the application leader.
    async fn is_leader(&self) -> Result<bool>;

    /// Raw operator options.
    async fn config(&self) -> Result<serde_json::Value>;

    /// Relations established on an endpoint.
    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>>;

    /// Remote units currently in a relation (peers for a peer relation).
    async fn relation_units(&self, relation: &RelationId) -> Result<Vec<String>>;

    /// Name of the application on the other side.
    async fn remote_app(&self, relation: &RelationId) -> Result<Option<String>>;

    /// Read a data bag.
    async fn relation_get(&self, relation: &RelationId, bag: &DataBag) -> Result<RelationData>;

    /// Merge keys into a local bag; an empty value deletes the key.
    async fn relation_set(
        &self,
        relation: &RelationId,
        scope: Scope,
        data: &RelationData,
    ) -> Result<()>;

    /// Content of a secret.
    async fn secret_get(&self, secret_id: &str) -> Result<RelationData>;

    /// Show a status for this unit.
    async fn set_status(&self, status: &UnitStatus) -> Result<()>;

    /// Make exactly the given TCP ports open.
    async fn set_ports(&self, ports: &[u16]) -> Result<()>;

    /// Record the workload version.
    async fn set_workload_version(&self, version: &str) -> Result<()>;
}
