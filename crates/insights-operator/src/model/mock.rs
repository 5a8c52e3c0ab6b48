// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock model for testing.
//!
//! Keeps relation data in memory. Several units can share one store through
//! [`MockModel::peer`], which is how cross-unit coordination is exercised.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::metadata::CharmMetadata;
use crate::status::UnitStatus;

#[derive(Debug, Default)]
struct MockRelation {
    /// `None` for peer relations.
    remote_app: Option<String>,
    /// Units taking part; for peers this includes every local unit that joined.
    units: BTreeSet<String>,
    /// Bags keyed by owner (unit or application name).
    bags: BTreeMap<String, RelationData>,
}

#[derive(Debug, Default)]
struct SharedState {
    relations: BTreeMap<RelationId, MockRelation>,
    leader: Option<String>,
    secrets: BTreeMap<String, RelationData>,
    next_relation_id: u32,
    config: serde_json::Value,
}

#[derive(Debug, Default)]
struct LocalState {
    statuses: Vec<UnitStatus>,
    opened_ports: BTreeSet<u16>,
    workload_version: Option<String>,
    deny_relation_reads: bool,
}

/// In-memory model for tests.
pub struct MockModel {
    unit_name: String,
    metadata: CharmMetadata,
    shared: Arc<Mutex<SharedState>>,
    local: Mutex<LocalState>,
}

impl MockModel {
    /// Create a mock for a single unit with empty config.
    pub fn new(unit_name: impl Into<String>, metadata: CharmMetadata) -> Self {
        let shared = SharedState {
            config: serde_json::json!({}),
            ..Default::default()
        };
        Self {
            unit_name: unit_name.into(),
            metadata,
            shared: Arc::new(Mutex::new(shared)),
            local: Mutex::new(LocalState::default()),
        }
    }

    /// Another unit of the same application, sharing relations, config and leadership.
    pub fn peer(&self, unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            metadata: self.metadata.clone(),
            shared: self.shared.clone(),
            local: Mutex::new(LocalState::default()),
        }
    }

    /// Make this unit the leader (or drop leadership).
    pub async fn set_leader(&self, leader: bool) {
        let mut shared = self.shared.lock().await;
        if leader {
            shared.leader = Some(self.unit_name.clone());
        } else if shared.leader.as_deref() == Some(self.unit_name.as_str()) {
            shared.leader = None;
        }
    }

    /// Replace the operator options.
    pub async fn set_config(&self, config: serde_json::Value) {
        self.shared.lock().await.config = config;
    }

    /// Relate to a remote application.
    pub async fn add_relation(&self, endpoint: &str, remote_app: &str) -> RelationId {
        let mut shared = self.shared.lock().await;
        shared.next_relation_id += 1;
        let id = RelationId::new(endpoint, shared.next_relation_id);
        shared.relations.insert(
            id.clone(),
            MockRelation {
                remote_app: Some(remote_app.to_string()),
                units: BTreeSet::from([format!("{}/0", remote_app)]),
                bags: BTreeMap::new(),
            },
        );
        id
    }

    /// Create a peer relation this unit is part of.
    pub async fn add_peer_relation(&self, endpoint: &str) -> RelationId {
        let mut shared = self.shared.lock().await;
        shared.next_relation_id += 1;
        let id = RelationId::new(endpoint, shared.next_relation_id);
        shared.relations.insert(
            id.clone(),
            MockRelation {
                remote_app: None,
                units: BTreeSet::from([self.unit_name.clone()]),
                bags: BTreeMap::new(),
            },
        );
        id
    }

    /// Join an existing peer relation.
    pub async fn join(&self, relation: &RelationId) {
        let mut shared = self.shared.lock().await;
        if let Some(rel) = shared.relations.get_mut(relation) {
            rel.units.insert(self.unit_name.clone());
        }
    }

    /// Leave a peer relation; the unit's bag goes with it.
    pub async fn depart(&self, relation: &RelationId) {
        let mut shared = self.shared.lock().await;
        if let Some(rel) = shared.relations.get_mut(relation) {
            rel.units.remove(&self.unit_name);
            rel.bags.remove(&self.unit_name);
        }
    }

    /// Drop a relation entirely.
    pub async fn remove_relation(&self, relation: &RelationId) {
        self.shared.lock().await.relations.remove(relation);
    }

    /// Replace the remote application's bag.
    pub async fn set_remote_app_data(&self, relation: &RelationId, data: RelationData) {
        let mut shared = self.shared.lock().await;
        if let Some(rel) = shared.relations.get_mut(relation)
            && let Some(app) = rel.remote_app.clone()
        {
            rel.bags.insert(app, data);
        }
    }

    /// Read any bag by owner name, for assertions.
    pub async fn bag(&self, relation: &RelationId, owner: &str) -> RelationData {
        let shared = self.shared.lock().await;
        shared
            .relations
            .get(relation)
            .and_then(|rel| rel.bags.get(owner))
            .cloned()
            .unwrap_or_default()
    }

    /// Register a secret.
    pub async fn add_secret(&self, secret_id: &str, content: RelationData) {
        self.shared
            .lock()
            .await
            .secrets
            .insert(secret_id.to_string(), content);
    }

    /// Make relation reads fail with a permission error.
    pub async fn deny_relation_reads(&self, deny: bool) {
        self.local.lock().await.deny_relation_reads = deny;
    }

    /// Every status set so far, oldest first.
    pub async fn statuses(&self) -> Vec<UnitStatus> {
        self.local.lock().await.statuses.clone()
    }

    /// Last status set.
    pub async fn status(&self) -> Option<UnitStatus> {
        self.local.lock().await.statuses.last().cloned()
    }

    /// Currently opened TCP ports.
    pub async fn opened_ports(&self) -> BTreeSet<u16> {
        self.local.lock().await.opened_ports.clone()
    }

    /// Recorded workload version.
    pub async fn workload_version(&self) -> Option<String> {
        self.local.lock().await.workload_version.clone()
    }
}

#[async_trait]
impl Model for MockModel {
    fn unit_name(&self) -> &str {
        &self.unit_name
    }

    fn metadata(&self) -> &CharmMetadata {
        &self.metadata
    }

    async fn is_leader(&self) -> Result<bool> {
        let shared = self.shared.lock().await;
        Ok(shared.leader.as_deref() == Some(self.unit_name.as_str()))
    }

    async fn config(&self) -> Result<serde_json::Value> {
        Ok(self.shared.lock().await.config.clone())
    }

    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>> {
        let shared = self.shared.lock().await;
        Ok(shared
            .relations
            .iter()
            .filter(|(id, rel)| {
                id.endpoint == endpoint
                    && (rel.remote_app.is_some() || rel.units.contains(&self.unit_name))
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn relation_units(&self, relation: &RelationId) -> Result<Vec<String>> {
        let shared = self.shared.lock().await;
        let rel = shared
            .relations
            .get(relation)
            .ok_or_else(|| ModelError::NotFound(relation.to_string()))?;
        Ok(rel
            .units
            .iter()
            .filter(|u| **u != self.unit_name)
            .cloned()
            .collect())
    }

    async fn remote_app(&self, relation: &RelationId) -> Result<Option<String>> {
        let shared = self.shared.lock().await;
        let rel = shared
            .relations
            .get(relation)
            .ok_or_else(|| ModelError::NotFound(relation.to_string()))?;
        Ok(rel.remote_app.clone())
    }

    async fn relation_get(&self, relation: &RelationId, bag: &DataBag) -> Result<RelationData> {
        if self.local.lock().await.deny_relation_reads {
            return Err(ModelError::PermissionDenied(format!(
                "cannot read relation {}",
                relation
            )));
        }
        let shared = self.shared.lock().await;
        let rel = shared
            .relations
            .get(relation)
            .ok_or_else(|| ModelError::NotFound(relation.to_string()))?;
        let owner = match bag {
            DataBag::LocalUnit => self.unit_name.as_str(),
            DataBag::LocalApp => self.app_name(),
            DataBag::RemoteUnit(unit) => unit.as_str(),
            DataBag::RemoteApp(app) => app.as_str(),
        };
        Ok(rel.bags.get(owner).cloned().unwrap_or_default())
    }

    async fn relation_set(
        &self,
        relation: &RelationId,
        scope: Scope,
        data: &RelationData,
    ) -> Result<()> {
        let mut shared = self.shared.lock().await;
        let is_leader = shared.leader.as_deref() == Some(self.unit_name.as_str());
        if scope == Scope::App && !is_leader {
            return Err(ModelError::PermissionDenied(
                "cannot write application data: not the leader".to_string(),
            ));
        }
        let owner = match scope {
            Scope::Unit => self.unit_name.clone(),
            Scope::App => self.app_name().to_string(),
        };
        let rel = shared
            .relations
            .get_mut(relation)
            .ok_or_else(|| ModelError::NotFound(relation.to_string()))?;
        let bag = rel.bags.entry(owner).or_default();
        for (key, value) in data {
            if value.is_empty() {
                bag.remove(key);
            } else {
                bag.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn secret_get(&self, secret_id: &str) -> Result<RelationData> {
        self.shared
            .lock()
            .await
            .secrets
            .get(secret_id)
            .cloned()
            .ok_or_else(|| ModelError::NotFound(secret_id.to_string()))
    }

    async fn set_status(&self, status: &UnitStatus) -> Result<()> {
        self.local.lock().await.statuses.push(status.clone());
        Ok(())
    }

    async fn set_ports(&self, ports: &[u16]) -> Result<()> {
        self.local.lock().await.opened_ports = ports.iter().copied().collect();
        Ok(())
    }

    async fn set_workload_version(&self, version: &str) -> Result<()> {
        self.local.lock().await.workload_version = Some(version.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_bag_requires_leadership() {
        let model = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let rel = model.add_relation("database", "postgresql-k8s").await;
        let data = RelationData::from([("database".to_string(), "insights".to_string())]);

        let err = model.relation_set(&rel, Scope::App, &data).await;
        assert!(matches!(err, Err(ModelError::PermissionDenied(_))));

        model.set_leader(true).await;
        model.relation_set(&rel, Scope::App, &data).await.unwrap();
        assert_eq!(model.bag(&rel, "ubuntu-insights").await, data);
    }

    #[tokio::test]
    async fn test_empty_value_deletes_key() {
        let model = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let rel = model.add_relation("database", "postgresql-k8s").await;
        let set = RelationData::from([("k".to_string(), "v".to_string())]);
        model.relation_set(&rel, Scope::Unit, &set).await.unwrap();
        let clear = RelationData::from([("k".to_string(), String::new())]);
        model.relation_set(&rel, Scope::Unit, &clear).await.unwrap();
        assert!(model.bag(&rel, "ubuntu-insights/0").await.is_empty());
    }

    #[tokio::test]
    async fn test_peers_share_relations() {
        let unit0 = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let unit1 = unit0.peer("ubuntu-insights/1");
        let rel = unit0.add_peer_relation("restart").await;

        assert!(unit1.relation_ids("restart").await.unwrap().is_empty());
        unit1.join(&rel).await;
        assert_eq!(unit1.relation_ids("restart").await.unwrap(), vec![rel.clone()]);
        assert_eq!(
            unit0.relation_units(&rel).await.unwrap(),
            vec!["ubuntu-insights/1".to_string()]
        );
        assert_eq!(unit0.app_name(), "ubuntu-insights");
    }
}
