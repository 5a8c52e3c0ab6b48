// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One-at-a-time restart coordination across the units of the application.
//!
//! The lock lives in the `restart` peer relation:
//!
//! | Bag | Key | Values | Writer |
//! |-----|-----|--------|--------|
//! | unit | `state` | `idle`, `acquire`, `release` | the unit |
//! | application | `<unit name>` | `granted`, `idle` | the leader |
//!
//! A unit asks for the lock by setting `state=acquire`. The leader grants it
//! to at most one unit at a time. The holder restarts its workload, sets
//! `state=release`, and the leader hands the lock to the next unit.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{DataBag, Model, RelationData, RelationId, Scope};

/// Peer relation carrying the lock.
pub const RESTART_RELATION: &str = "restart";

const STATE_KEY: &str = "state";
const GRANTED: &str = "granted";
const IDLE: &str = "idle";

/// A unit's position in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Not interested.
    Idle,
    /// Waiting for the grant.
    Acquire,
    /// Done with the grant.
    Release,
}

impl LockState {
    fn as_str(self) -> &'static str {
        match self {
            LockState::Idle => "idle",
            LockState::Acquire => "acquire",
            LockState::Release => "release",
        }
    }

    fn parse(raw: Option<&String>) -> Self {
        match raw.map(String::as_str) {
            Some("acquire") => LockState::Acquire,
            Some("release") => LockState::Release,
            _ => LockState::Idle,
        }
    }
}

/// Handle on the restart lock for the local unit.
pub struct RestartLock<'a> {
    model: &'a dyn Model,
}

impl<'a> RestartLock<'a> {
    /// Create a handle.
    pub fn new(model: &'a dyn Model) -> Self {
        Self { model }
    }

    /// The peer relation, once it exists.
    pub async fn relation(&self) -> Result<Option<RelationId>> {
        Ok(self
            .model
            .relation_ids(RESTART_RELATION)
            .await?
            .into_iter()
            .next())
    }

    async fn state_of(&self, relation: &RelationId, unit: &str) -> Result<LockState> {
        let bag = if unit == self.model.unit_name() {
            DataBag::LocalUnit
        } else {
            DataBag::RemoteUnit(unit.to_string())
        };
        let data = self.model.relation_get(relation, &bag).await?;
        Ok(LockState::parse(data.get(STATE_KEY)))
    }

    async fn set_state(&self, relation: &RelationId, state: LockState) -> Result<()> {
        let data = RelationData::from([(STATE_KEY.to_string(), state.as_str().to_string())]);
        self.model
            .relation_set(relation, Scope::Unit, &data)
            .await?;
        debug!(state = state.as_str(), "Restart lock state updated");
        Ok(())
    }

    /// Ask for the lock.
    pub async fn request(&self, relation: &RelationId) -> Result<()> {
        self.set_state(relation, LockState::Acquire).await?;
        info!(unit = %self.model.unit_name(), "Requested restart lock");
        Ok(())
    }

    /// Give the lock back.
    pub async fn release(&self, relation: &RelationId) -> Result<()> {
        self.set_state(relation, LockState::Release).await?;
        info!(unit = %self.model.unit_name(), "Released restart lock");
        Ok(())
    }

    /// Whether this unit holds the lock and has not released it yet.
    pub async fn is_granted(&self, relation: &RelationId) -> Result<bool> {
        let grants = self
            .model
            .relation_get(relation, &DataBag::LocalApp)
            .await?;
        let granted = grants.get(self.model.unit_name()).map(String::as_str) == Some(GRANTED);
        Ok(granted && self.state_of(relation, self.model.unit_name()).await? == LockState::Acquire)
    }

    /// Leader bookkeeping: retire released and departed grants, then grant
    /// the lock to the first waiting unit if nobody holds it.
    ///
    /// Returns the unit granted by this call. Non-leaders do nothing.
    pub async fn process(&self, relation: &RelationId) -> Result<Option<String>> {
        if !self.model.is_leader().await? {
            return Ok(None);
        }

        let mut units: BTreeSet<String> = self
            .model
            .relation_units(relation)
            .await?
            .into_iter()
            .collect();
        units.insert(self.model.unit_name().to_string());

        let grants = self
            .model
            .relation_get(relation, &DataBag::LocalApp)
            .await?;
        let mut updates = RelationData::new();
        let mut held = false;

        for (unit, value) in &grants {
            if value != GRANTED {
                continue;
            }
            if !units.contains(unit) {
                debug!(unit = %unit, "Dropping grant of departed unit");
                updates.insert(unit.clone(), String::new());
            } else if self.state_of(relation, unit).await? == LockState::Release {
                updates.insert(unit.clone(), IDLE.to_string());
            } else {
                held = true;
            }
        }

        let mut granted = None;
        if !held {
            for unit in &units {
                if self.state_of(relation, unit).await? == LockState::Acquire {
                    updates.insert(unit.clone(), GRANTED.to_string());
                    granted = Some(unit.clone());
                    break;
                }
            }
        }

        if !updates.is_empty() {
            self.model
                .relation_set(relation, Scope::App, &updates)
                .await?;
        }
        if let Some(unit) = &granted {
            info!(unit = %unit, "Granted restart lock");
        }
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::CharmMetadata;
    use crate::model::MockModel;

    #[tokio::test]
    async fn test_single_grant_and_handover() {
        let unit0 = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let unit1 = unit0.peer("ubuntu-insights/1");
        let unit2 = unit0.peer("ubuntu-insights/2");
        unit0.set_leader(true).await;
        let rel = unit0.add_peer_relation(RESTART_RELATION).await;
        unit1.join(&rel).await;
        unit2.join(&rel).await;

        let lock0 = RestartLock::new(&unit0);
        let lock1 = RestartLock::new(&unit1);
        let lock2 = RestartLock::new(&unit2);

        lock2.request(&rel).await.unwrap();
        lock1.request(&rel).await.unwrap();
        assert_eq!(
            lock0.process(&rel).await.unwrap().as_deref(),
            Some("ubuntu-insights/1")
        );
        assert!(lock1.is_granted(&rel).await.unwrap());
        assert!(!lock2.is_granted(&rel).await.unwrap());

        // Still held: nothing new is granted.
        assert_eq!(lock0.process(&rel).await.unwrap(), None);
        assert!(!lock2.is_granted(&rel).await.unwrap());

        lock1.release(&rel).await.unwrap();
        assert!(!lock1.is_granted(&rel).await.unwrap());
        assert_eq!(
            lock0.process(&rel).await.unwrap().as_deref(),
            Some("ubuntu-insights/2")
        );
        assert_eq!(unit0.bag(&rel, "ubuntu-insights").await["ubuntu-insights/1"], "idle");
    }

    #[tokio::test]
    async fn test_departed_holder_frees_lock() {
        let unit0 = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let unit1 = unit0.peer("ubuntu-insights/1");
        unit0.set_leader(true).await;
        let rel = unit0.add_peer_relation(RESTART_RELATION).await;
        unit1.join(&rel).await;

        let lock0 = RestartLock::new(&unit0);
        let lock1 = RestartLock::new(&unit1);
        lock1.request(&rel).await.unwrap();
        lock0.request(&rel).await.unwrap();
        lock0.process(&rel).await.unwrap();
        // Sorted order: unit 0 first.
        assert!(lock0.is_granted(&rel).await.unwrap());
        lock0.release(&rel).await.unwrap();
        assert_eq!(
            lock0.process(&rel).await.unwrap().as_deref(),
            Some("ubuntu-insights/1")
        );

        unit1.depart(&rel).await;
        assert_eq!(lock0.process(&rel).await.unwrap(), None);
        assert!(
            !unit0
                .bag(&rel, "ubuntu-insights")
                .await
                .contains_key("ubuntu-insights/1")
        );
    }

    #[tokio::test]
    async fn test_non_leader_does_not_grant() {
        let unit0 = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let unit1 = unit0.peer("ubuntu-insights/1");
        let rel = unit0.add_peer_relation(RESTART_RELATION).await;
        unit1.join(&rel).await;
        unit0.set_leader(true).await;

        let lock1 = RestartLock::new(&unit1);
        lock1.request(&rel).await.unwrap();
        assert_eq!(lock1.process(&rel).await.unwrap(), None);
        assert!(!lock1.is_granted(&rel).await.unwrap());
    }
}
