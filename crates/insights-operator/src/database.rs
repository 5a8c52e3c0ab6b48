// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL relation handling.
//!
//! The database provider publishes `endpoints`, `username`, `password` and
//! `database` in its application bag (credentials may instead come as a
//! `secret-user` secret reference). This module turns that bag into a
//! [`ConnectionDescriptor`], publishes the database request, and derives
//! "created" / "endpoints changed" transitions from successive bags.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::model::{DataBag, Model, RelationData, RelationId, Scope};

/// Endpoint of the database relation.
pub const DATABASE_RELATION: &str = "database";

/// Database the operator asks the provider to create.
pub const DATABASE_NAME: &str = "insights";

/// Key in this unit's bag holding the last seen provider bag.
const SNAPSHOT_KEY: &str = "data";

const ENV_PREFIX: &str = "UBUNTU_INSIGHTS_INGEST_SERVICE_";

/// Connection details for the ingest database.
///
/// Either fully populated or entirely empty; never partial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Host of the primary endpoint.
    pub host: String,
    /// Port of the primary endpoint.
    pub port: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub db_name: String,
}

impl ConnectionDescriptor {
    /// Parse a provider bag. Anything incomplete yields the empty descriptor.
    pub fn from_relation_data(data: &RelationData) -> Self {
        let Some(endpoints) = data.get("endpoints").filter(|e| !e.is_empty()) else {
            debug!("Database relation has no endpoints yet");
            return Self::default();
        };

        let primary = endpoints.split(',').next().unwrap_or_default();
        let parts: Vec<&str> = primary.split(':').collect();
        if parts.len() < 2 {
            info!(endpoint = %primary, "Could not parse primary endpoint from database relation data");
            return Self::default();
        }

        let (Some(user), Some(password), Some(db_name)) = (
            data.get("username"),
            data.get("password"),
            data.get("database"),
        ) else {
            debug!("Database relation is missing credentials or database name");
            return Self::default();
        };

        info!(host = %parts[0], port = %parts[1], "Fetched database endpoint");

        Self {
            host: parts[0].to_string(),
            port: parts[1].to_string(),
            user: user.clone(),
            password: password.clone(),
            db_name: db_name.clone(),
        }
    }

    /// Usable for connecting.
    pub fn is_ready(&self) -> bool {
        !self.host.is_empty()
    }

    /// Environment the ingest binary reads its database settings from.
    ///
    /// Empty when not ready.
    pub fn environment(&self) -> BTreeMap<String, String> {
        if !self.is_ready() {
            return BTreeMap::new();
        }
        [
            ("HOST", &self.host),
            ("PORT", &self.port),
            ("USER", &self.user),
            ("PASSWORD", &self.password),
            ("DBNAME", &self.db_name),
        ]
        .into_iter()
        .map(|(key, value)| (format!("{}DBCONFIG_{}", ENV_PREFIX, key), value.clone()))
        .collect()
    }
}

/// Transition observed on the provider bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseChange {
    /// Credentials appeared: a database was created for us.
    Created,
    /// The endpoint list appeared or changed.
    EndpointsChanged,
    /// Something else changed.
    Other,
}

/// Compare two provider bags.
pub fn classify_change(old: &RelationData, new: &RelationData) -> DatabaseChange {
    let added = |key: &str| !old.contains_key(key) && new.contains_key(key);
    let changed = |key: &str| {
        old.get(key)
            .zip(new.get(key))
            .map(|(a, b)| a != b)
            .unwrap_or(false)
    };

    if (added("username") && added("password")) || added("secret-user") {
        DatabaseChange::Created
    } else if added("endpoints") || changed("endpoints") {
        DatabaseChange::EndpointsChanged
    } else {
        DatabaseChange::Other
    }
}

/// Requirer side of the database relation.
pub struct DatabaseRequirer<'a> {
    model: &'a dyn Model,
    /// Relation being torn down in this hook; treated as absent.
    breaking: Option<&'a RelationId>,
}

impl<'a> DatabaseRequirer<'a> {
    /// Create a requirer.
    pub fn new(model: &'a dyn Model) -> Self {
        Self {
            model,
            breaking: None,
        }
    }

    /// Treat the given relation as already gone.
    pub fn excluding(mut self, relation: Option<&'a RelationId>) -> Self {
        self.breaking = relation;
        self
    }

    /// The active database relation, if any.
    pub async fn relation(&self) -> Option<RelationId> {
        match self.model.relation_ids(DATABASE_RELATION).await {
            Ok(ids) => ids
                .into_iter()
                .find(|id| Some(id) != self.breaking),
            Err(e) => {
                warn!(error = %e, "Failed to list database relations");
                None
            }
        }
    }

    /// Current connection descriptor; empty on any problem.
    pub async fn fetch(&self) -> ConnectionDescriptor {
        let Some(relation) = self.relation().await else {
            info!(relation = DATABASE_RELATION, "Could not find database relation");
            return ConnectionDescriptor::default();
        };

        match self.provider_data(&relation).await {
            Ok(data) => ConnectionDescriptor::from_relation_data(&data),
            Err(e) => {
                warn!(relation = %relation, error = %e, "Error fetching database relation data");
                ConnectionDescriptor::default()
            }
        }
    }

    /// Whether the relation exists and carries a usable connection.
    pub async fn is_ready(&self) -> bool {
        self.fetch().await.is_ready()
    }

    /// Provider bag with secret-held credentials resolved.
    async fn provider_data(&self, relation: &RelationId) -> crate::error::Result<RelationData> {
        let Some(app) = self.model.remote_app(relation).await? else {
            return Ok(RelationData::new());
        };
        let mut data = self
            .model
            .relation_get(relation, &DataBag::RemoteApp(app))
            .await?;

        if !data.contains_key("username")
            && let Some(secret_id) = data.get("secret-user").cloned()
        {
            let secret = self.model.secret_get(&secret_id).await?;
            for key in ["username", "password"] {
                if let Some(value) = secret.get(key) {
                    data.insert(key.to_string(), value.clone());
                }
            }
        }
        Ok(data)
    }

    /// Ask the provider for our database. Leader only; others do nothing.
    pub async fn request_database(&self, relation: &RelationId) -> crate::error::Result<()> {
        if !self.model.is_leader().await? {
            debug!("Not the leader, leaving the database request to it");
            return Ok(());
        }
        let request = RelationData::from([("database".to_string(), DATABASE_NAME.to_string())]);
        self.model
            .relation_set(relation, Scope::App, &request)
            .await?;
        info!(relation = %relation, database = DATABASE_NAME, "Requested database");
        Ok(())
    }

    /// Diff the provider bag against the stored snapshot and store the new one.
    pub async fn observe_change(&self, relation: &RelationId) -> crate::error::Result<DatabaseChange> {
        let Some(app) = self.model.remote_app(relation).await? else {
            return Ok(DatabaseChange::Other);
        };
        let current = self
            .model
            .relation_get(relation, &DataBag::RemoteApp(app))
            .await?;

        let own = self
            .model
            .relation_get(relation, &DataBag::LocalUnit)
            .await?;
        let previous: RelationData = match own.get(SNAPSHOT_KEY) {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable database snapshot");
                RelationData::new()
            }),
            None => RelationData::new(),
        };

        let change = classify_change(&previous, &current);

        let snapshot = RelationData::from([(
            SNAPSHOT_KEY.to_string(),
            serde_json::to_string(&current)?,
        )]);
        self.model
            .relation_set(relation, Scope::Unit, &snapshot)
            .await?;

        debug!(relation = %relation, change = ?change, "Observed database relation change");
        Ok(change)
    }
}
