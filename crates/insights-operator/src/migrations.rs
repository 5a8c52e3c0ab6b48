// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for the ingest database.
//!
//! The schema is owned by the ingest binary: migrating means running its
//! `migrate` subcommand inside the workload container with the database
//! environment. Completion is tracked with a marker file in the workload so
//! later hooks skip the run; a new database or endpoint clears the marker.
//!
//! # Example
//!
//! ```ignore
//! use insights_operator::migrations::MigrationRunner;
//!
//! let runner = MigrationRunner::new(supervisor.as_ref()).reporting_to(model.as_ref());
//! if !runner.is_done().await {
//!     runner.run(&descriptor).await;
//! }
//! ```

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::database::ConnectionDescriptor;
use crate::model::Model;
use crate::service::ServiceKind;
use crate::status::UnitStatus;
use crate::supervisor::{ExecRequest, Supervisor, SupervisorError};

/// Migration files shipped in the workload image.
pub const MIGRATIONS_PATH: &str = "/usr/share/insights/migrations";

/// Present once migrations completed against the current database.
pub const MIGRATIONS_DONE_MARKER: &str = "/run/ubuntu-insights-k8s-operator/migrations_done";

/// Maintenance message shown while the migrate command runs.
pub const MIGRATING_MESSAGE: &str = "Running database migrations";

/// Upper bound for a migration run.
pub const MIGRATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of [`MigrationRunner::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Database not ready or Pebble unreachable; nothing was executed.
    NotReady,
    /// The migrate command succeeded and the marker was written.
    Completed,
    /// The migrate command failed.
    Failed,
}

/// Runs and tracks migrations through the supervisor.
pub struct MigrationRunner<'a> {
    supervisor: &'a dyn Supervisor,
    model: Option<&'a dyn Model>,
}

impl<'a> MigrationRunner<'a> {
    /// Create a runner.
    pub fn new(supervisor: &'a dyn Supervisor) -> Self {
        Self {
            supervisor,
            model: None,
        }
    }

    /// Show a maintenance status on `model` while migrations run.
    pub fn reporting_to(mut self, model: &'a dyn Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Whether the marker is present. An unreachable workload counts as not done.
    pub async fn is_done(&self) -> bool {
        if !self.supervisor.can_connect().await {
            return false;
        }
        match self.supervisor.exists(MIGRATIONS_DONE_MARKER).await {
            Ok(exists) => exists,
            Err(e) => {
                debug!(error = %e, "Could not check migrations marker");
                false
            }
        }
    }

    /// Write or clear the marker.
    pub async fn mark(&self, done: bool) {
        if !self.supervisor.can_connect().await {
            return;
        }
        let result = if done {
            self.supervisor
                .push(MIGRATIONS_DONE_MARKER, b"", true)
                .await
        } else {
            self.supervisor
                .remove_path(MIGRATIONS_DONE_MARKER, true)
                .await
        };
        match result {
            Ok(()) if done => info!("Marked migrations as done"),
            Ok(()) => info!("Removed migrations done marker"),
            Err(e) => error!(error = %e, "Failed to mark migrations"),
        }
    }

    /// Run the migrate command against `database`.
    ///
    /// Does nothing unless the database is ready and Pebble answers. A failed
    /// run is logged line by line and leaves the marker untouched.
    pub async fn run(&self, database: &ConnectionDescriptor) -> MigrationOutcome {
        if !database.is_ready() || !self.supervisor.can_connect().await {
            info!("Not ready to execute migrations");
            return MigrationOutcome::NotReady;
        }

        let request = ExecRequest {
            command: vec![
                ServiceKind::Ingest.binary().to_string(),
                "migrate".to_string(),
                MIGRATIONS_PATH.to_string(),
            ],
            environment: database.environment(),
            timeout: MIGRATION_TIMEOUT,
        };

        info!(path = MIGRATIONS_PATH, "Running database migrations");
        if let Some(model) = self.model {
            let status = UnitStatus::Maintenance(MIGRATING_MESSAGE.to_string());
            if let Err(e) = model.set_status(&status).await {
                warn!(error = %e, "Failed to set migration status");
            }
        }
        match self.supervisor.exec(&request).await {
            Ok(output) => {
                if !output.stdout.trim().is_empty() {
                    info!(output = %output.stdout.trim(), "Migrations finished");
                }
                self.mark(true).await;
                MigrationOutcome::Completed
            }
            Err(SupervisorError::ExitCode {
                exit_code, stderr, ..
            }) => {
                error!(exit_code, "Failed to run database migrations");
                for line in stderr.lines() {
                    error!("    {}", line);
                }
                MigrationOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, "Failed to run database migrations");
                MigrationOutcome::Failed
            }
        }
    }
}
