// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Unit status aggregation.
//!
//! Every hook ends by evaluating the current state into an ordered list of
//! status signals. All applicable signals are kept (and logged); the one shown
//! to the user is the most severe, ties going to the first one recorded.
//!
//! ```text
//! blocked  >  waiting  >  maintenance  >  active
//! ```

use std::fmt;

/// Status shown for the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Everything is in place.
    Active,
    /// Progress is happening without operator involvement.
    Maintenance(String),
    /// Waiting on another application.
    Waiting(String),
    /// Needs a human (a missing relation, storage, or bad config).
    Blocked(String),
}

impl UnitStatus {
    /// Name understood by `status-set`.
    pub fn name(&self) -> &'static str {
        match self {
            UnitStatus::Active => "active",
            UnitStatus::Maintenance(_) => "maintenance",
            UnitStatus::Waiting(_) => "waiting",
            UnitStatus::Blocked(_) => "blocked",
        }
    }

    /// Human readable reason; empty for active.
    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active => "",
            UnitStatus::Maintenance(m) | UnitStatus::Waiting(m) | UnitStatus::Blocked(m) => m,
        }
    }

    fn severity(&self) -> u8 {
        match self {
            UnitStatus::Active => 0,
            UnitStatus::Maintenance(_) => 1,
            UnitStatus::Waiting(_) => 2,
            UnitStatus::Blocked(_) => 3,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message().is_empty() {
            f.write_str(self.name())
        } else {
            write!(f, "{}: {}", self.name(), self.message())
        }
    }
}

/// Ordered collection of applicable status signals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSet {
    statuses: Vec<UnitStatus>,
}

impl StatusSet {
    /// Record a signal.
    pub fn add(&mut self, status: UnitStatus) {
        self.statuses.push(status);
    }

    /// All recorded signals in evaluation order.
    pub fn all(&self) -> &[UnitStatus] {
        &self.statuses
    }

    /// Most severe signal; the first recorded wins among equals.
    pub fn winner(&self) -> UnitStatus {
        let mut best: Option<&UnitStatus> = None;
        for status in &self.statuses {
            match best {
                Some(b) if b.severity() >= status.severity() => {}
                _ => best = Some(status),
            }
        }
        best.cloned().unwrap_or(UnitStatus::Active)
    }
}

/// Where the reports cache mount stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    /// The workload container is not declared in the metadata.
    NoContainer,
    /// The container exists but the mount is absent or has no location.
    Missing,
    /// Mounted at the given location.
    Present(String),
}

/// What the supervisor reported about the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStates {
    /// Pebble could not be queried.
    Unreachable,
    /// Pebble answered.
    Known {
        /// Web service is running.
        web_running: bool,
        /// Ingest service is running.
        ingest_running: bool,
    },
}

/// Snapshot of everything status evaluation looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInputs {
    /// Why the operator options were rejected, if they were.
    pub config_error: Option<String>,
    /// A database relation exists.
    pub relation_present: bool,
    /// The database relation carries a usable connection.
    pub relation_ready: bool,
    /// Reports cache mount.
    pub mount: MountState,
    /// Run state of both services.
    pub services: ServiceStates,
    /// `migrate` option.
    pub migrate_enabled: bool,
    /// The migration marker exists in the workload.
    pub migrations_done: bool,
}

/// Evaluate the inputs into the ordered signal list.
pub fn evaluate(inputs: &StatusInputs) -> StatusSet {
    let mut set = StatusSet::default();

    if let Some(reason) = &inputs.config_error {
        set.add(UnitStatus::Blocked(format!("Invalid configuration: {}", reason)));
    }

    if !inputs.relation_present {
        set.add(UnitStatus::Blocked("Waiting for database relation".to_string()));
    } else if !inputs.relation_ready {
        set.add(UnitStatus::Waiting("Waiting for database relation".to_string()));
    }

    match &inputs.mount {
        MountState::NoContainer => {
            set.add(UnitStatus::Blocked("Container metadata not found".to_string()))
        }
        MountState::Missing => set.add(UnitStatus::Blocked(
            "Waiting for reports cache storage mount".to_string(),
        )),
        MountState::Present(_) => {}
    }

    match inputs.services {
        ServiceStates::Unreachable => set.add(UnitStatus::Maintenance(
            "Waiting for Pebble in workload container".to_string(),
        )),
        ServiceStates::Known {
            web_running,
            ingest_running,
        } => {
            if !web_running {
                set.add(UnitStatus::Maintenance(
                    "Waiting for the web service to start up".to_string(),
                ));
            }
            if !ingest_running {
                set.add(UnitStatus::Maintenance(
                    "Waiting for the ingest service to start up".to_string(),
                ));
            }
        }
    }

    if inputs.migrate_enabled && !inputs.migrations_done {
        set.add(UnitStatus::Maintenance(
            "Waiting for database migrations to complete".to_string(),
        ));
    }

    set.add(UnitStatus::Active);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> StatusInputs {
        StatusInputs {
            config_error: None,
            relation_present: true,
            relation_ready: true,
            mount: MountState::Present("/var/lib/ubuntu-insights/".to_string()),
            services: ServiceStates::Known {
                web_running: true,
                ingest_running: true,
            },
            migrate_enabled: true,
            migrations_done: true,
        }
    }

    #[test]
    fn test_healthy_is_active() {
        let set = evaluate(&healthy());
        assert_eq!(set.all(), &[UnitStatus::Active]);
        assert_eq!(set.winner(), UnitStatus::Active);
    }

    #[test]
    fn test_missing_relation_beats_missing_storage() {
        let inputs = StatusInputs {
            relation_present: false,
            relation_ready: false,
            mount: MountState::Missing,
            ..healthy()
        };
        let set = evaluate(&inputs);
        assert_eq!(
            set.winner(),
            UnitStatus::Blocked("Waiting for database relation".to_string())
        );
        assert!(set.all().contains(&UnitStatus::Blocked(
            "Waiting for reports cache storage mount".to_string()
        )));
    }

    #[test]
    fn test_blocked_storage_beats_waiting_relation() {
        let inputs = StatusInputs {
            relation_ready: false,
            mount: MountState::Missing,
            ..healthy()
        };
        assert_eq!(
            evaluate(&inputs).winner(),
            UnitStatus::Blocked("Waiting for reports cache storage mount".to_string())
        );
    }

    #[test]
    fn test_waiting_beats_maintenance() {
        let inputs = StatusInputs {
            relation_ready: false,
            services: ServiceStates::Unreachable,
            ..healthy()
        };
        assert_eq!(
            evaluate(&inputs).winner(),
            UnitStatus::Waiting("Waiting for database relation".to_string())
        );
    }

    #[test]
    fn test_service_order_web_first() {
        let inputs = StatusInputs {
            services: ServiceStates::Known {
                web_running: false,
                ingest_running: false,
            },
            ..healthy()
        };
        let set = evaluate(&inputs);
        assert_eq!(
            set.winner(),
            UnitStatus::Maintenance("Waiting for the web service to start up".to_string())
        );
        assert_eq!(set.all().len(), 3);
    }

    #[test]
    fn test_pending_migrations_only_when_enabled() {
        let pending = StatusInputs {
            migrations_done: false,
            ..healthy()
        };
        assert_eq!(
            evaluate(&pending).winner(),
            UnitStatus::Maintenance("Waiting for database migrations to complete".to_string())
        );

        let disabled = StatusInputs {
            migrate_enabled: false,
            ..pending
        };
        assert_eq!(evaluate(&disabled).winner(), UnitStatus::Active);
    }

    #[test]
    fn test_config_error_first() {
        let inputs = StatusInputs {
            config_error: Some("web-port: must be between 1 and 65535".to_string()),
            relation_present: false,
            ..healthy()
        };
        assert_eq!(
            evaluate(&inputs).winner().message(),
            "Invalid configuration: web-port: must be between 1 and 65535"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitStatus::Active.to_string(), "active");
        assert_eq!(
            UnitStatus::Waiting("x".to_string()).to_string(),
            "waiting: x"
        );
    }
}
