// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Insights Operator - lifecycle management for Ubuntu Insights
//!
//! This crate is the operator for the Ubuntu Insights server. It runs once
//! per lifecycle hook, computes the desired state of the workload container
//! and pushes it to Pebble, the container's process supervisor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Model agent                               │
//! │          (hooks, relation data, config, status-set)              │
//! └──────────────────────────────────────────────────────────────────┘
//!                  │ hook                      ▲ hook tools
//!                  ▼                           │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 insights-operator (This Crate)                    │
//! │  ┌──────────┐  ┌────────────┐  ┌──────────┐  ┌───────────────┐   │
//! │  │  Events  │─▶│ Reconciler │─▶│  Layer   │  │    Status     │   │
//! │  │ (route)  │  │            │  │ Planner  │  │  Aggregator   │   │
//! │  └──────────┘  └────────────┘  └──────────┘  └───────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//!                  │ unix socket               │ exec websockets
//!                  ▼                           ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 Workload container (Pebble)                       │
//! │        web-service :8080          ingest-service ──▶ PostgreSQL  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Events
//!
//! | Event | Action |
//! |-------|--------|
//! | `start`, `config-changed`, `<container>-pebble-ready` | Reconcile |
//! | `upgrade-charm` | Acquire the rolling restart lock |
//! | `database-relation-created` / `-joined` | Request the `insights` database |
//! | `database-relation-changed` | Derived database events, then reconcile |
//! | `database-relation-broken` | Stop the ingest service |
//! | `reports-cache-storage-attached` / `-detaching` | Reconcile / disable services |
//! | `restart-relation-changed` / `-departed`, `leader-elected` | Advance the restart lock |
//! | `metrics-endpoint` / `nginx-route` joined or changed | Publish integration data |
//!
//! Every hook ends with status evaluation.
//!
//! # Configuration
//!
//! The hook process is configured from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `JUJU_UNIT_NAME` | Yes | - | Unit name, `<app>/<n>` |
//! | `JUJU_CHARM_DIR` | No | `.` | Directory holding `metadata.yaml` |
//! | `INSIGHTS_PEBBLE_SOCKET` | No | `/charm/containers/ubuntu-insights-server/pebble.socket` | Pebble socket |
//! | `INSIGHTS_HOOK_TOOLS_DIR` | No | `PATH` lookup | Hook tools directory |
//! | `INSIGHTS_PEBBLE_TIMEOUT_SECS` | No | `30` | Pebble request timeout |
//!
//! # Modules
//!
//! - [`config`]: Hook process configuration and operator options
//! - [`model`]: Access to the model agent through hook tools
//! - [`supervisor`]: Pebble client
//! - [`reconciler`]: Dispatch table and reconcile routine

#![warn(missing_docs)]

/// Hook process configuration and operator options.
pub mod config;

/// Error types for the operator.
pub mod error;

/// Charm metadata (containers and storage mounts).
pub mod metadata;

/// Workload service identities and fixed paths.
pub mod service;

/// Unit status evaluation.
pub mod status;

/// Access to the model agent.
pub mod model;

/// Workload container supervisor.
pub mod supervisor;

/// Pebble layer model and planner.
pub mod layer;

/// Database relation requirer.
pub mod database;

/// Allow-list documents.
pub mod allowlist;

/// Ingest database migrations.
pub mod migrations;

/// Monitoring and ingress relation data.
pub mod integrations;

/// Rolling restart coordination.
pub mod rolling_restart;

/// Workload version probe.
pub mod workload;

/// Lifecycle events.
pub mod events;

/// Event dispatch and reconciliation.
pub mod reconciler;

pub use error::{Error, Result};
pub use events::Event;
pub use reconciler::Reconciler;
