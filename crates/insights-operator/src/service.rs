// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload services and the fixed locations they use.

use std::fmt;

/// Application name used in layer summaries and integrations.
pub const APP_NAME: &str = "ubuntu-insights";

/// Workload container declared in the charm metadata.
pub const CONTAINER_NAME: &str = "ubuntu-insights-server";

/// Storage holding reports that have not been ingested yet.
pub const REPORTS_CACHE_STORAGE: &str = "reports-cache";

/// The two services supervised inside the workload container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    /// Public HTTP endpoint receiving reports.
    Web,
    /// Background process moving cached reports into PostgreSQL.
    Ingest,
}

impl ServiceKind {
    /// Both services, in plan order.
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Web, ServiceKind::Ingest];

    /// Service name inside the Pebble plan.
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Web => "web-service",
            ServiceKind::Ingest => "ingest-service",
        }
    }

    /// Short summary for the layer.
    pub fn summary(self) -> &'static str {
        match self {
            ServiceKind::Web => "web service",
            ServiceKind::Ingest => "ingest service",
        }
    }

    /// Workload binary.
    pub fn binary(self) -> &'static str {
        match self {
            ServiceKind::Web => "/bin/ubuntu-insights-web-service",
            ServiceKind::Ingest => "/bin/ubuntu-insights-ingest-service",
        }
    }

    /// Allow-list document read by the service at runtime.
    pub fn dynamic_config_path(self) -> &'static str {
        match self {
            ServiceKind::Web => "/etc/ubuntu-insights-service/web-live-config.json",
            ServiceKind::Ingest => "/etc/ubuntu-insights-service/ingest-live-config.json",
        }
    }

    /// Port the Prometheus exporter of the service binds.
    pub fn metrics_port(self) -> u16 {
        match self {
            ServiceKind::Web => 2112,
            ServiceKind::Ingest => 2113,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
