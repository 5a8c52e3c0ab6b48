// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload version reporting.
//!
//! After a replan the web service's `/version` endpoint is read and the
//! answer recorded as the application's workload version.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Model;
use crate::service::ServiceKind;
use crate::supervisor::Supervisor;

/// Default upper bound for the version request.
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from reading the workload version.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// The request failed or returned an unexpected body.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("Unexpected status {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// Source of the workload version.
#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Version reported by the web service listening on `port`.
    async fn version(&self, port: u16) -> Result<String, ProbeError>;
}

/// Reads `GET http://<host>:<port>/version`.
pub struct HttpVersionProbe {
    host: String,
    timeout: Duration,
}

impl Default for HttpVersionProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpVersionProbe {
    /// Probe localhost with the default timeout.
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
            timeout: VERSION_TIMEOUT,
        }
    }

    /// Probe another host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl VersionProbe for HttpVersionProbe {
    async fn version(&self, port: u16) -> Result<String, ProbeError> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let url = format!("http://{}:{}/version", self.host, port);
        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        let body: VersionResponse = response.json().await?;
        Ok(body.version)
    }
}

/// Fixed answer, for tests.
pub struct StaticProbe(pub Option<String>);

#[async_trait]
impl VersionProbe for StaticProbe {
    async fn version(&self, _port: u16) -> Result<String, ProbeError> {
        self.0.clone().ok_or(ProbeError::Status(503))
    }
}

/// Record the workload version if the web service is in the plan.
///
/// Every failure is logged and leaves the version unset.
pub async fn record_version(
    model: &dyn Model,
    supervisor: &dyn Supervisor,
    probe: &dyn VersionProbe,
    web_port: u16,
) {
    match supervisor.services(&[ServiceKind::Web.name()]).await {
        Ok(services) if services.is_empty() => {
            debug!("Web service not in plan, skipping version probe");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "Unable to get version from web service API");
            return;
        }
    }

    let version = match probe.version(web_port).await {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "Unable to get version from web service API");
            return;
        }
    };

    match model.set_workload_version(&version).await {
        Ok(()) => info!(version = %version, "Recorded workload version"),
        Err(e) => warn!(error = %e, "Failed to record workload version"),
    }
}
