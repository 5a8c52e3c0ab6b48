// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data published to the monitoring and ingress integrations.
//!
//! Only the leader writes application bags, so both publishers return early
//! on other units.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::CharmConfig;
use crate::error::Result;
use crate::model::{Model, RelationData, Scope};
use crate::service::ServiceKind;

/// Endpoint of the Prometheus scrape integration.
pub const METRICS_RELATION: &str = "metrics-endpoint";

/// Endpoint of the nginx ingress integration.
pub const INGRESS_RELATION: &str = "nginx-route";

/// Where this unit lives, attached to scrape jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    /// Model name.
    pub model: String,
    /// Model UUID.
    pub model_uuid: String,
    /// Application name.
    pub application: String,
    /// Unit name.
    pub unit: String,
}

impl Topology {
    /// Topology of the unit behind `model`.
    pub fn of(model: &dyn Model, model_name: &str, model_uuid: &str) -> Self {
        Self {
            model: model_name.to_string(),
            model_uuid: model_uuid.to_string(),
            application: model.app_name().to_string(),
            unit: model.unit_name().to_string(),
        }
    }
}

/// Bag contents for a `metrics-endpoint` relation.
pub fn scrape_data(topology: &Topology) -> Result<RelationData> {
    let targets: Vec<String> = ServiceKind::ALL
        .iter()
        .map(|kind| format!("*:{}", kind.metrics_port()))
        .collect();
    let jobs = json!([{
        "metric_path": "/metrics",
        "static_configs": [{ "targets": targets }],
    }]);
    Ok(RelationData::from([
        ("scrape_jobs".to_string(), serde_json::to_string(&jobs)?),
        (
            "scrape_metadata".to_string(),
            serde_json::to_string(topology)?,
        ),
    ]))
}

/// Bag contents for an `nginx-route` relation.
pub fn ingress_data(config: &CharmConfig, topology: &Topology) -> RelationData {
    let hostname = if config.external_hostname.is_empty() {
        topology.application.clone()
    } else {
        config.external_hostname.clone()
    };
    RelationData::from([
        ("service-hostname".to_string(), hostname),
        ("service-name".to_string(), topology.application.clone()),
        ("service-model".to_string(), topology.model.clone()),
        ("service-port".to_string(), config.web_port.to_string()),
        ("max-body-size".to_string(), config.max_body_size.clone()),
    ])
}

/// Publish to every monitoring and ingress relation.
///
/// Returns the number of relations written; zero on non-leaders.
pub async fn publish(model: &dyn Model, config: &CharmConfig, topology: &Topology) -> Result<usize> {
    if !model.is_leader().await? {
        debug!("Not the leader, skipping integration data");
        return Ok(0);
    }

    let mut written = 0;
    let scrape = scrape_data(topology)?;
    for relation in model.relation_ids(METRICS_RELATION).await? {
        model.relation_set(&relation, Scope::App, &scrape).await?;
        info!(relation = %relation, "Published scrape jobs");
        written += 1;
    }

    let ingress = ingress_data(config, topology);
    for relation in model.relation_ids(INGRESS_RELATION).await? {
        model.relation_set(&relation, Scope::App, &ingress).await?;
        info!(relation = %relation, port = config.web_port, "Published ingress route");
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::CharmMetadata;
    use crate::model::MockModel;

    fn topology() -> Topology {
        Topology {
            model: "insights".to_string(),
            model_uuid: "0f0e".to_string(),
            application: "ubuntu-insights".to_string(),
            unit: "ubuntu-insights/0".to_string(),
        }
    }

    #[test]
    fn test_scrape_jobs_target_both_exporters() {
        let data = scrape_data(&topology()).unwrap();
        let jobs: serde_json::Value = serde_json::from_str(&data["scrape_jobs"]).unwrap();
        assert_eq!(jobs[0]["metric_path"], "/metrics");
        assert_eq!(
            jobs[0]["static_configs"][0]["targets"],
            json!(["*:2112", "*:2113"])
        );
        let meta: serde_json::Value = serde_json::from_str(&data["scrape_metadata"]).unwrap();
        assert_eq!(meta["unit"], "ubuntu-insights/0");
        assert_eq!(meta["model_uuid"], "0f0e");
    }

    #[test]
    fn test_ingress_hostname_fallback() {
        let mut config = CharmConfig::default();
        let data = ingress_data(&config, &topology());
        assert_eq!(data["service-hostname"], "ubuntu-insights");
        assert_eq!(data["service-port"], "8080");
        assert_eq!(data["max-body-size"], "10m");

        config.external_hostname = "insights.example.com".to_string();
        let data = ingress_data(&config, &topology());
        assert_eq!(data["service-hostname"], "insights.example.com");
    }

    #[tokio::test]
    async fn test_publish_is_leader_only() {
        let model = MockModel::new("ubuntu-insights/0", CharmMetadata::default());
        let metrics = model.add_relation(METRICS_RELATION, "prometheus").await;
        let ingress = model.add_relation(INGRESS_RELATION, "nginx").await;
        let config = CharmConfig::default();

        assert_eq!(publish(&model, &config, &topology()).await.unwrap(), 0);
        assert!(model.bag(&metrics, "ubuntu-insights").await.is_empty());

        model.set_leader(true).await;
        assert_eq!(publish(&model, &config, &topology()).await.unwrap(), 2);
        assert!(model.bag(&metrics, "ubuntu-insights").await.contains_key("scrape_jobs"));
        assert_eq!(
            model.bag(&ingress, "ubuntu-insights").await["service-name"],
            "ubuntu-insights"
        );
    }
}
