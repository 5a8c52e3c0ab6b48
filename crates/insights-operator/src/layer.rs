// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pebble layer model and the planner that derives the operator's layer.
//!
//! The planner is a pure function of its inputs: options, database
//! connection, reports cache location and whether the ingest allow-list was
//! written. Submitting the result is the reconciler's job.
//!
//! # Enablement
//!
//! | Service | Enabled when |
//! |---------|--------------|
//! | web | reports cache mounted |
//! | ingest | reports cache mounted, database ready, ingest allow-list written |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::CharmConfig;
use crate::database::ConnectionDescriptor;
use crate::service::{APP_NAME, ServiceKind};

/// Name of the readiness check probing the web service.
pub const READY_CHECK: &str = "web-service-ready";

/// A Pebble configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// One-line summary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Services keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceSpec>,
    /// Health checks keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckSpec>,
}

/// How an entry combines with the same entry in lower layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    /// Fields set here win, others are kept.
    Merge,
    /// The entry is taken as-is.
    Replace,
}

/// Whether Pebble starts a service on replan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    /// Started by replan.
    Enabled,
    /// Left alone (and stopped if its definition changed).
    Disabled,
}

/// A supervised service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Combination rule.
    #[serde(rename = "override")]
    pub override_: Override,
    /// Short summary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    /// Command line.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Startup mode.
    pub startup: Startup,
    /// Extra environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// Severity of a failing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    /// Liveness.
    Alive,
    /// Readiness.
    Ready,
}

/// A health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Combination rule.
    #[serde(rename = "override")]
    pub override_: Override,
    /// Level.
    pub level: CheckLevel,
    /// HTTP probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCheck>,
}

/// HTTP probe target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheck {
    /// URL that must answer with a 2xx.
    pub url: String,
}

impl Layer {
    /// Combine `other` on top of this layer.
    pub fn combine(&mut self, other: &Layer) {
        if !other.summary.is_empty() {
            self.summary = other.summary.clone();
        }
        if !other.description.is_empty() {
            self.description = other.description.clone();
        }
        for (name, service) in &other.services {
            match (self.services.get_mut(name), service.override_) {
                (Some(existing), Override::Merge) => existing.merge(service),
                _ => {
                    self.services.insert(name.clone(), service.clone());
                }
            }
        }
        for (name, check) in &other.checks {
            self.checks.insert(name.clone(), check.clone());
        }
    }
}

impl ServiceSpec {
    fn merge(&mut self, other: &ServiceSpec) {
        if !other.summary.is_empty() {
            self.summary = other.summary.clone();
        }
        if !other.command.is_empty() {
            self.command = other.command.clone();
        }
        self.startup = other.startup;
        self.environment.extend(
            other
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}

/// Everything the planner looks at.
#[derive(Debug, Clone, Copy)]
pub struct PlanInputs<'a> {
    /// Operator options.
    pub config: &'a CharmConfig,
    /// Database connection (possibly empty).
    pub database: &'a ConnectionDescriptor,
    /// Reports cache location; empty when unmounted.
    pub storage_path: &'a str,
    /// The ingest allow-list was written during this pass.
    pub ingest_config_rendered: bool,
}

/// Command line for a service.
pub fn command(kind: ServiceKind, inputs: &PlanInputs<'_>) -> String {
    let mut parts = vec![kind.binary().to_string()];
    if kind == ServiceKind::Web {
        parts.push(format!("--listen-port={}", inputs.config.web_port));
    }
    parts.push(format!("--daemon-config={}", kind.dynamic_config_path()));
    parts.push(format!("--reports-dir={}", inputs.storage_path));
    parts.push(format!("--metrics-port={}", kind.metrics_port()));
    // Debug is the only verbosity level exposed; `-v` is never emitted.
    if inputs.config.debug {
        parts.push("-vv".to_string());
    }
    if inputs.config.json_logs {
        parts.push("--json-logs".to_string());
    }
    parts.join(" ")
}

/// Whether a service should be started.
pub fn is_enabled(kind: ServiceKind, inputs: &PlanInputs<'_>) -> bool {
    let mounted = !inputs.storage_path.is_empty();
    match kind {
        ServiceKind::Web => mounted,
        ServiceKind::Ingest => {
            mounted && inputs.database.is_ready() && inputs.ingest_config_rendered
        }
    }
}

/// Build the full layer.
pub fn plan(inputs: &PlanInputs<'_>) -> Layer {
    let mut services = BTreeMap::new();
    for kind in ServiceKind::ALL {
        let environment = match kind {
            ServiceKind::Web => BTreeMap::new(),
            ServiceKind::Ingest => inputs.database.environment(),
        };
        services.insert(
            kind.name().to_string(),
            ServiceSpec {
                override_: Override::Replace,
                summary: kind.summary().to_string(),
                command: command(kind, inputs),
                startup: if is_enabled(kind, inputs) {
                    Startup::Enabled
                } else {
                    Startup::Disabled
                },
                environment,
            },
        );
    }

    let mut checks = BTreeMap::new();
    checks.insert(
        READY_CHECK.to_string(),
        CheckSpec {
            override_: Override::Replace,
            level: CheckLevel::Ready,
            http: Some(HttpCheck {
                url: format!("http://localhost:{}/version", inputs.config.web_port),
            }),
        },
    );

    Layer {
        summary: format!("{} layer", APP_NAME),
        description: "pebble config layer for Ubuntu Insights server services".to_string(),
        services,
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNT: &str = "/var/lib/ubuntu-insights/";

    fn ready_db() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "example.com".to_string(),
            port: "5432".to_string(),
            user: "foo".to_string(),
            password: "bar".to_string(),
            db_name: "insights".to_string(),
        }
    }

    #[test]
    fn test_web_command_without_database() {
        let config = CharmConfig::default();
        let db = ConnectionDescriptor::default();
        let inputs = PlanInputs {
            config: &config,
            database: &db,
            storage_path: MOUNT,
            ingest_config_rendered: true,
        };
        let layer = plan(&inputs);

        let web = &layer.services["web-service"];
        assert_eq!(
            web.command,
            "/bin/ubuntu-insights-web-service --listen-port=8080 \
             --daemon-config=/etc/ubuntu-insights-service/web-live-config.json \
             --reports-dir=/var/lib/ubuntu-insights/ --metrics-port=2112"
        );
        assert_eq!(web.startup, Startup::Enabled);
        assert!(web.environment.is_empty());

        let ingest = &layer.services["ingest-service"];
        assert_eq!(ingest.startup, Startup::Disabled);
        assert!(ingest.environment.is_empty());
        assert!(!ingest.command.contains("--listen-port"));
    }

    #[test]
    fn test_enablement_matrix() {
        let config = CharmConfig::default();
        let ready = ready_db();
        let empty = ConnectionDescriptor::default();

        for (storage, db, rendered, web, ingest) in [
            (MOUNT, &ready, true, true, true),
            (MOUNT, &ready, false, true, false),
            (MOUNT, &empty, true, true, false),
            ("", &ready, true, false, false),
            ("", &empty, true, false, false),
        ] {
            let inputs = PlanInputs {
                config: &config,
                database: db,
                storage_path: storage,
                ingest_config_rendered: rendered,
            };
            assert_eq!(is_enabled(ServiceKind::Web, &inputs), web);
            assert_eq!(is_enabled(ServiceKind::Ingest, &inputs), ingest);
        }
    }

    #[test]
    fn test_debug_and_json_flags() {
        let config = CharmConfig {
            web_port: 8081,
            debug: true,
            json_logs: true,
            ..CharmConfig::default()
        };
        let db = ConnectionDescriptor::default();
        let inputs = PlanInputs {
            config: &config,
            database: &db,
            storage_path: MOUNT,
            ingest_config_rendered: true,
        };
        let web = command(ServiceKind::Web, &inputs);
        assert!(web.contains("--listen-port=8081"));
        assert!(web.ends_with("-vv --json-logs"));
        let layer = plan(&inputs);
        assert_eq!(
            layer.checks[READY_CHECK].http.as_ref().unwrap().url,
            "http://localhost:8081/version"
        );
    }

    #[test]
    fn test_verbosity_flag_follows_debug() {
        let db = ConnectionDescriptor::default();
        for (debug, expected) in [(false, None), (true, Some("-vv"))] {
            let config = CharmConfig {
                debug,
                ..CharmConfig::default()
            };
            let inputs = PlanInputs {
                config: &config,
                database: &db,
                storage_path: MOUNT,
                ingest_config_rendered: true,
            };
            for kind in [ServiceKind::Web, ServiceKind::Ingest] {
                let command = command(kind, &inputs);
                let flags: Vec<&str> = command
                    .split(' ')
                    .filter(|part| part.starts_with("-v"))
                    .collect();
                assert_eq!(flags, expected.into_iter().collect::<Vec<_>>(), "{}", command);
            }
        }
    }

    #[test]
    fn test_ingest_environment_from_database() {
        let config = CharmConfig::default();
        let db = ready_db();
        let inputs = PlanInputs {
            config: &config,
            database: &db,
            storage_path: MOUNT,
            ingest_config_rendered: true,
        };
        let layer = plan(&inputs);
        let env = &layer.services["ingest-service"].environment;
        assert_eq!(env["UBUNTU_INSIGHTS_INGEST_SERVICE_DBCONFIG_HOST"], "example.com");
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn test_layer_yaml_shape() {
        let config = CharmConfig::default();
        let db = ConnectionDescriptor::default();
        let inputs = PlanInputs {
            config: &config,
            database: &db,
            storage_path: MOUNT,
            ingest_config_rendered: true,
        };
        let yaml = serde_yaml::to_string(&plan(&inputs)).unwrap();
        assert!(yaml.contains("override: replace"));
        assert!(yaml.contains("startup: disabled"));
        assert!(yaml.contains("level: ready"));
        let back: Layer = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, plan(&inputs));
    }

    #[test]
    fn test_combine_merge_keeps_unset_fields() {
        let mut base = Layer::default();
        base.services.insert(
            "svc".to_string(),
            ServiceSpec {
                override_: Override::Replace,
                summary: "base".to_string(),
                command: "/bin/true".to_string(),
                startup: Startup::Disabled,
                environment: BTreeMap::from([("A".to_string(), "1".to_string())]),
            },
        );
        let mut top = Layer::default();
        top.services.insert(
            "svc".to_string(),
            ServiceSpec {
                override_: Override::Merge,
                summary: String::new(),
                command: String::new(),
                startup: Startup::Enabled,
                environment: BTreeMap::from([("B".to_string(), "2".to_string())]),
            },
        );
        base.combine(&top);
        let svc = &base.services["svc"];
        assert_eq!(svc.command, "/bin/true");
        assert_eq!(svc.startup, Startup::Enabled);
        assert_eq!(svc.environment.len(), 2);
    }
}
