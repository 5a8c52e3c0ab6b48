// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for insights-operator.
//!
//! Two layers live here:
//! - [`Config`]: the process environment the model agent hands to every hook.
//! - [`CharmConfig`]: the operator options, as returned by `config-get`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::service::CONTAINER_NAME;

/// Hook process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of this unit, e.g. `ubuntu-insights/0`
    pub unit_name: String,
    /// Name of the model the unit is deployed in
    pub model_name: String,
    /// UUID of the model the unit is deployed in
    pub model_uuid: String,
    /// Directory holding the unpacked charm (metadata.yaml lives here)
    pub charm_dir: PathBuf,
    /// Pebble socket of the workload container
    pub pebble_socket: PathBuf,
    /// Directory holding the hook tools; `None` resolves them through `PATH`
    pub hook_tools_dir: Option<PathBuf>,
    /// Upper bound for a single Pebble API request
    pub pebble_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let unit_name = std::env::var("JUJU_UNIT_NAME")
            .map_err(|_| ConfigError::MissingEnvVar("JUJU_UNIT_NAME"))?;
        if !unit_name.contains('/') {
            return Err(ConfigError::InvalidValue {
                key: "JUJU_UNIT_NAME",
                reason: format!("'{}' is not of the form <app>/<number>", unit_name),
            });
        }

        let model_name = std::env::var("JUJU_MODEL_NAME").unwrap_or_default();
        let model_uuid = std::env::var("JUJU_MODEL_UUID").unwrap_or_default();

        let charm_dir =
            PathBuf::from(std::env::var("JUJU_CHARM_DIR").unwrap_or_else(|_| ".".to_string()));

        let pebble_socket = std::env::var("INSIGHTS_PEBBLE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_pebble_socket());

        let hook_tools_dir = std::env::var("INSIGHTS_HOOK_TOOLS_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let pebble_timeout_secs: u64 = std::env::var("INSIGHTS_PEBBLE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "INSIGHTS_PEBBLE_TIMEOUT_SECS",
                reason: "expected a whole number of seconds".to_string(),
            })?;

        Ok(Self {
            unit_name,
            model_name,
            model_uuid,
            charm_dir,
            pebble_socket,
            hook_tools_dir,
            pebble_timeout: Duration::from_secs(pebble_timeout_secs),
        })
    }
}

fn default_pebble_socket() -> PathBuf {
    PathBuf::from(format!("/charm/containers/{}/pebble.socket", CONTAINER_NAME))
}

/// Operator options set with `juju config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CharmConfig {
    /// Port the web service listens on (also the opened port)
    pub web_port: u16,
    /// Comma-separated applications accepted by the web service
    pub web_apps: String,
    /// Comma-separated applications accepted by the ingest service
    pub ingest_apps: String,
    /// Also accept legacy ubuntu-report identifiers on the web service
    pub web_legacy: bool,
    /// Also accept legacy ubuntu-report identifiers on the ingest service
    pub ingest_legacy: bool,
    /// Run database migrations when the database becomes available
    pub migrate: bool,
    /// Debug workload logging: services get `-vv` when set and no
    /// verbosity flag otherwise
    pub debug: bool,
    /// JSON formatted workload logs
    pub json_logs: bool,
    /// Hostname published to the ingress; the application name when empty
    pub external_hostname: String,
    /// Maximum request body accepted by the ingress
    pub max_body_size: String,
}

impl Default for CharmConfig {
    fn default() -> Self {
        Self {
            web_port: 8080,
            web_apps: "linux,windows,darwin".to_string(),
            ingest_apps: "linux,windows,darwin".to_string(),
            web_legacy: true,
            ingest_legacy: true,
            migrate: true,
            debug: false,
            json_logs: false,
            external_hostname: String::new(),
            max_body_size: "10m".to_string(),
        }
    }
}

impl CharmConfig {
    /// Build from the raw `config-get --format=json --all` document.
    ///
    /// Keys the operator does not know about are ignored, missing keys take defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: CharmConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
                key: "config",
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web_port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "web-port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if self.max_body_size.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "max-body-size",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A value is present but unusable.
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// Offending key.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = CharmConfig::from_value(json!({"web-port": 8081})).unwrap();
        assert_eq!(config.web_port, 8081);
        assert_eq!(config.web_apps, "linux,windows,darwin");
        assert!(config.migrate);
        assert!(!config.debug);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = CharmConfig::from_value(json!({"some-future-option": "x"})).unwrap();
        assert_eq!(config, CharmConfig::default());
    }

    #[test]
    fn test_zero_port_rejected() {
        let err = CharmConfig::from_value(json!({"web-port": 0})).unwrap_err();
        assert!(err.to_string().contains("web-port"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = CharmConfig::from_value(json!({"debug": "yes please"})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "config", .. }));
    }
}
