// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Allow-list documents read by the workload services.
//!
//! Each service accepts reports only from the applications named in its
//! `{"allowList": [...]}` document. With legacy support switched on, the
//! list is extended with one `ubuntu-report` identifier per historical
//! release.

use serde::Serialize;
use tracing::{error, info};

use crate::service::ServiceKind;
use crate::supervisor::Supervisor;

/// Releases whose legacy `ubuntu-report` uploads are still accepted.
pub const LEGACY_VERSIONS: [&str; 14] = [
    "18.04", "18.10", "20.04", "20.10", "21.04", "21.10", "22.04", "22.10", "23.04", "23.10",
    "24.04", "24.10", "25.04", "25.10",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AllowListDocument<'a> {
    allow_list: &'a [String],
}

/// Split a comma-separated option into application names.
///
/// Entries are trimmed; empty entries are dropped.
pub fn parse_apps(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|app| !app.is_empty())
        .map(str::to_string)
        .collect()
}

/// Identifier for a legacy release.
pub fn legacy_identifier(version: &str) -> String {
    format!("ubuntu-report/ubuntu/desktop/{}", version)
}

/// A copy of `apps`, followed by every legacy identifier when `legacy` is set.
pub fn with_legacy(apps: &[String], legacy: bool) -> Vec<String> {
    let mut list = apps.to_vec();
    if legacy {
        list.extend(LEGACY_VERSIONS.iter().map(|v| legacy_identifier(v)));
    }
    list
}

/// Render the document as indented JSON.
pub fn render(apps: &[String], legacy: bool) -> serde_json::Result<String> {
    let list = with_legacy(apps, legacy);
    serde_json::to_string_pretty(&AllowListDocument { allow_list: &list })
}

/// Write the document for a service into the workload.
///
/// Failures are logged and reported as `false`; whatever document was there
/// before stays in place.
pub async fn write(
    supervisor: &dyn Supervisor,
    kind: ServiceKind,
    apps: &[String],
    legacy: bool,
) -> bool {
    let path = kind.dynamic_config_path();
    let document = match render(apps, legacy) {
        Ok(document) => document,
        Err(e) => {
            error!(service = %kind, error = %e, "Failed to render allow-list");
            return false;
        }
    };

    match supervisor.push(path, document.as_bytes(), true).await {
        Ok(()) => {
            info!(service = %kind, path = %path, entries = apps.len(), legacy, "Written dynamic config");
            true
        }
        Err(e) => {
            error!(service = %kind, path = %path, error = %e, "Failed to write config file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::MockSupervisor;

    fn apps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_apps_trims_and_drops_empty() {
        assert_eq!(
            parse_apps(" linux, windows ,,darwin "),
            apps(&["linux", "windows", "darwin"])
        );
        assert!(parse_apps("").is_empty());
    }

    #[test]
    fn test_without_legacy_is_identity() {
        let input = apps(&["b", "a", "c"]);
        assert_eq!(with_legacy(&input, false), input);
    }

    #[test]
    fn test_legacy_appends_without_mutating() {
        let input = apps(&["linux"]);
        let extended = with_legacy(&input, true);
        assert_eq!(input, apps(&["linux"]));
        assert_eq!(extended.len(), 1 + LEGACY_VERSIONS.len());
        assert_eq!(extended[0], "linux");
        assert_eq!(extended[1], "ubuntu-report/ubuntu/desktop/18.04");
        assert_eq!(
            extended.last().map(String::as_str),
            Some("ubuntu-report/ubuntu/desktop/25.10")
        );
    }

    #[test]
    fn test_render_shape() {
        let rendered = render(&apps(&["linux", "darwin"]), false).unwrap();
        assert_eq!(
            rendered,
            "{\n  \"allowList\": [\n    \"linux\",\n    \"darwin\"\n  ]\n}"
        );
        let value: serde_json::Value = serde_json::from_str(&render(&[], true).unwrap()).unwrap();
        assert_eq!(value["allowList"].as_array().unwrap().len(), 14);
    }

    #[tokio::test]
    async fn test_write_reports_failure() {
        let supervisor = MockSupervisor::new();
        assert!(write(&supervisor, ServiceKind::Web, &apps(&["linux"]), false).await);
        assert!(
            supervisor
                .file(ServiceKind::Web.dynamic_config_path())
                .await
                .unwrap()
                .contains("\"linux\"")
        );

        supervisor.fail_pushes(true).await;
        assert!(!write(&supervisor, ServiceKind::Ingest, &apps(&["linux"]), false).await);
        assert!(
            supervisor
                .file(ServiceKind::Ingest.dynamic_config_path())
                .await
                .is_none()
        );
    }
}
