// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Charm metadata: containers and the storage mounted into them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

/// Subset of `metadata.yaml` the operator relies on.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CharmMetadata {
    /// Charm name.
    #[serde(default)]
    pub name: String,
    /// Workload containers keyed by name.
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerMeta>,
}

/// A workload container.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ContainerMeta {
    /// Storage mounted into the container.
    #[serde(default)]
    pub mounts: Vec<MountMeta>,
}

/// A single storage mount.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MountMeta {
    /// Storage name as declared under `storage:`.
    pub storage: String,
    /// Mount point inside the container.
    #[serde(default)]
    pub location: Option<String>,
}

impl CharmMetadata {
    /// Parse a metadata document.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load `metadata.yaml` from the charm directory, falling back to `charmcraft.yaml`.
    pub fn load(charm_dir: &Path) -> crate::error::Result<Self> {
        for file in ["metadata.yaml", "charmcraft.yaml"] {
            let path = charm_dir.join(file);
            match std::fs::read_to_string(&path) {
                Ok(yaml) => {
                    debug!(path = %path.display(), "Loaded charm metadata");
                    return Ok(Self::from_yaml(&yaml)?);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(crate::error::Error::Other(format!(
            "no metadata.yaml or charmcraft.yaml in {}",
            charm_dir.display()
        )))
    }

    /// Look up a container by name.
    pub fn container(&self, name: &str) -> Option<&ContainerMeta> {
        self.containers.get(name)
    }
}

impl ContainerMeta {
    /// Mount location of a storage; `None` when unmounted or without a location.
    pub fn mount_location(&self, storage: &str) -> Option<&str> {
        self.mounts
            .iter()
            .find(|m| m.storage == storage)
            .and_then(|m| m.location.as_deref())
            .filter(|l| !l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"
name: ubuntu-insights
containers:
  ubuntu-insights-server:
    resource: ubuntu-insights-server-image
    mounts:
      - storage: reports-cache
        location: /var/lib/ubuntu-insights/
storage:
  reports-cache:
    type: filesystem
"#;

    #[test]
    fn test_mount_location() {
        let meta = CharmMetadata::from_yaml(METADATA).unwrap();
        let container = meta.container("ubuntu-insights-server").unwrap();
        assert_eq!(
            container.mount_location("reports-cache"),
            Some("/var/lib/ubuntu-insights/")
        );
        assert_eq!(container.mount_location("other"), None);
        assert!(meta.container("missing").is_none());
    }

    #[test]
    fn test_empty_location_is_none() {
        let meta = CharmMetadata::from_yaml(
            "containers:\n  c:\n    mounts:\n      - storage: reports-cache\n        location: ''\n",
        )
        .unwrap();
        assert_eq!(
            meta.container("c").unwrap().mount_location("reports-cache"),
            None
        );
    }

    #[test]
    fn test_load_falls_back_to_charmcraft() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("charmcraft.yaml"), METADATA).unwrap();
        let meta = CharmMetadata::load(dir.path()).unwrap();
        assert_eq!(meta.name, "ubuntu-insights");
    }

    #[test]
    fn test_load_without_files_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CharmMetadata::load(dir.path()).is_err());
    }
}
