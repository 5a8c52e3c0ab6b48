// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle events, parsed from the hook being dispatched.

use std::fmt;
use std::path::Path;

use crate::model::RelationId;

/// Stage of a relation's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationHook {
    /// The relation was established.
    Created,
    /// A remote unit joined.
    Joined,
    /// Remote data changed.
    Changed,
    /// A remote unit left.
    Departed,
    /// The relation is being removed.
    Broken,
}

impl RelationHook {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "created" => RelationHook::Created,
            "joined" => RelationHook::Joined,
            "changed" => RelationHook::Changed,
            "departed" => RelationHook::Departed,
            "broken" => RelationHook::Broken,
            _ => return None,
        })
    }
}

/// Stage of a storage's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageHook {
    /// Storage was attached and mounted.
    Attached,
    /// Storage is about to go away.
    Detaching,
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `install`
    Install,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `remove`
    Remove,
    /// `upgrade-charm`
    UpgradeCharm,
    /// `config-changed`
    ConfigChanged,
    /// `update-status`
    UpdateStatus,
    /// `leader-elected`
    LeaderElected,
    /// `<container>-pebble-ready`
    PebbleReady {
        /// Workload container name.
        container: String,
    },
    /// `<endpoint>-relation-<stage>`
    Relation {
        /// Stage.
        hook: RelationHook,
        /// Relation the hook is about.
        relation: RelationId,
        /// Remote application, when the agent names it.
        remote_app: Option<String>,
    },
    /// `<storage>-storage-<stage>`
    Storage {
        /// Stage.
        hook: StorageHook,
        /// Storage name from the metadata.
        storage: String,
    },
    /// Anything this operator does not handle.
    Other(String),
}

/// Hook context handed over by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookContext {
    /// Hook name, e.g. `config-changed`.
    pub hook_name: String,
    /// `JUJU_RELATION_ID`
    pub relation_id: Option<String>,
    /// `JUJU_REMOTE_APP`
    pub remote_app: Option<String>,
    /// `JUJU_WORKLOAD_NAME`
    pub workload_name: Option<String>,
}

impl HookContext {
    /// Read the context from the environment.
    ///
    /// The hook name is taken from `JUJU_DISPATCH_PATH` (`hooks/<name>`),
    /// falling back to the executable's file name.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let argv0 = std::env::args().next().unwrap_or_default();
        Self {
            hook_name: hook_name(var("JUJU_DISPATCH_PATH").as_deref(), &argv0),
            relation_id: var("JUJU_RELATION_ID"),
            remote_app: var("JUJU_REMOTE_APP"),
            workload_name: var("JUJU_WORKLOAD_NAME"),
        }
    }
}

/// Hook name from the dispatch path or, failing that, the program name.
pub fn hook_name(dispatch_path: Option<&str>, argv0: &str) -> String {
    let source = dispatch_path.unwrap_or(argv0);
    Path::new(source)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Event {
    /// Parse the event for a hook.
    ///
    /// Relation hooks without a usable `JUJU_RELATION_ID` become [`Event::Other`].
    pub fn parse(ctx: &HookContext) -> Self {
        let name = ctx.hook_name.as_str();
        match name {
            "install" => return Event::Install,
            "start" => return Event::Start,
            "stop" => return Event::Stop,
            "remove" => return Event::Remove,
            "upgrade-charm" => return Event::UpgradeCharm,
            "config-changed" => return Event::ConfigChanged,
            "update-status" => return Event::UpdateStatus,
            "leader-elected" => return Event::LeaderElected,
            _ => {}
        }

        if let Some(container) = name.strip_suffix("-pebble-ready") {
            let container = ctx
                .workload_name
                .clone()
                .unwrap_or_else(|| container.to_string());
            return Event::PebbleReady { container };
        }

        if let Some((endpoint, suffix)) = name.rsplit_once("-relation-")
            && let Some(hook) = RelationHook::from_suffix(suffix)
        {
            let relation = ctx
                .relation_id
                .as_deref()
                .and_then(RelationId::parse)
                .filter(|id| id.endpoint == endpoint);
            return match relation {
                Some(relation) => Event::Relation {
                    hook,
                    relation,
                    remote_app: ctx.remote_app.clone(),
                },
                None => Event::Other(name.to_string()),
            };
        }

        if let Some(storage) = name.strip_suffix("-storage-attached") {
            return Event::Storage {
                hook: StorageHook::Attached,
                storage: storage.to_string(),
            };
        }
        if let Some(storage) = name.strip_suffix("-storage-detaching") {
            return Event::Storage {
                hook: StorageHook::Detaching,
                storage: storage.to_string(),
            };
        }

        Event::Other(name.to_string())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Install => f.write_str("install"),
            Event::Start => f.write_str("start"),
            Event::Stop => f.write_str("stop"),
            Event::Remove => f.write_str("remove"),
            Event::UpgradeCharm => f.write_str("upgrade-charm"),
            Event::ConfigChanged => f.write_str("config-changed"),
            Event::UpdateStatus => f.write_str("update-status"),
            Event::LeaderElected => f.write_str("leader-elected"),
            Event::PebbleReady { container } => write!(f, "{}-pebble-ready", container),
            Event::Relation { hook, relation, .. } => {
                write!(f, "{}-relation-{:?} ({})", relation.endpoint, hook, relation)
            }
            Event::Storage { hook, storage } => write!(f, "{}-storage-{:?}", storage, hook),
            Event::Other(name) => f.write_str(name),
        }
    }
}
