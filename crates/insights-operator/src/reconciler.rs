// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event dispatch and reconciliation.
//!
//! Each hook is routed to one [`Action`] through [`route`], the action is
//! applied, and the unit status is recomputed from scratch. Most events
//! funnel into the same idempotent reconcile routine:
//!
//! 1. Parse the allow-lists from the options and write both documents.
//! 2. Run migrations if the database relation exists, `migrate` is set and
//!    the marker is absent.
//! 3. Open the web port and publish integration data.
//! 4. Plan the layer, submit it, replan, and record the workload version.
//!
//! Failures never abort the hook: they are logged and surface through the
//! status computed at the end.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::allowlist;
use crate::config::CharmConfig;
use crate::database::{ConnectionDescriptor, DATABASE_RELATION, DatabaseChange, DatabaseRequirer};
use crate::error::Result;
use crate::events::{Event, RelationHook, StorageHook};
use crate::integrations::{self, INGRESS_RELATION, METRICS_RELATION, Topology};
use crate::layer::{self, Layer, PlanInputs, Startup};
use crate::migrations::MigrationRunner;
use crate::model::{Model, RelationId};
use crate::rolling_restart::{RESTART_RELATION, RestartLock};
use crate::service::{CONTAINER_NAME, REPORTS_CACHE_STORAGE, ServiceKind};
use crate::status::{self, MountState, ServiceStates, StatusInputs, UnitStatus};
use crate::supervisor::Supervisor;
use crate::workload::{self, VersionProbe};

/// What to do for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run the full reconcile routine.
    Reconcile,
    /// Ask the provider for the database (leader only).
    RequestDatabase(RelationId),
    /// Classify a provider bag change into derived events.
    DatabaseChanged(RelationId),
    /// A new database or endpoint: clear the marker, migrate, replan.
    DatabaseRecreated,
    /// The database relation is going away: stop ingest only.
    StopIngest(RelationId),
    /// The reports cache appeared.
    StorageAttached,
    /// The reports cache is going away.
    StorageDetaching,
    /// Ask for the restart lock (upgrade).
    AcquireRestartLock,
    /// Advance the restart lock handshake.
    ProcessRestartLock,
    /// Republish monitoring and ingress data.
    PublishIntegrations,
    /// Only refresh the status.
    None,
}

/// Dispatch table.
pub fn route(event: &Event) -> Action {
    match event {
        Event::Start | Event::ConfigChanged => Action::Reconcile,
        Event::PebbleReady { container } if container == CONTAINER_NAME => Action::Reconcile,
        Event::UpgradeCharm => Action::AcquireRestartLock,
        Event::LeaderElected => Action::ProcessRestartLock,
        Event::Relation { hook, relation, .. } => {
            match (relation.endpoint.as_str(), hook) {
                (DATABASE_RELATION, RelationHook::Created | RelationHook::Joined) => {
                    Action::RequestDatabase(relation.clone())
                }
                (DATABASE_RELATION, RelationHook::Changed) => {
                    Action::DatabaseChanged(relation.clone())
                }
                (DATABASE_RELATION, RelationHook::Broken) => Action::StopIngest(relation.clone()),
                (RESTART_RELATION, RelationHook::Changed | RelationHook::Departed) => {
                    Action::ProcessRestartLock
                }
                (METRICS_RELATION | INGRESS_RELATION, RelationHook::Joined | RelationHook::Changed) => {
                    Action::PublishIntegrations
                }
                _ => Action::None,
            }
        }
        Event::Storage { hook, storage } if storage == REPORTS_CACHE_STORAGE => match hook {
            StorageHook::Attached => Action::StorageAttached,
            StorageHook::Detaching => Action::StorageDetaching,
        },
        _ => Action::None,
    }
}

/// Facts about the hook being handled that change how state is read.
#[derive(Debug, Clone, Default)]
struct HookScope {
    /// Database relation being torn down; treated as absent.
    breaking: Option<RelationId>,
    /// The reports cache is detaching; treated as unmounted.
    detaching: bool,
}

impl HookScope {
    fn for_action(action: &Action) -> Self {
        match action {
            Action::StopIngest(relation) => Self {
                breaking: Some(relation.clone()),
                detaching: false,
            },
            Action::StorageDetaching => Self {
                breaking: None,
                detaching: true,
            },
            _ => Self::default(),
        }
    }
}

/// Reconciles the workload for one unit.
pub struct Reconciler {
    model: Arc<dyn Model>,
    supervisor: Arc<dyn Supervisor>,
    probe: Arc<dyn VersionProbe>,
    model_name: String,
    model_uuid: String,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        model: Arc<dyn Model>,
        supervisor: Arc<dyn Supervisor>,
        probe: Arc<dyn VersionProbe>,
    ) -> Self {
        Self {
            model,
            supervisor,
            probe,
            model_name: String::new(),
            model_uuid: String::new(),
        }
    }

    /// Set the model identity published to monitoring and ingress.
    pub fn with_model_identity(
        mut self,
        model_name: impl Into<String>,
        model_uuid: impl Into<String>,
    ) -> Self {
        self.model_name = model_name.into();
        self.model_uuid = model_uuid.into();
        self
    }

    /// Handle one event and set the resulting status.
    pub async fn handle(&self, event: &Event) -> UnitStatus {
        let action = route(event);
        info!(event = %event, action = ?action, "Handling event");

        let scope = HookScope::for_action(&action);
        if let Err(e) = self.apply_scoped(&action, &scope).await {
            error!(event = %event, error = %e, "Event handling failed");
        }

        let status = self.collect_status(&scope).await;
        if let Err(e) = self.model.set_status(&status).await {
            error!(status = %status, error = %e, "Failed to set unit status");
        }
        status
    }

    /// Apply an action without touching the status.
    pub async fn apply(&self, action: &Action) -> Result<()> {
        self.apply_scoped(action, &HookScope::for_action(action))
            .await
    }

    /// Status the unit would report right now.
    pub async fn status(&self) -> UnitStatus {
        self.collect_status(&HookScope::default()).await
    }

    async fn apply_scoped(&self, action: &Action, scope: &HookScope) -> Result<()> {
        match action {
            Action::Reconcile => self.reconcile(scope).await,
            Action::RequestDatabase(relation) => {
                DatabaseRequirer::new(self.model.as_ref())
                    .request_database(relation)
                    .await
            }
            Action::DatabaseChanged(relation) => {
                let change = self.requirer(scope).observe_change(relation).await?;
                info!(relation = %relation, change = ?change, "Database relation changed");
                match change {
                    DatabaseChange::Created | DatabaseChange::EndpointsChanged => {
                        self.database_recreated(scope).await
                    }
                    DatabaseChange::Other => self.reconcile(scope).await,
                }
            }
            Action::DatabaseRecreated => self.database_recreated(scope).await,
            Action::StopIngest(_) => {
                self.stop_service(ServiceKind::Ingest).await;
                Ok(())
            }
            Action::StorageAttached => {
                if self.storage_path(scope).is_empty() {
                    info!(storage = REPORTS_CACHE_STORAGE, "Reports cache has no mount location yet");
                    return Ok(());
                }
                self.reconcile(scope).await
            }
            Action::StorageDetaching => {
                let config = self.charm_config().await?;
                let database = self.requirer(scope).fetch().await;
                let ingest_rendered = self.ingest_config_present().await;
                self.update_layer_and_replan(&config, &database, ingest_rendered, scope)
                    .await;
                Ok(())
            }
            Action::AcquireRestartLock => self.restart_lock(true, scope).await,
            Action::ProcessRestartLock => self.restart_lock(false, scope).await,
            Action::PublishIntegrations => {
                let config = self.charm_config().await?;
                self.publish_integrations(&config).await;
                Ok(())
            }
            Action::None => Ok(()),
        }
    }

    async fn charm_config(&self) -> Result<CharmConfig> {
        let raw = self.model.config().await?;
        Ok(CharmConfig::from_value(raw)?)
    }

    fn requirer<'a>(&'a self, scope: &'a HookScope) -> DatabaseRequirer<'a> {
        DatabaseRequirer::new(self.model.as_ref()).excluding(scope.breaking.as_ref())
    }

    fn mount_state(&self, scope: &HookScope) -> MountState {
        let Some(container) = self.model.metadata().container(CONTAINER_NAME) else {
            return MountState::NoContainer;
        };
        match container.mount_location(REPORTS_CACHE_STORAGE) {
            Some(location) if !scope.detaching => MountState::Present(location.to_string()),
            _ => MountState::Missing,
        }
    }

    fn storage_path(&self, scope: &HookScope) -> String {
        match self.mount_state(scope) {
            MountState::Present(location) => location,
            MountState::NoContainer => {
                error!(container = CONTAINER_NAME, "Failed to get container metadata");
                String::new()
            }
            MountState::Missing => {
                debug!(storage = REPORTS_CACHE_STORAGE, "Reports cache mount not available");
                String::new()
            }
        }
    }

    async fn ingest_config_present(&self) -> bool {
        self.supervisor
            .exists(ServiceKind::Ingest.dynamic_config_path())
            .await
            .unwrap_or(false)
    }

    /// The shared reconcile routine.
    async fn reconcile(&self, scope: &HookScope) -> Result<()> {
        let config = self.charm_config().await?;

        let web_apps = allowlist::parse_apps(&config.web_apps);
        let ingest_apps = allowlist::parse_apps(&config.ingest_apps);
        allowlist::write(
            self.supervisor.as_ref(),
            ServiceKind::Web,
            &web_apps,
            config.web_legacy,
        )
        .await;
        let ingest_rendered = allowlist::write(
            self.supervisor.as_ref(),
            ServiceKind::Ingest,
            &ingest_apps,
            config.ingest_legacy,
        )
        .await;

        let requirer = self.requirer(scope);
        let database = requirer.fetch().await;
        let migrations =
            MigrationRunner::new(self.supervisor.as_ref()).reporting_to(self.model.as_ref());
        if requirer.relation().await.is_some() && config.migrate && !migrations.is_done().await {
            migrations.run(&database).await;
        }

        if let Err(e) = self.model.set_ports(&[config.web_port]).await {
            warn!(port = config.web_port, error = %e, "Failed to open web port");
        }

        self.publish_integrations(&config).await;
        self.update_layer_and_replan(&config, &database, ingest_rendered, scope)
            .await;
        Ok(())
    }

    async fn database_recreated(&self, scope: &HookScope) -> Result<()> {
        let config = self.charm_config().await?;
        let database = self.requirer(scope).fetch().await;
        let migrations =
            MigrationRunner::new(self.supervisor.as_ref()).reporting_to(self.model.as_ref());
        migrations.mark(false).await;
        if config.migrate {
            migrations.run(&database).await;
        } else {
            info!("Migrations disabled by configuration");
        }
        let ingest_rendered = self.ingest_config_present().await;
        self.update_layer_and_replan(&config, &database, ingest_rendered, scope)
            .await;
        Ok(())
    }

    async fn publish_integrations(&self, config: &CharmConfig) {
        let topology = Topology::of(self.model.as_ref(), &self.model_name, &self.model_uuid);
        if let Err(e) = integrations::publish(self.model.as_ref(), config, &topology).await {
            warn!(error = %e, "Failed to publish integration data");
        }
    }

    /// Plan, submit and replan. Pebble problems end this step only.
    async fn update_layer_and_replan(
        &self,
        config: &CharmConfig,
        database: &ConnectionDescriptor,
        ingest_rendered: bool,
        scope: &HookScope,
    ) {
        let storage_path = self.storage_path(scope);
        let inputs = PlanInputs {
            config,
            database,
            storage_path: &storage_path,
            ingest_config_rendered: ingest_rendered,
        };
        let plan = layer::plan(&inputs);

        if let Err(e) = self.submit(&plan).await {
            info!(error = %e, "Unable to connect to Pebble");
            return;
        }

        workload::record_version(
            self.model.as_ref(),
            self.supervisor.as_ref(),
            self.probe.as_ref(),
            config.web_port,
        )
        .await;
    }

    async fn submit(&self, plan: &Layer) -> Result<()> {
        self.supervisor.add_layer(CONTAINER_NAME, plan, true).await?;
        info!(label = CONTAINER_NAME, "Added updated layer to Pebble plan");

        self.supervisor.replan().await?;
        info!(container = CONTAINER_NAME, "Replanned Pebble container");

        let disabled: Vec<&str> = ServiceKind::ALL
            .iter()
            .filter(|kind| {
                plan.services
                    .get(kind.name())
                    .is_some_and(|spec| spec.startup == Startup::Disabled)
            })
            .map(|kind| kind.name())
            .collect();
        if disabled.is_empty() {
            return Ok(());
        }
        let running: Vec<&str> = self
            .supervisor
            .services(&disabled)
            .await?
            .iter()
            .filter(|info| info.is_running())
            .filter_map(|info| disabled.iter().copied().find(|name| *name == info.name))
            .collect();
        if !running.is_empty() {
            info!(services = ?running, "Stopping disabled services");
            self.supervisor.stop(&running).await?;
        }
        Ok(())
    }

    /// Stop a service if it is in the plan and running.
    async fn stop_service(&self, kind: ServiceKind) {
        if !self.supervisor.can_connect().await {
            return;
        }
        let running = match self.supervisor.services(&[kind.name()]).await {
            Ok(services) => services
                .iter()
                .any(|info| info.name == kind.name() && info.is_running()),
            Err(e) => {
                warn!(service = %kind, error = %e, "Failed to query service");
                return;
            }
        };
        if !running {
            return;
        }
        info!(service = %kind, "Stopping service");
        if let Err(e) = self.supervisor.stop(&[kind.name()]).await {
            error!(service = %kind, error = %e, "Failed to stop service");
        }
    }

    /// Drive the restart lock, restarting the workload when it is ours.
    async fn restart_lock(&self, request: bool, scope: &HookScope) -> Result<()> {
        let lock = RestartLock::new(self.model.as_ref());
        let Some(relation) = lock.relation().await? else {
            if request {
                info!("No restart relation, restarting without coordination");
                return self.reconcile(scope).await;
            }
            return Ok(());
        };

        if request {
            lock.request(&relation).await?;
        }
        lock.process(&relation).await?;

        if !lock.is_granted(&relation).await? {
            return Ok(());
        }

        info!("Restart lock acquired, restarting workload");
        let restarted = self.reconcile(scope).await;
        lock.release(&relation).await?;
        lock.process(&relation).await?;
        restarted
    }

    /// Evaluate and return the status to show.
    async fn collect_status(&self, scope: &HookScope) -> UnitStatus {
        let (config_error, migrate_enabled) = match self.model.config().await {
            Ok(raw) => {
                let migrate = raw.get("migrate").and_then(|v| v.as_bool()).unwrap_or(true);
                match CharmConfig::from_value(raw) {
                    Ok(config) => (None, config.migrate),
                    Err(e) => (Some(e.to_string()), migrate),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read configuration");
                (None, true)
            }
        };

        let requirer = self.requirer(scope);
        let relation_present = requirer.relation().await.is_some();
        let relation_ready = relation_present && requirer.is_ready().await;

        let services = self.service_states().await;
        let migrations_done = MigrationRunner::new(self.supervisor.as_ref())
            .is_done()
            .await;

        let inputs = StatusInputs {
            config_error,
            relation_present,
            relation_ready,
            mount: self.mount_state(scope),
            services,
            migrate_enabled,
            migrations_done,
        };
        let set = status::evaluate(&inputs);
        for signal in set.all() {
            debug!(status = %signal, "Status signal");
        }
        set.winner()
    }

    async fn service_states(&self) -> ServiceStates {
        if !self.supervisor.can_connect().await {
            return ServiceStates::Unreachable;
        }
        let names = [ServiceKind::Web.name(), ServiceKind::Ingest.name()];
        match self.supervisor.services(&names).await {
            Ok(services) => {
                let running = |kind: ServiceKind| {
                    services
                        .iter()
                        .any(|info| info.name == kind.name() && info.is_running())
                };
                ServiceStates::Known {
                    web_running: running(ServiceKind::Web),
                    ingest_running: running(ServiceKind::Ingest),
                }
            }
            Err(e) => {
                debug!(error = %e, "Failed to query services");
                ServiceStates::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(endpoint: &str) -> RelationId {
        RelationId::new(endpoint, 1)
    }

    fn relation_event(endpoint: &str, hook: RelationHook) -> Event {
        Event::Relation {
            hook,
            relation: relation(endpoint),
            remote_app: None,
        }
    }

    #[test]
    fn test_route_lifecycle() {
        assert_eq!(route(&Event::Start), Action::Reconcile);
        assert_eq!(route(&Event::ConfigChanged), Action::Reconcile);
        assert_eq!(route(&Event::UpgradeCharm), Action::AcquireRestartLock);
        assert_eq!(route(&Event::LeaderElected), Action::ProcessRestartLock);
        assert_eq!(route(&Event::Install), Action::None);
        assert_eq!(route(&Event::UpdateStatus), Action::None);
        assert_eq!(
            route(&Event::PebbleReady {
                container: CONTAINER_NAME.to_string()
            }),
            Action::Reconcile
        );
        assert_eq!(
            route(&Event::PebbleReady {
                container: "sidecar".to_string()
            }),
            Action::None
        );
    }

    #[test]
    fn test_route_relations() {
        assert_eq!(
            route(&relation_event("database", RelationHook::Created)),
            Action::RequestDatabase(relation("database"))
        );
        assert_eq!(
            route(&relation_event("database", RelationHook::Changed)),
            Action::DatabaseChanged(relation("database"))
        );
        assert_eq!(
            route(&relation_event("database", RelationHook::Broken)),
            Action::StopIngest(relation("database"))
        );
        assert_eq!(
            route(&relation_event("database", RelationHook::Departed)),
            Action::None
        );
        assert_eq!(
            route(&relation_event("restart", RelationHook::Changed)),
            Action::ProcessRestartLock
        );
        assert_eq!(
            route(&relation_event("nginx-route", RelationHook::Joined)),
            Action::PublishIntegrations
        );
        assert_eq!(
            route(&relation_event("metrics-endpoint", RelationHook::Broken)),
            Action::None
        );
    }

    #[test]
    fn test_route_storage() {
        let storage = |hook| Event::Storage {
            hook,
            storage: REPORTS_CACHE_STORAGE.to_string(),
        };
        assert_eq!(route(&storage(StorageHook::Attached)), Action::StorageAttached);
        assert_eq!(route(&storage(StorageHook::Detaching)), Action::StorageDetaching);
        assert_eq!(
            route(&Event::Storage {
                hook: StorageHook::Attached,
                storage: "other".to_string(),
            }),
            Action::None
        );
    }
}
