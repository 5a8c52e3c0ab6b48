// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Insights Operator - hook entrypoint
//!
//! Invoked by the model agent once per hook:
//! - Parses the event from the dispatch path
//! - Reconciles the workload through Pebble
//! - Sets the unit status and exits

use std::sync::Arc;
use tracing::{info, warn};

use insights_operator::config::Config;
use insights_operator::events::{Event, HookContext};
use insights_operator::metadata::CharmMetadata;
use insights_operator::model::HookTools;
use insights_operator::reconciler::Reconciler;
use insights_operator::supervisor::{PebbleClient, Supervisor};
use insights_operator::workload::HttpVersionProbe;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; the agent collects stderr into the unit log
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insights_operator=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    let ctx = HookContext::from_env();
    let event = Event::parse(&ctx);

    info!(
        unit = %config.unit_name,
        hook = %ctx.hook_name,
        charm_dir = %config.charm_dir.display(),
        "Running hook"
    );

    let metadata = match CharmMetadata::load(&config.charm_dir) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(error = %e, "Failed to load charm metadata");
            CharmMetadata::default()
        }
    };

    let model = Arc::new(HookTools::from_config(&config, metadata));
    let supervisor = Arc::new(PebbleClient::from_config(&config));
    info!(
        supervisor_type = supervisor.supervisor_type(),
        socket = %supervisor.socket().display(),
        "Supervisor initialized"
    );

    let reconciler = Reconciler::new(model, supervisor, Arc::new(HttpVersionProbe::new()))
        .with_model_identity(&config.model_name, &config.model_uuid);

    let status = reconciler.handle(&event).await;
    info!(event = %event, status = %status, "Hook complete");

    Ok(())
}
