//! zp metadata controller
//!
//! Runs the offset condition cron against in-process collaborators and
//! applies the metadata updates it dispatches.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zp_meta::{
    condition::ConditionCron,
    config,
    migrate::MigrateRegister,
    offsets::InMemoryOffsetStore,
    update::{UpdateQueue, UpdateTask},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ZP_META_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting zp metadata controller");
    info!(
        interval_ms = config.condition_cron_interval_ms,
        stuck_offset_dist = config.stuck_offset_dist,
        "Configuration loaded"
    );

    let offsets = Arc::new(InMemoryOffsetStore::new());
    let migrate = Arc::new(MigrateRegister::new(config.migrate_credits));
    let (updates, update_rx) = UpdateQueue::new(config.update_queue_capacity);
    let updates = Arc::new(updates);

    let applier_handle = tokio::spawn(apply_updates(update_rx));

    let cron = ConditionCron::new(config.condition_cron(), offsets, migrate, updates.clone());
    cron.activate()?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    cron.abandon().await;

    // Closing the queue lets the applier drain and exit.
    drop(cron);
    drop(updates);
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, applier_handle).await {
        warn!(error = %e, "Update applier did not shut down in time");
    }

    info!("Metadata controller shutdown complete");
    Ok(())
}

/// Apply dispatched updates until the queue closes.
async fn apply_updates(mut rx: mpsc::Receiver<UpdateTask>) {
    let mut applied = 0u64;
    while let Some(task) = rx.recv().await {
        applied += 1;
        info!(op = %task.op, task = %task.describe(), "Applied metadata update");
    }
    info!(applied, "Update applier stopped");
}
