//! Run queue daemon - main entry point
//!
//! Composition root: loads settings, opens the SQLite store and serves the JSON-RPC API
//! while the claim reaper and maintenance scheduler run in the background.

mod logging;
mod settings;
mod telemetry;

use anyhow::Result;
use settings::DaemonSettings;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use runqueue_api_rpc::RpcServer;
use runqueue_core::application::{shutdown_channel, ClaimReaper, MaintenanceScheduler, RunQueue};
use runqueue_core::domain::RunQueueKeyProducer;
use runqueue_core::port::{Maintenance, SystemTimeProvider, TimeProvider, UuidProvider};
use runqueue_infra_sqlite::{
    create_pool_with, run_migrations, SqliteMaintenance, SqliteRunQueueStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let settings = DaemonSettings::load()?;
    let _log_guard = logging::init_logging(&settings)?;

    info!("Run queue daemon v{} starting...", VERSION);
    telemetry::log_status();

    // 2. Database
    if let Some(dir) = settings.database_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    info!(database_url = %settings.database_url, "Initializing database...");

    let pool = create_pool_with(&settings.database_url, settings.max_connections)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Dependency wiring
    let keys = RunQueueKeyProducer::new(settings.key_prefix.clone());
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteRunQueueStore::new(
        pool.clone(),
        keys.clone(),
        time_provider.clone(),
    ));

    let strategy = settings.priority_strategy();
    info!(
        strategy = strategy.name(),
        key_prefix = %settings.key_prefix,
        "Run queue configured"
    );
    let run_queue = Arc::new(RunQueue::new(
        keys.clone(),
        store.clone(),
        store.clone(),
        store,
        strategy,
        Arc::new(UuidProvider),
        time_provider.clone(),
        settings.run_queue_options(),
    ));

    let maintenance: Arc<dyn Maintenance> =
        Arc::new(SqliteMaintenance::new(pool.clone(), keys, time_provider));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // 4. Claims left over from a previous process
    let reaper = ClaimReaper::new(
        run_queue.clone(),
        Some(settings.reaper_interval()),
        Some(settings.reaper.batch_size),
    );
    match reaper.reap_once().await {
        Ok(count) => info!(released_claims = count, "Startup recovery completed"),
        Err(e) => tracing::error!(error = ?e, "Startup recovery failed"),
    }
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx.clone()));

    // 5. Maintenance scheduler
    let maintenance_scheduler = MaintenanceScheduler::new(
        maintenance.clone(),
        settings.maintenance_config(),
        settings.maintenance.interval_minutes,
    );
    let maintenance_handle = tokio::spawn(maintenance_scheduler.run(shutdown_rx));

    // 6. JSON-RPC server
    let rpc_server = RpcServer::new(
        settings.rpc.clone(),
        run_queue,
        maintenance,
        settings.maintenance_config(),
    );
    let (addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Waiting for messages...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, reaper_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, maintenance_handle).await;
    pool.close().await;
    telemetry::shutdown();

    info!("Shutdown complete.");

    Ok(())
}
