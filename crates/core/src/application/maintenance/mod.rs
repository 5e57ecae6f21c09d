// Maintenance Service
// Scheduled maintenance operations for the queue store

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs periodic maintenance operations (GC, reconcile, VACUUM) in the background
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    interval: Duration,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Maintenance implementation
    /// * `config` - Maintenance configuration
    /// * `interval_minutes` - How often to run maintenance (minutes)
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        interval_minutes: u64,
    ) -> Self {
        Self {
            maintenance,
            config,
            interval: Duration::from_secs(interval_minutes.max(1) * 60),
        }
    }

    /// Run maintenance loop (background task)
    ///
    /// Should be spawned in tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_hours = self.config.released_claim_retention_hours,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.interval);
        // First tick fires immediately; skip it so startup is not slowed down
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    info!("Running scheduled maintenance...");
                    match self.maintenance.run_full_maintenance(&self.config).await {
                        Ok(report) => {
                            info!(
                                db_size_mb = report.stats.db_size_mb,
                                pending_messages = report.stats.pending_messages,
                                live_claims = report.stats.live_claims,
                                deleted_claims = report.deleted_claims,
                                reconciled_members = report.reconciled_members,
                                "Scheduled maintenance completed successfully"
                            );
                        }
                        Err(e) => {
                            error!(error = ?e, "Scheduled maintenance failed");
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("Maintenance scheduler stopped");
                    break;
                }
            }
        }
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<MaintenanceReport> {
        info!("Running manual maintenance...");

        let report = self.maintenance.run_full_maintenance(&self.config).await?;

        info!(
            db_size_mb = report.stats.db_size_mb,
            pending_messages = report.stats.pending_messages,
            "Manual maintenance completed"
        );

        Ok(report)
    }
}
