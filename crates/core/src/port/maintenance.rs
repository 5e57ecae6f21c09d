// Store maintenance port
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Store maintenance statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub pending_messages: i64,
    pub live_claims: i64,
    pub released_claims: i64,
    /// Parent queues matched by the shared queue scan pattern
    pub parent_queue_count: i64,
    /// Lanes holding at least one running member
    pub running_lane_count: i64,
    pub fragmentation_percent: f64,
}

/// Maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Retention period for released claims (hours)
    pub released_claim_retention_hours: i64,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,

    /// Drop current-concurrency members that have no live claim
    pub reconcile_concurrency: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            released_claim_retention_hours: 24,
            max_db_size_mb: 1000.0,
            reconcile_concurrency: true,
        }
    }
}

/// Summary of one full maintenance pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub deleted_claims: i64,
    pub reconciled_members: i64,
    pub reclaimed_mb: f64,
    pub stats: MaintenanceStats,
}

/// Store maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space and optimize DB
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete released claims older than the retention period
    ///
    /// # Returns
    /// Number of claims deleted
    async fn gc_released_claims(&self, retention_hours: i64) -> Result<i64>;

    /// Remove current-concurrency members with no live claim (leaked by crashed
    /// consumers or manual edits)
    ///
    /// # Returns
    /// Number of members removed
    async fn reconcile_concurrency(&self) -> Result<i64>;

    /// Get maintenance statistics
    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (GC + reconcile + VACUUM when large)
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceReport> {
        let stats_before = self.get_stats().await?;

        let deleted_claims = self
            .gc_released_claims(config.released_claim_retention_hours)
            .await?;

        let reconciled_members = if config.reconcile_concurrency {
            self.reconcile_concurrency().await?
        } else {
            0
        };

        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        let stats = self.get_stats().await?;

        tracing::info!(
            deleted_claims = deleted_claims,
            reconciled_members = reconciled_members,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats.db_size_mb,
            "Maintenance completed"
        );

        Ok(MaintenanceReport {
            deleted_claims,
            reconciled_members,
            reclaimed_mb,
            stats,
        })
    }
}
