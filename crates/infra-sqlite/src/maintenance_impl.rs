// SQLite Maintenance Implementation
use async_trait::async_trait;
use runqueue_core::domain::RunQueueKeyProducer;
use runqueue_core::error::{AppError, Result};
use runqueue_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::map_sqlx_error;
use crate::transaction::ImmediateTransaction;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    keys: RunQueueKeyProducer,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(
        pool: SqlitePool,
        keys: RunQueueKeyProducer,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            pool,
            keys,
            time_provider,
        }
    }

    /// Get DB file size in MB
    async fn get_db_size(&self) -> Result<f64> {
        // Query database page count and page size
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page size: {}", e)))?;

        let size_bytes = page_count * page_size;
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);

        Ok(size_mb)
    }

    async fn count(&self, sql: &str, bind: Option<&str>) -> Result<i64> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        query.fetch_one(&self.pool).await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = self.get_db_size().await?;

        // Run VACUUM (reclaims space and defragments)
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = self.get_db_size().await?;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn gc_released_claims(&self, retention_hours: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let retention_ms = retention_hours.max(0) * 60 * 60 * 1000;
        let cutoff_time = now - retention_ms;

        info!(
            retention_hours = retention_hours,
            cutoff_time = cutoff_time,
            "Running released claim GC"
        );

        let result = sqlx::query(
            r#"
            DELETE FROM claims
            WHERE released_at IS NOT NULL
            AND released_at < ?
            "#,
        )
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(format!("Claim GC failed: {}", e)))?;

        let deleted = result.rows_affected() as i64;

        info!(deleted_claims = deleted, "Released claim GC completed");

        Ok(deleted)
    }

    async fn reconcile_concurrency(&self) -> Result<i64> {
        let pattern = self.keys.current_concurrency_scan_pattern();

        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = async {
            let conn = tx.conn()?;
            let leaked: Vec<(String, String)> = sqlx::query_as(
                r#"
                SELECT s.set_key, s.member FROM set_members s
                WHERE s.set_key GLOB ?
                AND NOT EXISTS (
                    SELECT 1 FROM claims c
                    WHERE c.message_id = s.member AND c.released_at IS NULL
                )
                "#,
            )
            .bind(&pattern)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

            for (set_key, member) in &leaked {
                warn!(
                    key = %self.keys.strip_key_prefix(set_key),
                    member = %member,
                    "Removing concurrency member without a live claim"
                );
                sqlx::query("DELETE FROM set_members WHERE set_key = ? AND member = ?")
                    .bind(set_key)
                    .bind(member)
                    .execute(&mut *conn)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            Ok::<_, AppError>(leaked.len() as i64)
        }
        .await;
        let removed = tx.finish(result).await?;

        info!(reconciled_members = removed, "Concurrency reconciliation completed");
        Ok(removed)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_mb = self.get_db_size().await?;

        let pending_messages = self
            .count(
                "SELECT COUNT(*) FROM messages m WHERE NOT EXISTS \
                 (SELECT 1 FROM claims c WHERE c.message_key = m.message_key \
                 AND c.released_at IS NULL)",
                None,
            )
            .await?;
        let live_claims = self
            .count("SELECT COUNT(*) FROM claims WHERE released_at IS NULL", None)
            .await?;
        let released_claims = self
            .count("SELECT COUNT(*) FROM claims WHERE released_at IS NOT NULL", None)
            .await?;

        let shared_queue_pattern = self.keys.shared_queue_scan_pattern();
        let parent_queue_count = self
            .count(
                "SELECT COUNT(DISTINCT set_key) FROM sorted_set_members WHERE set_key GLOB ?",
                Some(&shared_queue_pattern),
            )
            .await?;

        let running_pattern = self.keys.queue_current_concurrency_scan_pattern();
        let running_lane_count = self
            .count(
                "SELECT COUNT(DISTINCT set_key) FROM set_members WHERE set_key GLOB ?",
                Some(&running_pattern),
            )
            .await?;

        let db_size_bytes = (db_size_mb * 1024.0 * 1024.0) as i64;

        // Share of claim rows that are only kept for history
        let total_claims = live_claims + released_claims;
        let fragmentation_percent = if total_claims > 0 {
            (released_claims as f64 / total_claims as f64) * 100.0
        } else {
            0.0
        };

        Ok(MaintenanceStats {
            db_size_mb,
            db_size_bytes,
            pending_messages,
            live_claims,
            released_claims,
            parent_queue_count,
            running_lane_count,
            fragmentation_percent,
        })
    }
}
