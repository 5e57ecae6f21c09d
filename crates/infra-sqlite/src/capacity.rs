// SQLite Queue Capacity Tracker
//
// Current concurrency per level is a set of claimed message ids, limits and the
// organization disable flag are scalars. Check-and-acquire runs inside one immediate
// transaction, so two consumers can never both take the last slot.

use async_trait::async_trait;
use runqueue_core::domain::{
    AcquireOutcome, CapacityKey, CapacityKeySet, CapacityLevel, QueueCapacity,
    RunQueueKeyProducer,
};
use runqueue_core::error::{AppError, Result};
use runqueue_core::port::CapacityTracker;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::sets::{kv_delete, kv_get, kv_set, sadd, scard, smembers, srem};
use crate::store::SqliteRunQueueStore;
use crate::transaction::ImmediateTransaction;

/// Stored value of a set disable flag
const FLAG_SET: &str = "1";

fn parse_limit(key: &str, raw: Option<String>) -> Option<u32> {
    let raw = raw?;
    match raw.trim().parse::<u32>() {
        Ok(limit) => Some(limit),
        Err(_) => {
            warn!(limit_key = %key, value = %raw, "Ignoring unparsable concurrency limit");
            None
        }
    }
}

/// Effective limit of one level (configured, then fallback key, then default)
pub(crate) async fn read_limit(
    conn: &mut SqliteConnection,
    keys: &RunQueueKeyProducer,
    key: &CapacityKey,
) -> Result<u32> {
    let configured = parse_limit(
        &key.limit_key,
        kv_get(conn, &keys.prefixed_key(&key.limit_key)).await?,
    );
    let fallback = match (&configured, &key.fallback_limit_key) {
        (None, Some(fallback_key)) => parse_limit(
            fallback_key,
            kv_get(conn, &keys.prefixed_key(fallback_key)).await?,
        ),
        _ => None,
    };
    Ok(key.effective_limit(configured, fallback))
}

/// Admit `member` at every level of `key_set` or at none
pub(crate) async fn check_and_acquire(
    conn: &mut SqliteConnection,
    keys: &RunQueueKeyProducer,
    key_set: &CapacityKeySet,
    member: &str,
) -> Result<AcquireOutcome> {
    if let Some(flag_key) = &key_set.disabled_flag_key {
        let flag = kv_get(conn, &keys.prefixed_key(flag_key)).await?;
        if flag.as_deref() == Some(FLAG_SET) {
            return Ok(AcquireOutcome::Denied {
                level: CapacityLevel::Organization,
            });
        }
    }

    for key in key_set.iter() {
        let limit = read_limit(conn, keys, key).await?;
        let current = scard(conn, &keys.prefixed_key(&key.current_key)).await?;
        if !QueueCapacity::new(current, limit).has_headroom() {
            debug!(
                level = %key.level,
                current = current,
                limit = limit,
                "Capacity denied"
            );
            return Ok(AcquireOutcome::Denied { level: key.level });
        }
    }

    for key in key_set.iter() {
        sadd(conn, &keys.prefixed_key(&key.current_key), member).await?;
    }
    Ok(AcquireOutcome::Granted)
}

/// Remove `member` from every level; returns the levels that did not hold it
pub(crate) async fn release_members(
    conn: &mut SqliteConnection,
    keys: &RunQueueKeyProducer,
    key_set: &CapacityKeySet,
    member: &str,
) -> Result<Vec<CapacityLevel>> {
    let mut missing = Vec::new();
    for key in key_set.iter() {
        if !srem(conn, &keys.prefixed_key(&key.current_key), member).await? {
            missing.push(key.level);
        }
    }
    Ok(missing)
}

#[async_trait]
impl CapacityTracker for SqliteRunQueueStore {
    async fn peek(&self, key: &CapacityKey) -> Result<QueueCapacity> {
        let mut conn = self.acquire().await?;
        let limit = read_limit(&mut conn, &self.keys, key).await?;
        let current = scard(&mut conn, &self.keys.prefixed_key(&key.current_key)).await?;
        Ok(QueueCapacity::new(current, limit))
    }

    async fn try_acquire(
        &self,
        key_set: &CapacityKeySet,
        member: &str,
    ) -> Result<AcquireOutcome> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = check_and_acquire(tx.conn()?, &self.keys, key_set, member).await;
        tx.finish(result).await
    }

    async fn release(&self, key_set: &CapacityKeySet, member: &str) -> Result<()> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = match release_members(tx.conn()?, &self.keys, key_set, member).await {
            Ok(missing) if missing.is_empty() => Ok(()),
            Ok(missing) => Err(AppError::AlreadyReleased(format!(
                "member {} is not held at {:?}",
                member, missing
            ))),
            Err(e) => Err(e),
        };
        tx.finish(result).await
    }

    async fn set_limit(&self, limit_key: &str, limit: u32) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut conn = self.acquire().await?;
        kv_set(
            &mut conn,
            &self.keys.prefixed_key(limit_key),
            &limit.to_string(),
            now,
        )
        .await
    }

    async fn remove_limit(&self, limit_key: &str) -> Result<()> {
        let mut conn = self.acquire().await?;
        kv_delete(&mut conn, &self.keys.prefixed_key(limit_key)).await?;
        Ok(())
    }

    async fn get_limit(&self, limit_key: &str) -> Result<Option<u32>> {
        let mut conn = self.acquire().await?;
        let raw = kv_get(&mut conn, &self.keys.prefixed_key(limit_key)).await?;
        Ok(parse_limit(limit_key, raw))
    }

    async fn set_concurrency_disabled(&self, flag_key: &str, disabled: bool) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut conn = self.acquire().await?;
        let key = self.keys.prefixed_key(flag_key);
        if disabled {
            kv_set(&mut conn, &key, FLAG_SET, now).await?;
        } else {
            kv_delete(&mut conn, &key).await?;
        }
        info!(flag_key = %flag_key, disabled = disabled, "Concurrency flag updated");
        Ok(())
    }

    async fn is_concurrency_disabled(&self, flag_key: &str) -> Result<bool> {
        let mut conn = self.acquire().await?;
        let flag = kv_get(&mut conn, &self.keys.prefixed_key(flag_key)).await?;
        Ok(flag.as_deref() == Some(FLAG_SET))
    }

    async fn current_members(&self, current_key: &str) -> Result<Vec<String>> {
        let mut conn = self.acquire().await?;
        smembers(&mut conn, &self.keys.prefixed_key(current_key)).await
    }
}
