// SQLite Run Queue Store
//
// Lanes and parent indexes live in `sorted_set_members`, current concurrency in
// `set_members`, limits/flags/cursors in `key_values`. Every mutating operation runs inside
// one `BEGIN IMMEDIATE` transaction, which makes it atomic against every other consumer
// sharing the database file.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use runqueue_core::domain::{
    AcquireOutcome, ClaimRecord, ClaimedMessage, MessagePayload, QueueRange, ReleaseKind,
    RunQueueKeyProducer,
};
use runqueue_core::error::{AppError, Result};
use runqueue_core::port::{
    CandidateLane, ClaimAttempt, ClaimCompletion, ClaimRequest, EnqueueMessage, LaneSummary,
    RunQueueStore, StoredMessage, TimeProvider,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::capacity::{check_and_acquire, release_members};
use crate::error::map_sqlx_error;
use crate::sets::{zadd, zcard, zfirst_visible, zmin_score, zrem};
use crate::transaction::ImmediateTransaction;

/// SQLite-backed run queue store, capacity tracker and cursor store
#[derive(Clone)]
pub struct SqliteRunQueueStore {
    pub(crate) pool: SqlitePool,
    pub(crate) keys: RunQueueKeyProducer,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
}

impl SqliteRunQueueStore {
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

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn keys(&self) -> &RunQueueKeyProducer {
        &self.keys
    }

    pub(crate) async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }

    async fn enqueue_in(
        &self,
        conn: &mut SqliteConnection,
        message: &EnqueueMessage<'_>,
    ) -> Result<()> {
        let payload = message.payload;
        let message_key = self.keys.prefixed_key(message.message_key);
        let lane_key = self.keys.prefixed_key(message.lane);
        let parent_key = self.keys.prefixed_key(message.parent_queue);

        let live_claims: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM claims WHERE message_key = ? AND released_at IS NULL",
        )
        .bind(&message_key)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
        if live_claims > 0 {
            return Err(AppError::Conflict(format!(
                "message {} is currently claimed",
                payload.run_id
            )));
        }

        let existing_queue: Option<String> =
            sqlx::query_scalar("SELECT queue FROM messages WHERE message_key = ?")
                .bind(&message_key)
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;
        if let Some(existing_queue) = existing_queue.filter(|q| q != message.lane) {
            let still_pending: Option<i64> = sqlx::query_scalar(
                "SELECT score FROM sorted_set_members WHERE set_key = ? AND member = ?",
            )
            .bind(self.keys.prefixed_key(&existing_queue))
            .bind(&payload.run_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
            if still_pending.is_some() {
                return Err(AppError::Conflict(format!(
                    "message {} is already queued on {}",
                    payload.run_id, existing_queue
                )));
            }
        }

        let body = serde_json::to_string(payload)?;
        sqlx::query(
            r#"
            INSERT INTO messages (message_key, org_id, message_id, queue, payload, attempt, enqueued_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT (message_key) DO UPDATE SET
                queue = excluded.queue,
                payload = excluded.payload,
                enqueued_at = excluded.enqueued_at
            "#,
        )
        .bind(&message_key)
        .bind(&payload.org_id)
        .bind(&payload.run_id)
        .bind(message.lane)
        .bind(&body)
        .bind(payload.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        zadd(conn, &lane_key, &payload.run_id, payload.timestamp).await?;
        rebalance_parent(conn, &parent_key, message.lane, &lane_key).await
    }

    async fn claim_in(
        &self,
        conn: &mut SqliteConnection,
        request: &ClaimRequest<'_>,
    ) -> Result<ClaimAttempt> {
        let lane_key = self.keys.prefixed_key(request.lane);
        let parent_key = self.keys.prefixed_key(request.parent_queue);

        let Some((message_id, _score)) = zfirst_visible(conn, &lane_key, request.now).await?
        else {
            rebalance_parent(conn, &parent_key, request.lane, &lane_key).await?;
            return Ok(ClaimAttempt::Empty);
        };

        let message_key = self.keys.prefixed_key(&format!(
            "{}{}",
            self.keys.message_key_prefix_from_queue(request.lane)?,
            message_id
        ));

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT payload, attempt FROM messages WHERE message_key = ?")
                .bind(&message_key)
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;

        let decoded = row.map(|(body, attempt)| (MessagePayload::from_json_str(&body), attempt));
        let (payload, previous_attempt) = match decoded {
            Some((Ok(payload), attempt)) => (payload, attempt),
            Some((Err(e), _)) => {
                warn!(queue = %request.lane, run_id = %message_id, error = %e,
                    "Dropping undecodable message from lane");
                zrem(conn, &lane_key, &message_id).await?;
                rebalance_parent(conn, &parent_key, request.lane, &lane_key).await?;
                return Ok(ClaimAttempt::Empty);
            }
            None => {
                warn!(queue = %request.lane, run_id = %message_id,
                    "Dropping lane entry without message body");
                zrem(conn, &lane_key, &message_id).await?;
                rebalance_parent(conn, &parent_key, request.lane, &lane_key).await?;
                return Ok(ClaimAttempt::Empty);
            }
        };

        let key_set = (request.capacity_keys)(&payload)?;
        let outcome = check_and_acquire(conn, &self.keys, &key_set, &message_id).await?;
        if let AcquireOutcome::Denied { level } = outcome {
            return Ok(ClaimAttempt::Denied { level });
        }

        zrem(conn, &lane_key, &message_id).await?;
        rebalance_parent(conn, &parent_key, request.lane, &lane_key).await?;

        let attempt = previous_attempt.max(0) + 1;
        sqlx::query("UPDATE messages SET attempt = ? WHERE message_key = ?")
            .bind(attempt)
            .bind(&message_key)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        let lease_expires_at = request
            .now
            .saturating_add(request.lease_ms.min(i64::MAX as u64) as i64);
        sqlx::query(
            r#"
            INSERT INTO claims (
                claim_token, message_key, message_id, org_id, queue, parent_queue,
                capacity_keys, attempt, claimed_at, lease_expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.claim_token)
        .bind(&message_key)
        .bind(&message_id)
        .bind(&payload.org_id)
        .bind(request.lane)
        .bind(request.parent_queue)
        .bind(serde_json::to_string(&key_set)?)
        .bind(attempt)
        .bind(request.now)
        .bind(lease_expires_at)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ClaimAttempt::Claimed(Box::new(ClaimedMessage {
            payload,
            queue_key: request.lane.to_string(),
            claim_token: request.claim_token.clone(),
            attempt: attempt as u32,
            claimed_at: request.now,
            lease_expires_at,
        })))
    }

    async fn complete_in(
        &self,
        conn: &mut SqliteConnection,
        claim_token: &str,
        completion: ClaimCompletion,
        now: i64,
    ) -> Result<ClaimRecord> {
        let mut record = load_live_claim(conn, claim_token).await?;

        // A heartbeat may have landed after the reaper listed this claim
        if matches!(completion, ClaimCompletion::Expire { .. }) && record.lease_expires_at > now {
            return Err(AppError::LeaseActive(format!(
                "claim {} leased until {}",
                claim_token, record.lease_expires_at
            )));
        }

        let missing = release_members(conn, &self.keys, &record.capacity_keys, &record.message_id)
            .await?;
        if !missing.is_empty() {
            warn!(claim_token = %claim_token, run_id = %record.message_id, levels = ?missing,
                "Claim member was missing from some concurrency sets");
        }

        let kind = match completion {
            ClaimCompletion::Acknowledge => ReleaseKind::Acknowledged,
            ClaimCompletion::Retry { .. } => ReleaseKind::Retried,
            ClaimCompletion::Abandon => ReleaseKind::Abandoned,
            ClaimCompletion::Expire { .. } => ReleaseKind::Expired,
        };

        sqlx::query("UPDATE claims SET released_at = ?, release_kind = ? WHERE claim_token = ?")
            .bind(now)
            .bind(kind.to_string())
            .bind(claim_token)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        let message_key = self.keys.prefixed_key(
            &self
                .keys
                .message_key(&record.org_id, &record.message_id),
        );

        match completion {
            ClaimCompletion::Acknowledge | ClaimCompletion::Abandon => {
                sqlx::query("DELETE FROM messages WHERE message_key = ?")
                    .bind(&message_key)
                    .execute(&mut *conn)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            ClaimCompletion::Retry { visible_at } | ClaimCompletion::Expire { visible_at } => {
                let exists: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE message_key = ?")
                        .bind(&message_key)
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(map_sqlx_error)?;
                if exists == 0 {
                    warn!(claim_token = %claim_token, run_id = %record.message_id,
                        "Message body missing, nothing to requeue");
                } else {
                    let lane_key = self.keys.prefixed_key(&record.queue_key);
                    let parent_key = self.keys.prefixed_key(&record.parent_queue);
                    zadd(conn, &lane_key, &record.message_id, visible_at).await?;
                    rebalance_parent(conn, &parent_key, &record.queue_key, &lane_key).await?;
                }
            }
        }

        record.released_at = Some(now);
        record.release_kind = Some(kind);
        Ok(record)
    }
}

/// Keep a lane's parent entry scored by the lane's oldest message, or drop it when the
/// lane is empty
pub(crate) async fn rebalance_parent(
    conn: &mut SqliteConnection,
    parent_key: &str,
    lane: &str,
    lane_key: &str,
) -> Result<()> {
    match zmin_score(conn, lane_key).await? {
        Some(score) => zadd(conn, parent_key, lane, score).await,
        None => {
            zrem(conn, parent_key, lane).await?;
            Ok(())
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimRow {
    claim_token: String,
    message_id: String,
    org_id: String,
    queue: String,
    parent_queue: String,
    capacity_keys: String,
    attempt: i64,
    claimed_at: i64,
    lease_expires_at: i64,
    released_at: Option<i64>,
    release_kind: Option<String>,
}

impl ClaimRow {
    fn into_record(self) -> Result<ClaimRecord> {
        let release_kind = self
            .release_kind
            .map(|kind| kind.parse::<ReleaseKind>())
            .transpose()?;

        Ok(ClaimRecord {
            claim_token: self.claim_token,
            message_id: self.message_id,
            org_id: self.org_id,
            queue_key: self.queue,
            parent_queue: self.parent_queue,
            capacity_keys: serde_json::from_str(&self.capacity_keys)?,
            attempt: self.attempt.max(0) as u32,
            claimed_at: self.claimed_at,
            lease_expires_at: self.lease_expires_at,
            released_at: self.released_at,
            release_kind,
        })
    }
}

const CLAIM_COLUMNS: &str = "claim_token, message_id, org_id, queue, parent_queue, \
     capacity_keys, attempt, claimed_at, lease_expires_at, released_at, release_kind";

async fn find_claim(conn: &mut SqliteConnection, claim_token: &str) -> Result<Option<ClaimRecord>> {
    let row: Option<ClaimRow> = sqlx::query_as(&format!(
        "SELECT {} FROM claims WHERE claim_token = ?",
        CLAIM_COLUMNS
    ))
    .bind(claim_token)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    row.map(ClaimRow::into_record).transpose()
}

/// Claim that exists and has not been released yet
async fn load_live_claim(conn: &mut SqliteConnection, claim_token: &str) -> Result<ClaimRecord> {
    let record = find_claim(conn, claim_token)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("claim {}", claim_token)))?;

    if record.is_released() {
        return Err(AppError::AlreadyReleased(format!(
            "claim {} was already {}",
            claim_token,
            record
                .release_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "released".to_string())
        )));
    }
    Ok(record)
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    message_key: String,
    payload: String,
    queue: String,
    attempt: i64,
    enqueued_at: i64,
}

#[async_trait]
impl RunQueueStore for SqliteRunQueueStore {
    async fn enqueue_message(&self, message: EnqueueMessage<'_>) -> Result<()> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = self.enqueue_in(tx.conn()?, &message).await;
        tx.finish(result).await
    }

    async fn candidate_window(
        &self,
        parent_queue: &str,
        range: QueueRange,
        now: i64,
    ) -> Result<Vec<CandidateLane>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT p.member, p.score,
                   (SELECT COUNT(*) FROM sorted_set_members l WHERE l.set_key = ? || p.member)
            FROM sorted_set_members p
            WHERE p.set_key = ? AND p.score <= ?
            ORDER BY p.score ASC, p.member ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(self.keys.prefix())
        .bind(self.keys.prefixed_key(parent_queue))
        .bind(now)
        .bind(range.count.min(i64::MAX as u64) as i64)
        .bind(range.offset.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(queue, oldest_score, size)| CandidateLane {
                queue,
                oldest_score,
                size: size.max(0) as u64,
            })
            .collect())
    }

    async fn claim_next(&self, request: ClaimRequest<'_>) -> Result<ClaimAttempt> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = self.claim_in(tx.conn()?, &request).await;
        tx.finish(result).await
    }

    async fn get_claim(&self, claim_token: &str) -> Result<Option<ClaimRecord>> {
        let mut conn = self.acquire().await?;
        find_claim(&mut conn, claim_token).await
    }

    async fn complete_claim(
        &self,
        claim_token: &str,
        completion: ClaimCompletion,
        now: i64,
    ) -> Result<ClaimRecord> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = self.complete_in(tx.conn()?, claim_token, completion, now).await;
        tx.finish(result).await
    }

    async fn extend_claim(
        &self,
        claim_token: &str,
        lease_expires_at: i64,
    ) -> Result<ClaimRecord> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;
        let result = async {
            let conn = tx.conn()?;
            let mut record = load_live_claim(conn, claim_token).await?;
            sqlx::query("UPDATE claims SET lease_expires_at = ? WHERE claim_token = ?")
                .bind(lease_expires_at)
                .bind(claim_token)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;
            record.lease_expires_at = lease_expires_at;
            Ok::<_, AppError>(record)
        }
        .await;
        tx.finish(result).await
    }

    async fn list_expired_claims(&self, now: i64, limit: u32) -> Result<Vec<ClaimRecord>> {
        let rows: Vec<ClaimRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM claims
            WHERE released_at IS NULL AND lease_expires_at <= ?
            ORDER BY lease_expires_at ASC, claim_token ASC
            LIMIT ?
            "#,
            CLAIM_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(ClaimRow::into_record).collect()
    }

    async fn lane_length(&self, lane: &str) -> Result<u64> {
        let mut conn = self.acquire().await?;
        zcard(&mut conn, &self.keys.prefixed_key(lane)).await
    }

    async fn parent_length(&self, parent_queue: &str) -> Result<u64> {
        let mut conn = self.acquire().await?;
        zcard(&mut conn, &self.keys.prefixed_key(parent_queue)).await
    }

    async fn oldest_score(&self, lane: &str) -> Result<Option<i64>> {
        let mut conn = self.acquire().await?;
        zmin_score(&mut conn, &self.keys.prefixed_key(lane)).await
    }

    async fn read_message(&self, message_key: &str) -> Result<Option<StoredMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            SELECT message_key, payload, queue, attempt, enqueued_at
            FROM messages WHERE message_key = ?
            "#,
        )
        .bind(self.keys.prefixed_key(message_key))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StoredMessage {
            message_key: self.keys.strip_key_prefix(&row.message_key),
            payload: MessagePayload::from_json_str(&row.payload)?,
            queue: row.queue,
            attempt: row.attempt.max(0) as u32,
            enqueued_at: row.enqueued_at,
        }))
    }

    async fn lane_summaries(&self, lane_prefix: &str) -> Result<Vec<LaneSummary>> {
        let pattern = format!("{}*", self.keys.prefixed_key(lane_prefix));

        let queued: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT set_key, COUNT(*) FROM sorted_set_members
            WHERE set_key GLOB ?
            GROUP BY set_key
            "#,
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let running: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT set_key, COUNT(*) FROM set_members
            WHERE set_key GLOB ?
            GROUP BY set_key
            "#,
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut lanes: BTreeMap<String, LaneSummary> = BTreeMap::new();
        for (set_key, count) in queued {
            let queue = self.keys.strip_key_prefix(&set_key);
            if self.keys.extract_components_from_queue(&queue).is_err() {
                debug!(key = %set_key, "Skipping non-lane sorted set");
                continue;
            }
            lanes
                .entry(queue.clone())
                .or_insert_with(|| LaneSummary {
                    queue,
                    queued: 0,
                    running: 0,
                })
                .queued = count.max(0) as u64;
        }
        for (set_key, count) in running {
            let Some(queue) = self.keys.queue_from_current_concurrency_key(&set_key) else {
                continue;
            };
            lanes
                .entry(queue.clone())
                .or_insert_with(|| LaneSummary {
                    queue,
                    queued: 0,
                    running: 0,
                })
                .running = count.max(0) as u64;
        }

        Ok(lanes.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use runqueue_core::domain::{
        AuthenticatedEnvironment, CapacityDefaults, CapacityKeySet, CapacityLevel, EnvironmentType,
    };
    use runqueue_core::port::{CapacityTracker, ManualTimeProvider};

    struct Fixture {
        store: SqliteRunQueueStore,
        keys: RunQueueKeyProducer,
        env: AuthenticatedEnvironment,
    }

    async fn fixture() -> Fixture {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let keys = RunQueueKeyProducer::default();
        let store = SqliteRunQueueStore::new(
            pool,
            keys.clone(),
            Arc::new(ManualTimeProvider::new(1_000)),
        );
        let env =
            AuthenticatedEnvironment::new("e1", EnvironmentType::Production, "o1", "p1").unwrap();
        Fixture { store, keys, env }
    }

    impl Fixture {
        async fn enqueue(&self, run_id: &str, queue: &str, timestamp: i64) -> String {
            let payload = MessagePayload::new(run_id, "task-a", &self.env, queue, timestamp);
            let lane = self.keys.queue_key(&self.env, queue, None);
            self.store
                .enqueue_message(EnqueueMessage {
                    parent_queue: &self.keys.env_shared_queue_key(&self.env),
                    lane: &lane,
                    message_key: &self.keys.message_key("o1", run_id),
                    payload: &payload,
                })
                .await
                .unwrap();
            lane
        }

        async fn claim(&self, lane: &str, token: &str, now: i64) -> ClaimAttempt {
            let keys = self.keys.clone();
            let lane_owned = lane.to_string();
            let capacity_keys = move |payload: &MessagePayload| -> Result<CapacityKeySet> {
                Ok(CapacityKeySet::for_message(
                    &keys,
                    &lane_owned,
                    &payload.task_identifier,
                    &CapacityDefaults::default(),
                )?)
            };
            self.store
                .claim_next(ClaimRequest {
                    parent_queue: &self.keys.env_shared_queue_key(&self.env),
                    lane,
                    claim_token: token.to_string(),
                    now,
                    lease_ms: 1_000,
                    capacity_keys: &capacity_keys,
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_enqueue_indexes_lane_in_parent() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 500).await;
        f.enqueue("r2", "q", 300).await;

        assert_eq!(f.store.lane_length(&lane).await.unwrap(), 2);
        assert_eq!(f.store.oldest_score(&lane).await.unwrap(), Some(300));
        assert_eq!(f.store.parent_length("sharedQueue").await.unwrap(), 1);

        let window = f
            .store
            .candidate_window("sharedQueue", QueueRange::first(10), 1_000)
            .await
            .unwrap();
        assert_eq!(
            window,
            vec![CandidateLane {
                queue: lane,
                oldest_score: 300,
                size: 2
            }]
        );
    }

    #[tokio::test]
    async fn test_candidate_window_hides_future_lanes_and_pages() {
        let f = fixture().await;
        f.enqueue("r1", "a", 100).await;
        f.enqueue("r2", "b", 200).await;
        f.enqueue("r3", "c", 5_000).await;

        let first = f
            .store
            .candidate_window("sharedQueue", QueueRange::new(0, 1), 1_000)
            .await
            .unwrap();
        let second = f
            .store
            .candidate_window("sharedQueue", QueueRange::new(1, 1), 1_000)
            .await
            .unwrap();
        let third = f
            .store
            .candidate_window("sharedQueue", QueueRange::new(2, 1), 1_000)
            .await
            .unwrap();

        assert_eq!(first[0].queue, f.keys.queue_key(&f.env, "a", None));
        assert_eq!(second[0].queue, f.keys.queue_key(&f.env, "b", None));
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_claim_pops_oldest_and_acquires_capacity() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 200).await;
        f.enqueue("r2", "q", 100).await;

        let ClaimAttempt::Claimed(message) = f.claim(&lane, "t1", 1_000).await else {
            panic!("expected a claim");
        };
        assert_eq!(message.payload.run_id, "r2");
        assert_eq!(message.attempt, 1);
        assert_eq!(message.lease_expires_at, 2_000);

        assert_eq!(f.store.lane_length(&lane).await.unwrap(), 1);
        assert_eq!(f.store.oldest_score(&lane).await.unwrap(), Some(200));
        let env_key = f.keys.env_current_concurrency_key(&f.env);
        assert_eq!(f.store.current_members(&env_key).await.unwrap(), vec!["r2"]);

        let claim = f.store.get_claim("t1").await.unwrap().unwrap();
        assert_eq!(claim.message_id, "r2");
        assert!(!claim.is_released());
    }

    #[tokio::test]
    async fn test_claim_denied_leaves_lane_untouched() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;
        f.store
            .set_limit(&f.keys.env_concurrency_limit_key(&f.env), 0)
            .await
            .unwrap();

        assert_eq!(
            f.claim(&lane, "t1", 1_000).await,
            ClaimAttempt::Denied {
                level: CapacityLevel::Queue
            }
        );
        assert_eq!(f.store.lane_length(&lane).await.unwrap(), 1);
        assert!(f.store.get_claim("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_from_empty_lane_drops_parent_entry() {
        let f = fixture().await;
        let lane = f.keys.queue_key(&f.env, "ghost", None);
        let parent = f.keys.prefixed_key("sharedQueue");
        let mut conn = f.store.acquire().await.unwrap();
        zadd(&mut conn, &parent, &lane, 10).await.unwrap();
        drop(conn);

        assert_eq!(f.claim(&lane, "t1", 1_000).await, ClaimAttempt::Empty);
        assert_eq!(f.store.parent_length("sharedQueue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_claim_retry_and_double_release() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;
        assert!(matches!(
            f.claim(&lane, "t1", 1_000).await,
            ClaimAttempt::Claimed(_)
        ));

        let record = f
            .store
            .complete_claim("t1", ClaimCompletion::Retry { visible_at: 3_000 }, 1_500)
            .await
            .unwrap();
        assert_eq!(record.release_kind, Some(ReleaseKind::Retried));
        assert_eq!(record.released_at, Some(1_500));
        assert_eq!(f.store.oldest_score(&lane).await.unwrap(), Some(3_000));

        // Not visible before the retry delay elapses
        assert_eq!(f.claim(&lane, "t2", 2_000).await, ClaimAttempt::Empty);
        let ClaimAttempt::Claimed(again) = f.claim(&lane, "t3", 3_000).await else {
            panic!("expected a second delivery");
        };
        assert_eq!(again.attempt, 2);

        let err = f
            .store
            .complete_claim("t1", ClaimCompletion::Acknowledge, 3_100)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyReleased(_)));

        let err = f
            .store
            .complete_claim("missing", ClaimCompletion::Acknowledge, 3_100)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expire_skips_claim_heartbeated_after_listing() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;
        assert!(matches!(
            f.claim(&lane, "t1", 1_000).await,
            ClaimAttempt::Claimed(_)
        ));

        // Lease ran out at 2_000; the reaper lists the claim
        let expired = f.store.list_expired_claims(3_000, 10).await.unwrap();
        assert_eq!(expired.len(), 1);

        // The consumer heartbeats before the reaper gets to it
        f.store.extend_claim("t1", 63_000).await.unwrap();

        let err = f
            .store
            .complete_claim("t1", ClaimCompletion::Expire { visible_at: 3_000 }, 3_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LeaseActive(_)), "got {:?}", err);

        // Claim, capacity and lane are untouched
        let record = f.store.get_claim("t1").await.unwrap().unwrap();
        assert!(record.released_at.is_none());
        assert_eq!(record.lease_expires_at, 63_000);
        assert_eq!(f.store.lane_length(&lane).await.unwrap(), 0);
        let env_current = f.keys.env_current_concurrency_key(&f.env);
        assert_eq!(
            f.store.current_members(&env_current).await.unwrap(),
            vec!["r1".to_string()]
        );

        // Once the new lease runs out the claim expires normally
        let record = f
            .store
            .complete_claim("t1", ClaimCompletion::Expire { visible_at: 63_000 }, 63_000)
            .await
            .unwrap();
        assert_eq!(record.release_kind, Some(ReleaseKind::Expired));
        assert_eq!(f.store.lane_length(&lane).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_deletes_message_and_releases_capacity() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;
        f.claim(&lane, "t1", 1_000).await;

        f.store
            .complete_claim("t1", ClaimCompletion::Acknowledge, 1_100)
            .await
            .unwrap();

        let message_key = f.keys.message_key("o1", "r1");
        assert!(f.store.read_message(&message_key).await.unwrap().is_none());
        let env_key = f.keys.env_current_concurrency_key(&f.env);
        assert!(f.store.current_members(&env_key).await.unwrap().is_empty());
        assert_eq!(f.store.parent_length("sharedQueue").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_conflicts() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;

        // Same lane: re-score in place
        f.enqueue("r1", "q", 50).await;
        assert_eq!(f.store.lane_length(&lane).await.unwrap(), 1);
        assert_eq!(f.store.oldest_score(&lane).await.unwrap(), Some(50));

        // Different lane while still pending
        let payload = MessagePayload::new("r1", "task-a", &f.env, "other", 100);
        let err = f
            .store
            .enqueue_message(EnqueueMessage {
                parent_queue: "sharedQueue",
                lane: &f.keys.queue_key(&f.env, "other", None),
                message_key: &f.keys.message_key("o1", "r1"),
                payload: &payload,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Claimed
        f.claim(&lane, "t1", 1_000).await;
        let payload = MessagePayload::new("r1", "task-a", &f.env, "q", 100);
        let err = f
            .store
            .enqueue_message(EnqueueMessage {
                parent_queue: "sharedQueue",
                lane: &lane,
                message_key: &f.keys.message_key("o1", "r1"),
                payload: &payload,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_expired_claims_listing_and_extension() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;
        f.enqueue("r2", "q", 200).await;
        f.claim(&lane, "t1", 1_000).await;
        f.claim(&lane, "t2", 1_000).await;

        f.store.extend_claim("t2", 10_000).await.unwrap();

        let expired = f.store.list_expired_claims(2_000, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].claim_token, "t1");

        let record = f
            .store
            .complete_claim("t1", ClaimCompletion::Expire { visible_at: 2_000 }, 2_000)
            .await
            .unwrap();
        assert_eq!(record.release_kind, Some(ReleaseKind::Expired));
        assert_eq!(f.store.oldest_score(&lane).await.unwrap(), Some(2_000));

        let err = f.store.extend_claim("t1", 20_000).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyReleased(_)));
    }

    #[tokio::test]
    async fn test_lane_summaries() {
        let f = fixture().await;
        let lane_a = f.enqueue("r1", "a", 100).await;
        f.enqueue("r2", "a", 200).await;
        let lane_b = f.enqueue("r3", "b", 100).await;
        f.claim(&lane_b, "t1", 1_000).await;

        let summaries = f
            .store
            .lane_summaries(&f.keys.env_queue_key_prefix(&f.env))
            .await
            .unwrap();
        assert_eq!(
            summaries,
            vec![
                LaneSummary {
                    queue: lane_a,
                    queued: 2,
                    running: 0
                },
                LaneSummary {
                    queue: lane_b,
                    queued: 0,
                    running: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_read_message_strips_prefix() {
        let f = fixture().await;
        let lane = f.enqueue("r1", "q", 100).await;

        let stored = f
            .store
            .read_message(&f.keys.message_key("o1", "r1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.message_key, "org:o1:message:r1");
        assert_eq!(stored.queue, lane);
        assert_eq!(stored.attempt, 0);
        assert_eq!(stored.payload.run_id, "r1");
    }
}
