// Run Queue Engine
//
// Orchestrates enqueue, dequeue, acknowledge and nack against the shared store.
// No lock spans consumers: every state change is one store transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::strategy::{
    PriorityStrategy, QueueChoice, QueueSelectionStrategy, DEFAULT_QUEUE_SELECTION_COUNT,
};
use crate::domain::{
    AbortReason, AuthenticatedEnvironment, CapacityDefaults, CapacityKey, CapacityKeySet,
    CapacityLevel, ClaimRecord, DequeueResult, MessagePayload, NackOptions, NackOutcome,
    QueueCapacities, QueueRange, QueueWithScores, RunQueueKeyProducer,
};
use crate::error::{AppError, Result};
use crate::port::{
    CapacityTracker, ClaimAttempt, ClaimCompletion, ClaimRequest, EnqueueMessage, IdProvider,
    RunQueueStore, ScanCursorStore, StoredMessage, TimeProvider,
};

/// Default claim lease (5 minutes)
pub const DEFAULT_LEASE_MS: u64 = 5 * 60 * 1000;

/// Engine options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunQueueOptions {
    /// Lanes read from the parent index per poll
    pub queue_selection_count: u64,
    /// Lease granted on claim and on heartbeat without an explicit extension
    pub lease_ms: u64,
    pub capacity_defaults: CapacityDefaults,
}

impl Default for RunQueueOptions {
    fn default() -> Self {
        Self {
            queue_selection_count: DEFAULT_QUEUE_SELECTION_COUNT,
            lease_ms: DEFAULT_LEASE_MS,
            capacity_defaults: CapacityDefaults::default(),
        }
    }
}

/// Concurrency of one logical queue (all of its concurrency-key lanes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConcurrency {
    pub queue: String,
    pub queued: u64,
    pub running: u64,
    pub limit: u32,
    /// Age of the oldest pending message in ms
    pub oldest_age_ms: Option<u64>,
}

/// Concurrency picture of one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyOverview {
    pub environment_id: String,
    pub env_current: u32,
    pub env_limit: u32,
    pub org_disabled: bool,
    pub queues: Vec<QueueConcurrency>,
}

/// Multi-tenant fair run queue
pub struct RunQueue {
    keys: RunQueueKeyProducer,
    store: Arc<dyn RunQueueStore>,
    capacity: Arc<dyn CapacityTracker>,
    selection: QueueSelectionStrategy,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    options: RunQueueOptions,
}

impl RunQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keys: RunQueueKeyProducer,
        store: Arc<dyn RunQueueStore>,
        capacity: Arc<dyn CapacityTracker>,
        cursors: Arc<dyn ScanCursorStore>,
        strategy: PriorityStrategy,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        options: RunQueueOptions,
    ) -> Self {
        let selection = QueueSelectionStrategy::new(
            strategy,
            cursors,
            keys.clone(),
            options.queue_selection_count,
        );
        Self {
            keys,
            store,
            capacity,
            selection,
            id_provider,
            time_provider,
            options,
        }
    }

    pub fn keys(&self) -> &RunQueueKeyProducer {
        &self.keys
    }

    pub fn options(&self) -> &RunQueueOptions {
        &self.options
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Validate and place `payload` on its lane; returns the lane key
    pub async fn enqueue(
        &self,
        env: &AuthenticatedEnvironment,
        payload: &MessagePayload,
    ) -> Result<String> {
        payload.validate_for(env)?;

        let lane = self
            .keys
            .queue_key(env, &payload.queue, payload.concurrency_key.as_deref());
        let parent_queue = self.keys.env_shared_queue_key(env);
        let message_key = self.keys.message_key(&env.organization_id, payload.message_id());

        self.store
            .enqueue_message(EnqueueMessage {
                parent_queue: &parent_queue,
                lane: &lane,
                message_key: &message_key,
                payload,
            })
            .await?;

        info!(
            run_id = %payload.run_id,
            queue = %lane,
            parent_queue = %parent_queue,
            timestamp = payload.timestamp,
            "Message enqueued"
        );

        Ok(lane)
    }

    // ------------------------------------------------------------------
    // Dequeue
    // ------------------------------------------------------------------

    /// Claim the next message for `consumer_id` from `parent_queue`
    pub async fn dequeue(&self, parent_queue: &str, consumer_id: &str) -> Result<DequeueResult> {
        let now = self.time_provider.now_millis();

        let mut range = self
            .selection
            .next_candidate_selection(parent_queue, consumer_id)
            .await?;
        let mut window = self.store.candidate_window(parent_queue, range, now).await?;

        // Cursor ran past the population: restart the sweep
        if window.is_empty() && range.offset > 0 {
            range = QueueRange::first(range.count);
            window = self.store.candidate_window(parent_queue, range, now).await?;
        }

        let mut candidates = Vec::with_capacity(window.len());
        for lane in window {
            match self.score_lane(&lane.queue, lane.oldest_score, lane.size, now).await {
                Ok(scored) => candidates.push(scored),
                Err(AppError::Domain(e)) => {
                    warn!(queue = %lane.queue, error = %e, "Skipping undecodable lane");
                }
                Err(e) => return Err(e),
            }
        }

        if candidates.is_empty() {
            // Persist the wrap so the next poll starts at the front
            self.selection
                .choose_queue(&candidates, parent_queue, consumer_id, range)
                .await?;
            return Ok(DequeueResult::Abort(AbortReason::NoCandidates));
        }

        let mut capacity_blocked = candidates.iter().any(|c| !c.is_eligible());

        loop {
            let selection = self
                .selection
                .choose_queue(&candidates, parent_queue, consumer_id, range)
                .await?;

            let lane = match selection.choice {
                QueueChoice::Queue(lane) => lane,
                QueueChoice::Abort => {
                    let reason = if capacity_blocked {
                        AbortReason::NoCapacity
                    } else {
                        AbortReason::NoCandidates
                    };
                    debug!(
                        parent_queue = %parent_queue,
                        consumer_id = %consumer_id,
                        reason = %reason,
                        "Dequeue aborted"
                    );
                    return Ok(DequeueResult::Abort(reason));
                }
            };

            let defaults = &self.options.capacity_defaults;
            let keys = &self.keys;
            let lane_ref = lane.as_str();
            let capacity_keys = move |payload: &MessagePayload| -> Result<CapacityKeySet> {
                Ok(CapacityKeySet::for_message(
                    keys,
                    lane_ref,
                    &payload.task_identifier,
                    defaults,
                )?)
            };

            let attempt = self
                .store
                .claim_next(ClaimRequest {
                    parent_queue,
                    lane: &lane,
                    claim_token: self.id_provider.generate_id(),
                    now,
                    lease_ms: self.options.lease_ms,
                    capacity_keys: &capacity_keys,
                })
                .await?;

            match attempt {
                ClaimAttempt::Claimed(message) => {
                    info!(
                        run_id = %message.payload.run_id,
                        queue = %message.queue_key,
                        consumer_id = %consumer_id,
                        attempt = message.attempt,
                        "Message claimed"
                    );
                    return Ok(DequeueResult::Claimed(message));
                }
                ClaimAttempt::Denied { level } => {
                    debug!(queue = %lane, level = %level, "Claim denied by capacity");
                    capacity_blocked = true;
                }
                ClaimAttempt::Empty => {
                    debug!(queue = %lane, "Lane drained before claim");
                }
            }

            match candidates.iter_mut().find(|c| c.queue == lane) {
                Some(candidate) => candidate.mark_exhausted(),
                None => return Ok(DequeueResult::Abort(AbortReason::NoCandidates)),
            }
        }
    }

    /// Dequeue from the parent queue serving `env`
    pub async fn dequeue_from_environment(
        &self,
        env: &AuthenticatedEnvironment,
        consumer_id: &str,
    ) -> Result<DequeueResult> {
        let parent_queue = self.keys.env_shared_queue_key(env);
        self.dequeue(&parent_queue, consumer_id).await
    }

    async fn score_lane(
        &self,
        lane: &str,
        oldest_score: i64,
        size: u64,
        now: i64,
    ) -> Result<QueueWithScores> {
        let defaults = &self.options.capacity_defaults;
        let queue_key = CapacityKey::queue(&self.keys, lane, defaults)?;
        let env_key = CapacityKey::environment(&self.keys, lane, defaults)?;

        let capacities = QueueCapacities {
            queue: self.capacity.peek(&queue_key).await?,
            env: self.capacity.peek(&env_key).await?,
        };

        Ok(QueueWithScores {
            queue: lane.to_string(),
            capacities,
            age: now.saturating_sub(oldest_score).max(0) as u64,
            size,
        })
    }

    // ------------------------------------------------------------------
    // Claim settlement
    // ------------------------------------------------------------------

    /// Release the claim's capacity and delete the message permanently
    pub async fn acknowledge(&self, claim_token: &str) -> Result<ClaimRecord> {
        let now = self.time_provider.now_millis();
        let record = self
            .store
            .complete_claim(claim_token, ClaimCompletion::Acknowledge, now)
            .await?;

        info!(
            claim_token = %claim_token,
            run_id = %record.message_id,
            queue = %record.queue_key,
            "Message acknowledged"
        );
        Ok(record)
    }

    /// Release the claim; retry re-inserts the message at `now + delay`, abandon deletes it
    pub async fn nack(&self, claim_token: &str, options: NackOptions) -> Result<NackOutcome> {
        let now = self.time_provider.now_millis();

        match options {
            NackOptions::Retry { delay_ms } => {
                let visible_at = now.saturating_add(delay_ms.min(i64::MAX as u64) as i64);
                let record = self
                    .store
                    .complete_claim(claim_token, ClaimCompletion::Retry { visible_at }, now)
                    .await?;

                info!(
                    claim_token = %claim_token,
                    run_id = %record.message_id,
                    queue = %record.queue_key,
                    visible_at = visible_at,
                    "Message requeued after nack"
                );
                Ok(NackOutcome::Requeued {
                    visible_at,
                    attempt: record.attempt + 1,
                })
            }
            NackOptions::Abandon => {
                let record = self
                    .store
                    .complete_claim(claim_token, ClaimCompletion::Abandon, now)
                    .await?;

                warn!(
                    claim_token = %claim_token,
                    run_id = %record.message_id,
                    queue = %record.queue_key,
                    "Message abandoned"
                );
                Ok(NackOutcome::Abandoned)
            }
        }
    }

    /// Extend a live claim's lease; returns the new deadline
    pub async fn heartbeat(&self, claim_token: &str, extend_ms: Option<u64>) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let extend = extend_ms.unwrap_or(self.options.lease_ms);
        let lease_expires_at = now.saturating_add(extend.min(i64::MAX as u64) as i64);

        let record = self.store.extend_claim(claim_token, lease_expires_at).await?;
        debug!(
            claim_token = %claim_token,
            run_id = %record.message_id,
            lease_expires_at = lease_expires_at,
            "Claim lease extended"
        );
        Ok(lease_expires_at)
    }

    pub async fn get_claim(&self, claim_token: &str) -> Result<ClaimRecord> {
        self.store
            .get_claim(claim_token)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("claim {}", claim_token)))
    }

    /// Live claims whose lease has run out
    pub async fn list_expired_claims(&self, limit: u32) -> Result<Vec<ClaimRecord>> {
        let now = self.time_provider.now_millis();
        self.store.list_expired_claims(now, limit).await
    }

    /// Release up to `limit` expired claims and make their messages visible at `now`
    pub async fn release_expired_claims(&self, limit: u32) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let expired = self.store.list_expired_claims(now, limit).await?;
        let mut released = 0;

        for claim in expired {
            match self
                .store
                .complete_claim(
                    &claim.claim_token,
                    ClaimCompletion::Expire { visible_at: now },
                    now,
                )
                .await
            {
                Ok(record) => {
                    warn!(
                        claim_token = %record.claim_token,
                        run_id = %record.message_id,
                        queue = %record.queue_key,
                        lease_expires_at = record.lease_expires_at,
                        "Expired claim released"
                    );
                    released += 1;
                }
                // Settled by its consumer between listing and release
                Err(AppError::AlreadyReleased(_)) | Err(AppError::NotFound(_)) => {
                    debug!(claim_token = %claim.claim_token, "Expired claim already settled");
                }
                Err(AppError::LeaseActive(_)) => {
                    debug!(claim_token = %claim.claim_token, "Claim heartbeated before release");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(released)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn length_of_queue(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
        concurrency_key: Option<&str>,
    ) -> Result<u64> {
        self.store
            .lane_length(&self.keys.queue_key(env, queue, concurrency_key))
            .await
    }

    /// Size of the parent index serving `env`
    pub async fn length_of_env_queue(&self, env: &AuthenticatedEnvironment) -> Result<u64> {
        self.store
            .parent_length(&self.keys.env_shared_queue_key(env))
            .await
    }

    /// Timestamp of the oldest pending message in a lane
    pub async fn oldest_message_in_queue(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
        concurrency_key: Option<&str>,
    ) -> Result<Option<i64>> {
        self.store
            .oldest_score(&self.keys.queue_key(env, queue, concurrency_key))
            .await
    }

    pub async fn current_concurrency_of_queue(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
        concurrency_key: Option<&str>,
    ) -> Result<u32> {
        let key = self.keys.current_concurrency_key(env, queue, concurrency_key);
        Ok(self.capacity.current_members(&key).await?.len() as u32)
    }

    pub async fn current_concurrency_of_environment(
        &self,
        env: &AuthenticatedEnvironment,
    ) -> Result<u32> {
        let key = self.keys.env_current_concurrency_key(env);
        Ok(self.capacity.current_members(&key).await?.len() as u32)
    }

    pub async fn current_concurrency_of_task(
        &self,
        env: &AuthenticatedEnvironment,
        task_identifier: &str,
    ) -> Result<u32> {
        let key = self
            .keys
            .task_identifier_current_concurrency_key(env, task_identifier);
        Ok(self.capacity.current_members(&key).await?.len() as u32)
    }

    pub async fn current_concurrency_of_project(
        &self,
        env: &AuthenticatedEnvironment,
    ) -> Result<u32> {
        let key = self.keys.project_current_concurrency_key(env);
        Ok(self.capacity.current_members(&key).await?.len() as u32)
    }

    pub async fn current_concurrency_of_org(&self, org_id: &str) -> Result<u32> {
        let key = self.keys.org_current_concurrency_key(org_id);
        Ok(self.capacity.current_members(&key).await?.len() as u32)
    }

    pub async fn read_message(
        &self,
        org_id: &str,
        message_id: &str,
    ) -> Result<Option<StoredMessage>> {
        self.store
            .read_message(&self.keys.message_key(org_id, message_id))
            .await
    }

    /// Queued, running and limit per logical queue of `env`
    pub async fn concurrency_overview(
        &self,
        env: &AuthenticatedEnvironment,
    ) -> Result<ConcurrencyOverview> {
        let now = self.time_provider.now_millis();
        let defaults = &self.options.capacity_defaults;
        let lanes = self
            .store
            .lane_summaries(&self.keys.env_queue_key_prefix(env))
            .await?;

        let mut queues: BTreeMap<String, QueueConcurrency> = BTreeMap::new();
        for lane in lanes {
            let descriptor = match self.keys.extract_components_from_queue(&lane.queue) {
                Ok(d) => d,
                Err(e) => {
                    warn!(queue = %lane.queue, error = %e, "Skipping undecodable lane");
                    continue;
                }
            };
            let oldest = self.store.oldest_score(&lane.queue).await?;
            let oldest_age_ms = oldest.map(|score| now.saturating_sub(score).max(0) as u64);

            match queues.get_mut(&descriptor.queue) {
                Some(entry) => {
                    entry.queued += lane.queued;
                    entry.running += lane.running;
                    entry.oldest_age_ms = entry.oldest_age_ms.max(oldest_age_ms);
                }
                None => {
                    let queue_key = CapacityKey::queue(&self.keys, &lane.queue, defaults)?;
                    let limit = self.capacity.peek(&queue_key).await?.limit;
                    queues.insert(
                        descriptor.queue.clone(),
                        QueueConcurrency {
                            queue: descriptor.queue,
                            queued: lane.queued,
                            running: lane.running,
                            limit,
                            oldest_age_ms,
                        },
                    );
                }
            }
        }

        let env_key = CapacityKey {
            level: CapacityLevel::Environment,
            current_key: self.keys.env_current_concurrency_key(env),
            limit_key: self.keys.env_concurrency_limit_key(env),
            fallback_limit_key: None,
            default_limit: Some(defaults.env_limit),
        };
        let env_capacity = self.capacity.peek(&env_key).await?;

        let disabled_key = self.keys.disabled_concurrency_limit_key(&env.organization_id);
        let org_disabled = self.capacity.is_concurrency_disabled(&disabled_key).await?;

        Ok(ConcurrencyOverview {
            environment_id: env.id.clone(),
            env_current: env_capacity.current,
            env_limit: env_capacity.limit,
            org_disabled,
            queues: queues.into_values().collect(),
        })
    }

    // ------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------

    pub async fn update_queue_concurrency_limit(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
        limit: u32,
    ) -> Result<()> {
        let key = self.keys.queue_concurrency_limit_key(env, queue);
        self.capacity.set_limit(&key, limit).await?;
        info!(limit_key = %key, limit = limit, "Queue concurrency limit updated");
        Ok(())
    }

    /// Queue falls back to the environment limit afterwards
    pub async fn remove_queue_concurrency_limit(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
    ) -> Result<()> {
        let key = self.keys.queue_concurrency_limit_key(env, queue);
        self.capacity.remove_limit(&key).await?;
        info!(limit_key = %key, "Queue concurrency limit removed");
        Ok(())
    }

    pub async fn update_env_concurrency_limit(
        &self,
        env: &AuthenticatedEnvironment,
        limit: u32,
    ) -> Result<()> {
        let key = self.keys.env_concurrency_limit_key(env);
        self.capacity.set_limit(&key, limit).await?;
        info!(limit_key = %key, limit = limit, "Environment concurrency limit updated");
        Ok(())
    }

    pub async fn update_project_concurrency_limit(
        &self,
        env: &AuthenticatedEnvironment,
        limit: u32,
    ) -> Result<()> {
        let key = self.keys.project_concurrency_limit_key(env);
        self.capacity.set_limit(&key, limit).await?;
        info!(limit_key = %key, limit = limit, "Project concurrency limit updated");
        Ok(())
    }

    pub async fn update_task_concurrency_limit(
        &self,
        env: &AuthenticatedEnvironment,
        task_identifier: &str,
        limit: u32,
    ) -> Result<()> {
        let key = self
            .keys
            .task_identifier_concurrency_limit_key(env, task_identifier);
        self.capacity.set_limit(&key, limit).await?;
        info!(limit_key = %key, limit = limit, "Task concurrency limit updated");
        Ok(())
    }

    pub async fn update_org_concurrency_limit(&self, org_id: &str, limit: u32) -> Result<()> {
        let key = self.keys.org_concurrency_limit_key(org_id);
        self.capacity.set_limit(&key, limit).await?;
        info!(limit_key = %key, limit = limit, "Organization concurrency limit updated");
        Ok(())
    }

    /// Block (or unblock) every dequeue of the organization
    pub async fn set_org_concurrency_disabled(&self, org_id: &str, disabled: bool) -> Result<()> {
        let key = self.keys.disabled_concurrency_limit_key(org_id);
        self.capacity.set_concurrency_disabled(&key, disabled).await?;
        warn!(org_id = %org_id, disabled = disabled, "Organization concurrency toggled");
        Ok(())
    }
}
