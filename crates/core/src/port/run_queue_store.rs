// Run Queue Store Port - lanes, parent index, message bodies and claims

use crate::domain::{
    CapacityKeySet, CapacityLevel, ClaimRecord, ClaimToken, ClaimedMessage, MessagePayload,
    QueueRange,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message write produced by `enqueue`
#[derive(Debug, Clone)]
pub struct EnqueueMessage<'a> {
    pub parent_queue: &'a str,
    pub lane: &'a str,
    pub message_key: &'a str,
    pub payload: &'a MessagePayload,
}

/// Lane entry read from the parent index window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLane {
    /// Unprefixed lane key
    pub queue: String,
    /// Score of the lane's oldest pending message
    pub oldest_score: i64,
    /// Pending messages in the lane
    pub size: u64,
}

/// Builds the capacity key set for the message being claimed
pub type CapacityKeysFor<'a> =
    &'a (dyn Fn(&MessagePayload) -> Result<CapacityKeySet> + Send + Sync);

/// One combined capacity-check-and-pop request
pub struct ClaimRequest<'a> {
    pub parent_queue: &'a str,
    pub lane: &'a str,
    pub claim_token: ClaimToken,
    pub now: i64,
    pub lease_ms: u64,
    pub capacity_keys: CapacityKeysFor<'a>,
}

/// Outcome of a claim attempt on one lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAttempt {
    Claimed(Box<ClaimedMessage>),
    /// Some level had no headroom; nothing was changed
    Denied { level: CapacityLevel },
    /// No visible message in the lane
    Empty,
}

/// How a claim is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimCompletion {
    Acknowledge,
    Retry { visible_at: i64 },
    Abandon,
    /// Lease ran out; message becomes visible again at `visible_at`
    Expire { visible_at: i64 },
}

/// Stored message body with delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_key: String,
    pub payload: MessagePayload,
    /// Lane the message currently belongs to
    pub queue: String,
    /// Number of deliveries so far
    pub attempt: u32,
    pub enqueued_at: i64,
}

/// Per-lane counts for introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSummary {
    pub queue: String,
    pub queued: u64,
    pub running: u64,
}

/// Shared store holding lanes, the parent index, message bodies and claims.
///
/// Every mutating method is one atomic store transaction.
#[async_trait]
pub trait RunQueueStore: Send + Sync {
    /// Write the body, add it to its lane scored by timestamp and refresh the lane's
    /// parent entry with the lane's oldest score
    async fn enqueue_message(&self, message: EnqueueMessage<'_>) -> Result<()>;

    /// Lanes of `parent_queue` with visible work (`score <= now`), oldest first
    async fn candidate_window(
        &self,
        parent_queue: &str,
        range: QueueRange,
        now: i64,
    ) -> Result<Vec<CandidateLane>>;

    /// Capacity check-and-acquire plus exclusive pop of the oldest visible message
    async fn claim_next(&self, request: ClaimRequest<'_>) -> Result<ClaimAttempt>;

    async fn get_claim(&self, claim_token: &str) -> Result<Option<ClaimRecord>>;

    /// Release the claim's capacity and settle its message.
    ///
    /// Fails with `NotFound` for unknown tokens and `AlreadyReleased` for closed claims.
    /// `Expire` fails with `LeaseActive` when the lease runs past `now`; nothing changes.
    async fn complete_claim(
        &self,
        claim_token: &str,
        completion: ClaimCompletion,
        now: i64,
    ) -> Result<ClaimRecord>;

    /// Move the lease deadline of a live claim
    async fn extend_claim(&self, claim_token: &str, lease_expires_at: i64)
        -> Result<ClaimRecord>;

    /// Live claims whose lease expired at or before `now`, oldest lease first
    async fn list_expired_claims(&self, now: i64, limit: u32) -> Result<Vec<ClaimRecord>>;

    /// Pending messages in one lane (visible or delayed)
    async fn lane_length(&self, lane: &str) -> Result<u64>;

    /// Lanes referenced by one parent index
    async fn parent_length(&self, parent_queue: &str) -> Result<u64>;

    /// Score of the oldest pending message in a lane
    async fn oldest_score(&self, lane: &str) -> Result<Option<i64>>;

    async fn read_message(&self, message_key: &str) -> Result<Option<StoredMessage>>;

    /// Lanes whose key starts with `lane_prefix`, with queued and running counts
    async fn lane_summaries(&self, lane_prefix: &str) -> Result<Vec<LaneSummary>>;
}
