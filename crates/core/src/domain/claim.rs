// Claim lifecycle types

use serde::{Deserialize, Serialize};

use super::capacity::CapacityKeySet;
use super::error::DomainError;
use super::message::{MessageId, MessagePayload};

/// Opaque token (UUID v4) identifying one claim
pub type ClaimToken = String;

/// Message handed to a consumer together with its claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedMessage {
    pub payload: MessagePayload,
    /// Lane key the message was popped from
    pub queue_key: String,
    pub claim_token: ClaimToken,
    /// 1 on first delivery, incremented by every retry
    pub attempt: u32,
    pub claimed_at: i64,
    pub lease_expires_at: i64,
}

/// Why a dequeue produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Parent index window holds no lane with visible work
    NoCandidates,
    /// Lanes exist but every one is at a concurrency limit
    NoCapacity,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::NoCandidates => write!(f, "no_candidates"),
            AbortReason::NoCapacity => write!(f, "no_capacity"),
        }
    }
}

/// Outcome of one dequeue poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueResult {
    Claimed(Box<ClaimedMessage>),
    Abort(AbortReason),
}

impl DequeueResult {
    pub fn into_claimed(self) -> Option<ClaimedMessage> {
        match self {
            DequeueResult::Claimed(message) => Some(*message),
            DequeueResult::Abort(_) => None,
        }
    }
}

/// What to do with a negatively acknowledged message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NackOptions {
    /// Re-insert with score `now + delay_ms`
    Retry { delay_ms: u64 },
    /// Drop the message permanently
    Abandon,
}

impl Default for NackOptions {
    fn default() -> Self {
        NackOptions::Retry { delay_ms: 0 }
    }
}

/// Result of a nack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NackOutcome {
    Requeued { visible_at: i64, attempt: u32 },
    Abandoned,
}

/// How a claim ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseKind {
    Acknowledged,
    Retried,
    Abandoned,
    Expired,
}

impl std::fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseKind::Acknowledged => write!(f, "acknowledged"),
            ReleaseKind::Retried => write!(f, "retried"),
            ReleaseKind::Abandoned => write!(f, "abandoned"),
            ReleaseKind::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ReleaseKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acknowledged" => Ok(ReleaseKind::Acknowledged),
            "retried" => Ok(ReleaseKind::Retried),
            "abandoned" => Ok(ReleaseKind::Abandoned),
            "expired" => Ok(ReleaseKind::Expired),
            other => Err(DomainError::ValidationError(format!(
                "unknown release kind: {}",
                other
            ))),
        }
    }
}

/// Stored claim: everything needed to release it later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_token: ClaimToken,
    pub message_id: MessageId,
    pub org_id: String,
    pub queue_key: String,
    pub parent_queue: String,
    pub capacity_keys: CapacityKeySet,
    pub attempt: u32,
    pub claimed_at: i64,
    pub lease_expires_at: i64,
    pub released_at: Option<i64>,
    pub release_kind: Option<ReleaseKind>,
}

impl ClaimRecord {
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        !self.is_released() && self.lease_expires_at <= now
    }
}
