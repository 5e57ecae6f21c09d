//! SDK Request/Response Types
//!
//! Mirrors the JSON-RPC types from the api-rpc crate. Domain values (environments,
//! payloads, claims) are shared with `runqueue-core` so both sides agree on the wire shape.

use runqueue_core::domain::{
    AbortReason, AuthenticatedEnvironment, ClaimedMessage, MessagePayload, NackOptions,
    NackOutcome,
};
use serde::{Deserialize, Serialize};

pub use runqueue_core::application::{ConcurrencyOverview, QueueConcurrency};

/// Request to enqueue a message
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueRequest {
    pub environment: AuthenticatedEnvironment,
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueResponse {
    pub run_id: String,
    pub queue_key: String,
}

/// Request to claim one message; set exactly one of `parent_queue` or `environment`
#[derive(Debug, Clone, Serialize)]
pub struct DequeueRequest {
    pub consumer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<AuthenticatedEnvironment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DequeueResponse {
    #[serde(default)]
    pub message: Option<ClaimedMessage>,
    #[serde(default)]
    pub abort_reason: Option<AbortReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckRequest {
    pub claim_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckResponse {
    pub claim_token: String,
    pub run_id: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NackRequest {
    pub claim_token: String,
    pub options: NackOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NackResponse {
    pub claim_token: String,
    pub outcome: NackOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    pub claim_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extend_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponse {
    pub claim_token: String,
    pub lease_expires_at: i64,
}

/// Hierarchy level addressed by a limits update
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum LimitTarget {
    Queue {
        environment: AuthenticatedEnvironment,
        queue: String,
    },
    Environment {
        environment: AuthenticatedEnvironment,
    },
    Project {
        environment: AuthenticatedEnvironment,
    },
    Task {
        environment: AuthenticatedEnvironment,
        task_identifier: String,
    },
    Organization {
        org_id: String,
    },
}

/// `limit: None` on a queue target removes its limit
#[derive(Debug, Clone, Serialize)]
pub struct LimitsRequest {
    pub target: LimitTarget,
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsResponse {
    pub scope: String,
    pub limit: Option<u32>,
    #[serde(default)]
    pub disabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyRequest {
    pub environment: AuthenticatedEnvironment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    pub pending_messages: i64,
    pub live_claims: i64,
    pub released_claims: i64,
    pub parent_queue_count: i64,
    pub running_lane_count: i64,
    pub db_size_bytes: i64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceRequest {
    pub force_vacuum: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceResponse {
    pub vacuum_run: bool,
    pub claims_deleted: i64,
    pub members_reconciled: i64,
    pub db_size_before: i64,
    pub db_size_after: i64,
}
