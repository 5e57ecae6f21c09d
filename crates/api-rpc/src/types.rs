//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results. Queue types from the core crate
//! (`ClaimedMessage`, `NackOutcome`, `ConcurrencyOverview`) travel as-is.

use runqueue_core::application::ConcurrencyOverview;
use runqueue_core::domain::{
    AbortReason, AuthenticatedEnvironment, ClaimedMessage, NackOptions, NackOutcome,
};
use serde::{Deserialize, Serialize};

/// queue.enqueue.v1 - Place a message on its lane
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub environment: AuthenticatedEnvironment,
    /// Raw `MessagePayload`; validated server-side
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub run_id: String,
    pub queue_key: String,
}

/// queue.dequeue.v1 - Claim the next message
///
/// Exactly one of `parent_queue` or `environment` selects where to poll.
#[derive(Debug, Deserialize)]
pub struct DequeueRequest {
    pub consumer_id: String,
    #[serde(default)]
    pub parent_queue: Option<String>,
    #[serde(default)]
    pub environment: Option<AuthenticatedEnvironment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DequeueResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ClaimedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
}

/// queue.ack.v1 - Acknowledge a claim
#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub claim_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    pub claim_token: String,
    pub run_id: String,
    pub acknowledged: bool,
}

/// queue.nack.v1 - Negatively acknowledge a claim
#[derive(Debug, Deserialize)]
pub struct NackRequest {
    pub claim_token: String,
    #[serde(default)]
    pub options: NackOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct NackResponse {
    pub claim_token: String,
    pub outcome: NackOutcome,
}

/// queue.heartbeat.v1 - Extend a claim's lease
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub claim_token: String,
    #[serde(default)]
    pub extend_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub claim_token: String,
    pub lease_expires_at: i64,
}

/// Hierarchy level addressed by admin.limits.v1
#[derive(Debug, Clone, Deserialize)]
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

impl LimitTarget {
    pub fn scope(&self) -> &'static str {
        match self {
            LimitTarget::Queue { .. } => "queue",
            LimitTarget::Environment { .. } => "environment",
            LimitTarget::Project { .. } => "project",
            LimitTarget::Task { .. } => "task",
            LimitTarget::Organization { .. } => "organization",
        }
    }
}

/// admin.limits.v1 - Set or remove a concurrency limit, or toggle an organization
///
/// `limit: null` removes a queue limit (the queue then follows its environment);
/// `disabled` is only accepted for the organization scope.
#[derive(Debug, Deserialize)]
pub struct LimitsRequest {
    pub target: LimitTarget,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub disabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitsResponse {
    pub scope: String,
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

/// admin.concurrency.v1 - Concurrency overview of one environment
#[derive(Debug, Deserialize)]
pub struct ConcurrencyRequest {
    pub environment: AuthenticatedEnvironment,
}

pub type ConcurrencyResponse = ConcurrencyOverview;

/// admin.stats.v1 - Get store statistics
#[derive(Debug, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub pending_messages: i64,
    pub live_claims: i64,
    pub released_claims: i64,
    pub parent_queue_count: i64,
    pub running_lane_count: i64,
    pub db_size_bytes: i64,
    pub uptime_seconds: i64,
}

/// admin.maintenance.v1 - Run manual maintenance
#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub force_vacuum: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceResponse {
    pub vacuum_run: bool,
    pub claims_deleted: i64,
    pub members_reconciled: i64,
    pub db_size_before: i64,
    pub db_size_after: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_json() -> serde_json::Value {
        json!({"id": "e1", "type": "PRODUCTION", "organizationId": "o1", "projectId": "p1"})
    }

    #[test]
    fn test_limits_request_scopes() {
        let req: LimitsRequest = serde_json::from_value(json!({
            "target": {"scope": "queue", "environment": env_json(), "queue": "emails"},
            "limit": 3
        }))
        .unwrap();
        assert_eq!(req.target.scope(), "queue");
        assert_eq!(req.limit, Some(3));

        let req: LimitsRequest = serde_json::from_value(json!({
            "target": {"scope": "organization", "org_id": "o1"},
            "disabled": true
        }))
        .unwrap();
        assert!(matches!(req.target, LimitTarget::Organization { ref org_id } if org_id == "o1"));
        assert_eq!(req.disabled, Some(true));
    }

    #[test]
    fn test_nack_request_defaults_to_immediate_retry() {
        let req: NackRequest = serde_json::from_value(json!({"claim_token": "t1"})).unwrap();
        assert_eq!(req.options, NackOptions::Retry { delay_ms: 0 });

        let req: NackRequest = serde_json::from_value(json!({
            "claim_token": "t1",
            "options": {"action": "abandon"}
        }))
        .unwrap();
        assert_eq!(req.options, NackOptions::Abandon);
    }

    #[test]
    fn test_dequeue_response_omits_empty_fields() {
        let response = DequeueResponse {
            message: None,
            abort_reason: Some(AbortReason::NoCapacity),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"abort_reason": "no_capacity"})
        );
    }
}
