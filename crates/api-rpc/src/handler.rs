//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{throttled, to_rpc_error, validation};
use crate::rate_limiter::{OrgRateLimiter, RateLimitConfig};
use crate::types::{
    AckRequest, AckResponse, ConcurrencyRequest, ConcurrencyResponse, DequeueRequest,
    DequeueResponse, EnqueueRequest, EnqueueResponse, HeartbeatRequest, HeartbeatResponse,
    LimitTarget, LimitsRequest, LimitsResponse, MaintenanceRequest, MaintenanceResponse,
    NackRequest, NackResponse, StatsRequest, StatsResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use runqueue_core::application::RunQueue;
use runqueue_core::domain::{DequeueResult, MessagePayload};
use runqueue_core::error::AppError;
use runqueue_core::port::{Maintenance, MaintenanceConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    run_queue: Arc<RunQueue>,
    maintenance: Arc<dyn Maintenance>,
    maintenance_config: MaintenanceConfig,
    rate_limiter: Arc<OrgRateLimiter>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(
        run_queue: Arc<RunQueue>,
        maintenance: Arc<dyn Maintenance>,
        maintenance_config: MaintenanceConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            run_queue,
            maintenance,
            maintenance_config,
            rate_limiter: Arc::new(OrgRateLimiter::new(rate_limit)),
            start_time: std::time::Instant::now(),
        }
    }

    /// queue.enqueue.v1
    pub async fn enqueue(
        &self,
        params: EnqueueRequest,
    ) -> Result<EnqueueResponse, ErrorObjectOwned> {
        let env = params.environment;
        env.validate()
            .map_err(|e| to_rpc_error(AppError::Domain(e)))?;

        // Per-organization throttle
        if !self.rate_limiter.check(&env.organization_id) {
            warn!(org_id = %env.organization_id, "Enqueue throttled");
            return Err(throttled(&env.organization_id));
        }

        let payload = MessagePayload::from_json(params.payload)
            .map_err(|e| to_rpc_error(AppError::Domain(e)))?;

        let queue_key = self
            .run_queue
            .enqueue(&env, &payload)
            .await
            .map_err(to_rpc_error)?;

        Ok(EnqueueResponse {
            run_id: payload.run_id,
            queue_key,
        })
    }

    /// queue.dequeue.v1
    pub async fn dequeue(
        &self,
        params: DequeueRequest,
    ) -> Result<DequeueResponse, ErrorObjectOwned> {
        let result = match (params.parent_queue, params.environment) {
            (Some(parent_queue), None) => self
                .run_queue
                .dequeue(&parent_queue, &params.consumer_id)
                .await,
            (None, Some(env)) => {
                env.validate()
                    .map_err(|e| to_rpc_error(AppError::Domain(e)))?;
                self.run_queue
                    .dequeue_from_environment(&env, &params.consumer_id)
                    .await
            }
            _ => {
                return Err(validation(
                    "exactly one of parent_queue or environment is required",
                ))
            }
        }
        .map_err(to_rpc_error)?;

        Ok(match result {
            DequeueResult::Claimed(message) => DequeueResponse {
                message: Some(*message),
                abort_reason: None,
            },
            DequeueResult::Abort(reason) => DequeueResponse {
                message: None,
                abort_reason: Some(reason),
            },
        })
    }

    /// queue.ack.v1
    pub async fn ack(&self, params: AckRequest) -> Result<AckResponse, ErrorObjectOwned> {
        let record = self
            .run_queue
            .acknowledge(&params.claim_token)
            .await
            .map_err(to_rpc_error)?;

        Ok(AckResponse {
            claim_token: params.claim_token,
            run_id: record.message_id,
            acknowledged: true,
        })
    }

    /// queue.nack.v1
    pub async fn nack(&self, params: NackRequest) -> Result<NackResponse, ErrorObjectOwned> {
        let outcome = self
            .run_queue
            .nack(&params.claim_token, params.options)
            .await
            .map_err(to_rpc_error)?;

        Ok(NackResponse {
            claim_token: params.claim_token,
            outcome,
        })
    }

    /// queue.heartbeat.v1
    pub async fn heartbeat(
        &self,
        params: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ErrorObjectOwned> {
        let lease_expires_at = self
            .run_queue
            .heartbeat(&params.claim_token, params.extend_ms)
            .await
            .map_err(to_rpc_error)?;

        Ok(HeartbeatResponse {
            claim_token: params.claim_token,
            lease_expires_at,
        })
    }

    /// admin.limits.v1
    pub async fn limits(&self, params: LimitsRequest) -> Result<LimitsResponse, ErrorObjectOwned> {
        let scope = params.target.scope().to_string();
        let rq = &self.run_queue;

        if params.disabled.is_some() && !matches!(params.target, LimitTarget::Organization { .. })
        {
            return Err(validation("disabled is only supported for the organization scope"));
        }

        let result = match (&params.target, params.limit) {
            (LimitTarget::Queue { environment, queue }, Some(limit)) => {
                rq.update_queue_concurrency_limit(environment, queue, limit)
                    .await
            }
            (LimitTarget::Queue { environment, queue }, None) => {
                rq.remove_queue_concurrency_limit(environment, queue).await
            }
            (LimitTarget::Environment { environment }, Some(limit)) => {
                rq.update_env_concurrency_limit(environment, limit).await
            }
            (LimitTarget::Project { environment }, Some(limit)) => {
                rq.update_project_concurrency_limit(environment, limit)
                    .await
            }
            (
                LimitTarget::Task {
                    environment,
                    task_identifier,
                },
                Some(limit),
            ) => {
                rq.update_task_concurrency_limit(environment, task_identifier, limit)
                    .await
            }
            (LimitTarget::Organization { org_id }, limit) => {
                if limit.is_none() && params.disabled.is_none() {
                    return Err(validation("organization scope needs limit or disabled"));
                }
                if let Some(limit) = limit {
                    rq.update_org_concurrency_limit(org_id, limit)
                        .await
                        .map_err(to_rpc_error)?;
                }
                match params.disabled {
                    Some(disabled) => rq.set_org_concurrency_disabled(org_id, disabled).await,
                    None => Ok(()),
                }
            }
            (_, None) => {
                return Err(validation(format!(
                    "limit is required for the {} scope",
                    scope
                )))
            }
        };
        result.map_err(to_rpc_error)?;

        info!(scope = %scope, limit = ?params.limit, disabled = ?params.disabled,
            "Limits updated via RPC");

        Ok(LimitsResponse {
            scope,
            limit: params.limit,
            disabled: params.disabled,
        })
    }

    /// admin.concurrency.v1
    pub async fn concurrency(
        &self,
        params: ConcurrencyRequest,
    ) -> Result<ConcurrencyResponse, ErrorObjectOwned> {
        self.run_queue
            .concurrency_overview(&params.environment)
            .await
            .map_err(to_rpc_error)
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let stats = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        Ok(StatsResponse {
            pending_messages: stats.pending_messages,
            live_claims: stats.live_claims,
            released_claims: stats.released_claims,
            parent_queue_count: stats.parent_queue_count,
            running_lane_count: stats.running_lane_count,
            db_size_bytes: stats.db_size_bytes,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }

    /// admin.maintenance.v1
    pub async fn maintenance(
        &self,
        params: MaintenanceRequest,
    ) -> Result<MaintenanceResponse, ErrorObjectOwned> {
        let stats_before = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        // Release expired leases before reconciling, so their members are not counted as leaks
        let reaped = self
            .run_queue
            .release_expired_claims(u32::MAX)
            .await
            .map_err(to_rpc_error)?;
        if reaped > 0 {
            info!(released = reaped, "Expired claims released during maintenance");
        }

        let claims_deleted = self
            .maintenance
            .gc_released_claims(self.maintenance_config.released_claim_retention_hours)
            .await
            .map_err(to_rpc_error)?;

        let members_reconciled = if self.maintenance_config.reconcile_concurrency {
            self.maintenance
                .reconcile_concurrency()
                .await
                .map_err(to_rpc_error)?
        } else {
            0
        };

        // Run VACUUM if forced or needed
        let vacuum_run = if params.force_vacuum
            || stats_before.db_size_mb > self.maintenance_config.max_db_size_mb
        {
            self.maintenance.vacuum().await.map_err(to_rpc_error)?;
            true
        } else {
            false
        };

        let stats_after = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        Ok(MaintenanceResponse {
            vacuum_run,
            claims_deleted,
            members_reconciled,
            db_size_before: stats_before.db_size_bytes,
            db_size_after: stats_after.db_size_bytes,
        })
    }
}
