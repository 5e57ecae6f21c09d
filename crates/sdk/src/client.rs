//! Run queue client implementation

use crate::error::{Result, SdkError};
use crate::types::{
    AckRequest, AckResponse, ConcurrencyOverview, ConcurrencyRequest, DequeueRequest,
    DequeueResponse, EnqueueRequest, EnqueueResponse, HeartbeatRequest, HeartbeatResponse,
    LimitTarget, LimitsRequest, LimitsResponse, MaintenanceRequest, MaintenanceResponse,
    NackRequest, NackResponse, StatsResponse,
};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use runqueue_core::domain::{AuthenticatedEnvironment, MessagePayload, NackOptions};
use std::time::Duration;

/// Run queue daemon client
///
/// # Example
///
/// ```no_run
/// use runqueue_sdk::RunQueueClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RunQueueClient::connect("http://127.0.0.1:9640").await?;
/// # Ok(())
/// # }
/// ```
pub struct RunQueueClient {
    client: HttpClient,
}

impl RunQueueClient {
    /// Connect to the daemon
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9640`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();

        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self { client })
    }

    /// Enqueue a message on behalf of `environment`
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use runqueue_sdk::{RunQueueClient, AuthenticatedEnvironment, EnvironmentType, MessagePayload};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = RunQueueClient::connect("http://127.0.0.1:9640").await?;
    /// let env = AuthenticatedEnvironment::new("env_1", EnvironmentType::Production, "org_1", "proj_1")?;
    /// let payload = MessagePayload::new("run_1", "send-email", &env, "emails", 1_700_000_000_000);
    /// let response = client.enqueue(&env, payload).await?;
    /// println!("Queued on {}", response.queue_key);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(
        &self,
        environment: &AuthenticatedEnvironment,
        payload: MessagePayload,
    ) -> Result<EnqueueResponse> {
        let request = EnqueueRequest {
            environment: environment.clone(),
            payload,
        };
        let params = rpc_params![request];
        let response: EnqueueResponse = self.client.request("queue.enqueue.v1", params).await?;

        Ok(response)
    }

    /// Claim one message from a shared parent queue
    pub async fn dequeue(
        &self,
        parent_queue: impl Into<String>,
        consumer_id: impl Into<String>,
    ) -> Result<DequeueResponse> {
        self.dequeue_with(DequeueRequest {
            consumer_id: consumer_id.into(),
            parent_queue: Some(parent_queue.into()),
            environment: None,
        })
        .await
    }

    /// Claim one message from an environment's own parent queue
    pub async fn dequeue_from_environment(
        &self,
        environment: &AuthenticatedEnvironment,
        consumer_id: impl Into<String>,
    ) -> Result<DequeueResponse> {
        self.dequeue_with(DequeueRequest {
            consumer_id: consumer_id.into(),
            parent_queue: None,
            environment: Some(environment.clone()),
        })
        .await
    }

    async fn dequeue_with(&self, request: DequeueRequest) -> Result<DequeueResponse> {
        let params = rpc_params![request];
        let response: DequeueResponse = self.client.request("queue.dequeue.v1", params).await?;

        Ok(response)
    }

    /// Acknowledge a claim (the message is done)
    pub async fn ack(&self, claim_token: impl Into<String>) -> Result<AckResponse> {
        let request = AckRequest {
            claim_token: claim_token.into(),
        };
        let params = rpc_params![request];
        let response: AckResponse = self.client.request("queue.ack.v1", params).await?;

        Ok(response)
    }

    /// Negatively acknowledge a claim (retry later or abandon)
    pub async fn nack(
        &self,
        claim_token: impl Into<String>,
        options: NackOptions,
    ) -> Result<NackResponse> {
        let request = NackRequest {
            claim_token: claim_token.into(),
            options,
        };
        let params = rpc_params![request];
        let response: NackResponse = self.client.request("queue.nack.v1", params).await?;

        Ok(response)
    }

    /// Extend a claim's lease; `extend_ms: None` grants the default lease again
    pub async fn heartbeat(
        &self,
        claim_token: impl Into<String>,
        extend_ms: Option<u64>,
    ) -> Result<HeartbeatResponse> {
        let request = HeartbeatRequest {
            claim_token: claim_token.into(),
            extend_ms,
        };
        let params = rpc_params![request];
        let response: HeartbeatResponse =
            self.client.request("queue.heartbeat.v1", params).await?;

        Ok(response)
    }

    /// Set (or with `None`, remove) a concurrency limit
    pub async fn set_limit(&self, target: LimitTarget, limit: Option<u32>) -> Result<LimitsResponse> {
        self.limits(LimitsRequest {
            target,
            limit,
            disabled: None,
        })
        .await
    }

    /// Stop (or resume) all dequeues for an organization
    pub async fn set_org_disabled(
        &self,
        org_id: impl Into<String>,
        disabled: bool,
    ) -> Result<LimitsResponse> {
        self.limits(LimitsRequest {
            target: LimitTarget::Organization {
                org_id: org_id.into(),
            },
            limit: None,
            disabled: Some(disabled),
        })
        .await
    }

    pub async fn limits(&self, request: LimitsRequest) -> Result<LimitsResponse> {
        let params = rpc_params![request];
        let response: LimitsResponse = self.client.request("admin.limits.v1", params).await?;

        Ok(response)
    }

    /// Running and queued counts per queue of one environment
    pub async fn concurrency(
        &self,
        environment: &AuthenticatedEnvironment,
    ) -> Result<ConcurrencyOverview> {
        let request = ConcurrencyRequest {
            environment: environment.clone(),
        };
        let params = rpc_params![request];
        let response: ConcurrencyOverview =
            self.client.request("admin.concurrency.v1", params).await?;

        Ok(response)
    }

    pub async fn stats(&self) -> Result<StatsResponse> {
        let params = rpc_params![serde_json::json!({})];
        let response: StatsResponse = self.client.request("admin.stats.v1", params).await?;

        Ok(response)
    }

    /// Run a maintenance pass now
    pub async fn maintenance(&self, force_vacuum: bool) -> Result<MaintenanceResponse> {
        let request = MaintenanceRequest { force_vacuum };
        let params = rpc_params![request];
        let response: MaintenanceResponse =
            self.client.request("admin.maintenance.v1", params).await?;

        Ok(response)
    }
}
