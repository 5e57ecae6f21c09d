//! JSON-RPC Server
//!
//! Serves the queue and admin methods over HTTP (JSON-RPC 2.0).

use crate::handler::RpcHandler;
use crate::rate_limiter::RateLimitConfig;
use crate::types::{
    AckRequest, ConcurrencyRequest, DequeueRequest, EnqueueRequest, HeartbeatRequest,
    LimitsRequest, MaintenanceRequest, NackRequest, StatsRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::{ErrorObjectOwned, Params};
use jsonrpsee::RpcModule;
use runqueue_core::application::RunQueue;
use runqueue_core::port::{Maintenance, MaintenanceConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9640;

/// RPC Server Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub rate_limit: RateLimitConfig,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Decode method params sent either as a named object or as a one-element array
fn parse_request<T: DeserializeOwned>(params: Params<'_>) -> Result<T, ErrorObjectOwned> {
    let value: serde_json::Value = if params.as_str().is_some() {
        params.parse()?
    } else {
        serde_json::Value::Object(Default::default())
    };

    let value = match value {
        serde_json::Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };

    serde_json::from_value(value).map_err(|e| crate::error::validation(e.to_string()))
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        run_queue: Arc<RunQueue>,
        maintenance: Arc<dyn Maintenance>,
        maintenance_config: MaintenanceConfig,
    ) -> Self {
        let handler = Arc::new(RpcHandler::new(
            run_queue,
            maintenance,
            maintenance_config,
            config.rate_limit,
        ));
        Self { config, handler }
    }

    /// Start the JSON-RPC server; returns the bound address and the server handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        // Queue APIs
        let handler = self.handler.clone();
        module
            .register_async_method("queue.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: EnqueueRequest = parse_request(params)?;
                    handler.enqueue(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.dequeue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: DequeueRequest = parse_request(params)?;
                    handler.dequeue(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.ack.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: AckRequest = parse_request(params)?;
                    handler.ack(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.nack.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: NackRequest = parse_request(params)?;
                    handler.nack(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.heartbeat.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: HeartbeatRequest = parse_request(params)?;
                    handler.heartbeat(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Admin APIs
        let handler = self.handler.clone();
        module
            .register_async_method("admin.limits.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: LimitsRequest = parse_request(params)?;
                    handler.limits(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.concurrency.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ConcurrencyRequest = parse_request(params)?;
                    handler.concurrency(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StatsRequest = parse_request(params)?;
                    handler.stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.maintenance.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: MaintenanceRequest = parse_request(params)?;
                    handler.maintenance(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}
