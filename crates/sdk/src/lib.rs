//! Run Queue SDK - Rust Client Library
//!
//! Client for the run queue daemon's JSON-RPC API.
//!
//! # Example
//!
//! ```no_run
//! use runqueue_sdk::{AuthenticatedEnvironment, EnvironmentType, MessagePayload, RunQueueClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RunQueueClient::connect("http://127.0.0.1:9640").await?;
//!
//!     let env = AuthenticatedEnvironment::new("env_1", EnvironmentType::Production, "org_1", "proj_1")?;
//!     let payload = MessagePayload::new("run_1", "send-email", &env, "emails", 1_700_000_000_000);
//!     client.enqueue(&env, payload).await?;
//!
//!     let response = client.dequeue_from_environment(&env, "consumer-1").await?;
//!     if let Some(message) = response.message {
//!         client.ack(&message.claim_token).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::RunQueueClient;
pub use error::{codes, Result, SdkError};
pub use runqueue_core::domain::{
    AbortReason, AuthenticatedEnvironment, ClaimedMessage, EnvironmentType, MessagePayload,
    NackOptions, NackOutcome,
};
pub use types::{
    AckResponse, ConcurrencyOverview, DequeueResponse, EnqueueResponse, HeartbeatResponse,
    LimitTarget, LimitsRequest, LimitsResponse, MaintenanceResponse, NackResponse,
    QueueConcurrency, StatsResponse,
};
