// Worker - In-process consumer loop

mod backoff;
pub mod constants;
mod shutdown;

pub use backoff::PollBackoff;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use async_trait::async_trait;
use constants::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::application::run_queue::RunQueue;
use crate::domain::{ClaimedMessage, DequeueResult, NackOptions};
use crate::error::Result;

/// What the handler wants done with a claimed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerDecision {
    Acknowledge,
    Nack(NackOptions),
}

/// Work executed for every claimed message
#[async_trait]
pub trait ClaimHandler: Send + Sync + 'static {
    async fn handle(&self, message: ClaimedMessage) -> HandlerDecision;
}

/// Where a consumer polls
#[derive(Debug, Clone)]
pub enum ConsumerSource {
    ParentQueue(String),
    Environment(crate::domain::AuthenticatedEnvironment),
}

/// Polls the run queue and hands claims to a [`ClaimHandler`]
pub struct ConsumerLoop {
    consumer_id: String,
    source: ConsumerSource,
    run_queue: Arc<RunQueue>,
    handler: Arc<dyn ClaimHandler>,
}

impl ConsumerLoop {
    pub fn new(
        consumer_id: impl Into<String>,
        source: ConsumerSource,
        run_queue: Arc<RunQueue>,
        handler: Arc<dyn ClaimHandler>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            source,
            run_queue,
            handler,
        }
    }

    /// Run the poll loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(consumer_id = %self.consumer_id, "Consumer started");
        let mut backoff = PollBackoff::default();

        loop {
            if shutdown.is_shutdown() {
                info!(consumer_id = %self.consumer_id, "Consumer shutting down");
                break;
            }
            match self.process_next().await {
                Ok(true) => backoff.reset(),
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(backoff.next_delay()) => {},
                        _ = shutdown.wait() => {
                            info!(consumer_id = %self.consumer_id, "Consumer interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(consumer_id = %self.consumer_id, error = %e, "Consumer error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(consumer_id = %self.consumer_id, "Consumer interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(consumer_id = %self.consumer_id, "Consumer stopped");
        Ok(())
    }

    /// Poll once; returns true when a message was claimed and settled
    pub async fn process_next(&self) -> Result<bool> {
        let result = match &self.source {
            ConsumerSource::ParentQueue(parent) => {
                self.run_queue.dequeue(parent, &self.consumer_id).await?
            }
            ConsumerSource::Environment(env) => {
                self.run_queue
                    .dequeue_from_environment(env, &self.consumer_id)
                    .await?
            }
        };

        let message = match result {
            DequeueResult::Claimed(message) => *message,
            DequeueResult::Abort(_) => return Ok(false),
        };

        let claim_token = message.claim_token.clone();
        let run_id = message.payload.run_id.clone();

        // Handler runs in its own task so a panic cannot take the consumer down
        let handler = Arc::clone(&self.handler);
        let mut handle = tokio::task::spawn(async move { handler.handle(message).await });

        // Keep the lease alive while the handler works
        let every = heartbeat_interval(self.run_queue.options().lease_ms);
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_queue.heartbeat(&claim_token, None).await {
                        warn!(run_id = %run_id, error = %e, "Lease heartbeat failed");
                    }
                }
            }
        };

        let decision = match joined {
            Ok(decision) => decision,
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(run_id = %run_id, "Claim handler panicked: {:?}", join_err);
                } else {
                    error!(run_id = %run_id, "Claim handler cancelled: {:?}", join_err);
                }
                HandlerDecision::Nack(NackOptions::Retry {
                    delay_ms: PANIC_RETRY_DELAY_MS,
                })
            }
        };

        match decision {
            HandlerDecision::Acknowledge => {
                self.run_queue.acknowledge(&claim_token).await?;
            }
            HandlerDecision::Nack(options) => {
                warn!(run_id = %run_id, options = ?options, "Handler rejected message");
                self.run_queue.nack(&claim_token, options).await?;
            }
        }
        Ok(true)
    }
}

/// Heartbeat period for a lease of `lease_ms`: a third of the lease, at least 1ms
fn heartbeat_interval(lease_ms: u64) -> Duration {
    Duration::from_millis((lease_ms / HEARTBEAT_LEASE_DIVISOR).max(1))
}
