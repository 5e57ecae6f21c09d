// Claim recovery: returns messages of crashed or stalled consumers to their lanes
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::application::run_queue::RunQueue;
use crate::application::worker::constants::{DEFAULT_REAPER_BATCH_SIZE, DEFAULT_REAPER_INTERVAL};
use crate::application::worker::ShutdownToken;
use crate::error::Result;

/// Releases claims whose lease expired
///
/// A consumer that stops heartbeating loses its claim: the capacity it held is released
/// and the message becomes visible again at the time of release.
pub struct ClaimReaper {
    run_queue: Arc<RunQueue>,
    interval: Duration,
    batch_size: u32,
}

impl ClaimReaper {
    /// Create a new reaper
    ///
    /// # Arguments
    /// * `run_queue` - Engine whose expired claims are released
    /// * `interval` - Optional sweep interval (default: 5 seconds)
    /// * `batch_size` - Optional claims released per pass (default: 100)
    pub fn new(
        run_queue: Arc<RunQueue>,
        interval: Option<Duration>,
        batch_size: Option<u32>,
    ) -> Self {
        Self {
            run_queue,
            interval: interval.unwrap_or(DEFAULT_REAPER_INTERVAL),
            batch_size: batch_size.unwrap_or(DEFAULT_REAPER_BATCH_SIZE).max(1),
        }
    }

    /// Release every expired claim, one batch at a time
    ///
    /// # Returns
    /// Number of claims released
    pub async fn reap_once(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let released = self
                .run_queue
                .release_expired_claims(self.batch_size)
                .await?;
            total += released;
            if released < self.batch_size as usize {
                break;
            }
        }

        if total > 0 {
            info!(released = total, "Expired claims released");
        }
        Ok(total)
    }

    /// Sweep loop (background task); should be spawned in tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Claim reaper started"
        );

        let mut tick = interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reap_once().await {
                        error!(error = %e, "Claim reaper pass failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Claim reaper stopped");
                    break;
                }
            }
        }
    }
}
