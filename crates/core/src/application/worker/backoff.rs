// Idle poll backoff with jitter

use rand::Rng;
use std::time::Duration;

use super::constants::{IDLE_JITTER_RATIO, IDLE_SLEEP_DURATION, MAX_IDLE_SLEEP_DURATION};

/// Exponential backoff for consumers that poll an empty or saturated queue.
///
/// Doubles from `min` to `max` on every empty poll, resets on a claim. Each sleep is
/// jittered so idle consumers do not poll in lockstep.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(IDLE_SLEEP_DURATION, MAX_IDLE_SLEEP_DURATION)
    }
}

impl PollBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay before the next poll after an empty one
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        jitter(base)
    }

    /// A message was claimed: poll again at the minimum rate
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

fn jitter(base: Duration) -> Duration {
    let spread = (1.0 - IDLE_JITTER_RATIO)..=(1.0 + IDLE_JITTER_RATIO);
    base.mul_f64(rand::thread_rng().gen_range(spread))
}
