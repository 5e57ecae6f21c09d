//! Rate Limiter (Token Bucket Algorithm)
//!
//! Throttles inbound enqueues per organization so one tenant's burst cannot flood the
//! shared queue. Each organization gets its own bucket, created on first use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Full buckets are dropped once every this many checks
const PRUNE_EVERY_CHECKS: u64 = 1024;

/// Bucket shape shared by every organization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum burst size
    pub burst: u32,
    /// Tokens added per second
    pub rate_per_sec: u32,
}

impl Default for RateLimitConfig {
    /// 200 burst, 100 enqueues/sec per organization
    fn default() -> Self {
        Self {
            burst: 200,
            rate_per_sec: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.rate_per_sec as f64).min(config.burst as f64);
        self.last_refill = now;
    }

    /// A full bucket behaves exactly like a fresh one
    fn is_full(&self, config: &RateLimitConfig) -> bool {
        self.tokens >= config.burst as f64
    }
}

fn prune_full(buckets: &mut HashMap<String, Bucket>, config: &RateLimitConfig, now: Instant) {
    buckets.retain(|_, bucket| {
        bucket.refill(config, now);
        !bucket.is_full(config)
    });
}

/// Per-key token buckets
pub struct OrgRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
    checks: AtomicU64,
}

impl OrgRateLimiter {
    /// Create a new rate limiter
    ///
    /// # Example
    /// Allow 100 enqueues/sec per organization with a burst of 200:
    /// `OrgRateLimiter::new(RateLimitConfig { burst: 200, rate_per_sec: 100 })`
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Consume one token of `org_id`'s bucket; false if it is empty
    pub fn check(&self, org_id: &str) -> bool {
        self.check_at(org_id, Instant::now())
    }

    pub fn check_at(&self, org_id: &str, now: Instant) -> bool {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY_CHECKS == 0 {
            prune_full(&mut buckets, &self.config, now);
        }

        let bucket = buckets
            .entry(org_id.to_string())
            .or_insert_with(|| Bucket::full(&self.config, now));
        bucket.refill(&self.config, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have refilled to the burst size
    pub fn prune_at(&self, now: Instant) {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        prune_full(&mut buckets, &self.config, now);
    }

    /// Organizations with a bucket in memory
    pub fn tracked(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Remaining whole tokens of `org_id` (full bucket if never seen)
    pub fn remaining(&self, org_id: &str) -> u32 {
        let buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        buckets
            .get(org_id)
            .map(|b| b.tokens.floor() as u32)
            .unwrap_or(self.config.burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_rate_limiter_allows_within_limit() {
        let limiter = OrgRateLimiter::new(RateLimitConfig {
            burst: 10,
            rate_per_sec: 10,
        });
        let now = Instant::now();

        // Should allow 10 requests
        for _ in 0..10 {
            assert!(limiter.check_at("o1", now));
        }

        // 11th should be denied
        assert!(!limiter.check_at("o1", now));
        assert_eq!(limiter.remaining("o1"), 0);
    }

    #[test]
    fn test_rate_limiter_refills() {
        let limiter = OrgRateLimiter::new(RateLimitConfig {
            burst: 5,
            rate_per_sec: 10,
        });
        let start = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_at("o1", start));
        }
        assert!(!limiter.check_at("o1", start));

        // 10 tokens/sec: one token after 100ms
        assert!(limiter.check_at("o1", start + Duration::from_millis(100)));
        assert!(!limiter.check_at("o1", start + Duration::from_millis(100)));

        // Refill is capped at the burst size
        let later = start + Duration::from_secs(10);
        for _ in 0..5 {
            assert!(limiter.check_at("o1", later));
        }
        assert!(!limiter.check_at("o1", later));
    }

    #[test]
    fn test_organizations_are_isolated() {
        let limiter = OrgRateLimiter::new(RateLimitConfig {
            burst: 2,
            rate_per_sec: 1,
        });
        let now = Instant::now();

        assert!(limiter.check_at("noisy", now));
        assert!(limiter.check_at("noisy", now));
        assert!(!limiter.check_at("noisy", now));

        // Another tenant still has its full burst
        assert_eq!(limiter.remaining("quiet"), 2);
        assert!(limiter.check_at("quiet", now));
    }

    #[test]
    fn test_idle_organizations_are_pruned() {
        let config = RateLimitConfig {
            burst: 2,
            rate_per_sec: 10,
        };
        let limiter = OrgRateLimiter::new(config);
        let start = Instant::now();

        assert!(limiter.check_at("o1", start));
        assert!(limiter.check_at("o2", start));
        assert!(limiter.check_at("o2", start));
        assert_eq!(limiter.tracked(), 2);

        // o1 refilled after 100ms, o2 still owes a token
        limiter.prune_at(start + Duration::from_millis(100));
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.remaining("o2"), 1);

        limiter.prune_at(start + Duration::from_secs(1));
        assert_eq!(limiter.tracked(), 0);
        assert_eq!(limiter.remaining("o2"), 2);
    }

    #[test]
    fn test_checks_prune_periodically() {
        let limiter = OrgRateLimiter::new(RateLimitConfig {
            burst: 1,
            rate_per_sec: 1,
        });
        let start = Instant::now();

        for i in 0..PRUNE_EVERY_CHECKS - 1 {
            assert!(limiter.check_at(&format!("org_{}", i), start));
        }
        assert_eq!(limiter.tracked(), (PRUNE_EVERY_CHECKS - 1) as usize);

        // Every bucket has refilled by now; the periodic prune clears them
        assert!(limiter.check_at("late", start + Duration::from_secs(2)));
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_concurrent() {
        let limiter = Arc::new(OrgRateLimiter::new(RateLimitConfig {
            burst: 100,
            rate_per_sec: 1,
        }));

        // Spawn 10 concurrent tasks, each trying 20 requests
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let mut allowed = 0;
                for _ in 0..20 {
                    if limiter.check("o1") {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let mut total_allowed = 0;
        for handle in handles {
            total_allowed += handle.await.unwrap();
        }

        // 200 requests against a burst of 100 (refill is negligible at 1/sec)
        assert!(
            (100..=101).contains(&total_allowed),
            "Expected about 100 allowed, got {}",
            total_allowed
        );
    }
}
