// Queue Capacity Tracker Port

use crate::domain::{AcquireOutcome, CapacityKey, CapacityKeySet, QueueCapacity};
use crate::error::Result;
use async_trait::async_trait;

/// Atomic read/adjust of current-vs-limit concurrency at each hierarchy level.
///
/// Current concurrency is a set of member ids per level, so it never goes negative and
/// a second release of the same member is detected.
#[async_trait]
pub trait CapacityTracker: Send + Sync {
    /// Advisory snapshot; only used for scoring
    async fn peek(&self, key: &CapacityKey) -> Result<QueueCapacity>;

    /// Check `current < limit` at every level and, if all pass, add `member` to every
    /// level in the same transaction
    async fn try_acquire(&self, key_set: &CapacityKeySet, member: &str)
        -> Result<AcquireOutcome>;

    /// Remove `member` from every level; `AlreadyReleased` if any level does not hold it
    async fn release(&self, key_set: &CapacityKeySet, member: &str) -> Result<()>;

    async fn set_limit(&self, limit_key: &str, limit: u32) -> Result<()>;

    async fn remove_limit(&self, limit_key: &str) -> Result<()>;

    async fn get_limit(&self, limit_key: &str) -> Result<Option<u32>>;

    async fn set_concurrency_disabled(&self, flag_key: &str, disabled: bool) -> Result<()>;

    async fn is_concurrency_disabled(&self, flag_key: &str) -> Result<bool>;

    /// Members currently held at one level
    async fn current_members(&self, current_key: &str) -> Result<Vec<String>>;
}
