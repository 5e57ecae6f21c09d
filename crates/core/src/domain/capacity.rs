// Concurrency capacity model

use serde::{Deserialize, Serialize};

use super::error::Result;
use super::keys::RunQueueKeyProducer;

/// Default environment concurrency limit when none is configured
pub const DEFAULT_ENV_CONCURRENCY_LIMIT: u32 = 10;

/// Hierarchy level a capacity key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityLevel {
    Queue,
    Environment,
    Project,
    TaskIdentifier,
    Organization,
}

impl std::fmt::Display for CapacityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityLevel::Queue => write!(f, "queue"),
            CapacityLevel::Environment => write!(f, "environment"),
            CapacityLevel::Project => write!(f, "project"),
            CapacityLevel::TaskIdentifier => write!(f, "task_identifier"),
            CapacityLevel::Organization => write!(f, "organization"),
        }
    }
}

/// Snapshot of one level: `current` claimed members against `limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCapacity {
    pub current: u32,
    pub limit: u32,
}

impl QueueCapacity {
    pub fn new(current: u32, limit: u32) -> Self {
        Self { current, limit }
    }

    /// Admission rule: `current + 1 <= limit`
    pub fn has_headroom(&self) -> bool {
        self.current < self.limit
    }

    pub fn headroom(&self) -> u32 {
        self.limit.saturating_sub(self.current)
    }
}

/// Capacities considered when scoring a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCapacities {
    pub queue: QueueCapacity,
    pub env: QueueCapacity,
}

impl QueueCapacities {
    pub fn can_admit(&self) -> bool {
        self.queue.has_headroom() && self.env.has_headroom()
    }

    pub fn headroom(&self) -> u32 {
        self.queue.headroom().min(self.env.headroom())
    }
}

/// Scored candidate handed to the strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueWithScores {
    /// Lane key
    pub queue: String,
    pub capacities: QueueCapacities,
    /// Milliseconds since the oldest visible message was enqueued
    pub age: u64,
    /// Pending messages in the lane
    pub size: u64,
}

impl QueueWithScores {
    pub fn is_eligible(&self) -> bool {
        self.capacities.can_admit()
    }

    /// Remove the lane from further consideration within one poll
    pub fn mark_exhausted(&mut self) {
        let queue = &mut self.capacities.queue;
        queue.current = queue.current.max(queue.limit);
    }
}

/// Window into the parent index: `count` lanes starting at `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRange {
    pub offset: u64,
    pub count: u64,
}

impl QueueRange {
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    pub fn first(count: u64) -> Self {
        Self { offset: 0, count }
    }

    /// Range for the next poll: a full window advances, a short one wraps to the start
    pub fn advance(&self, window_len: usize) -> Self {
        if self.count > 0 && window_len as u64 >= self.count {
            Self::new(self.offset + self.count, self.count)
        } else {
            Self::first(self.count)
        }
    }
}

/// One hierarchy level inside a capacity key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityKey {
    pub level: CapacityLevel,
    pub current_key: String,
    pub limit_key: String,
    /// Limit consulted when `limit_key` holds no value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_limit_key: Option<String>,
    /// `None` means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<u32>,
}

impl CapacityKey {
    /// Resolve the effective limit from the configured values
    pub fn effective_limit(&self, configured: Option<u32>, fallback: Option<u32>) -> u32 {
        configured
            .or(fallback)
            .or(self.default_limit)
            .unwrap_or(u32::MAX)
    }

    /// Lane level. An unset queue limit follows the environment limit.
    pub fn queue(
        keys: &RunQueueKeyProducer,
        lane: &str,
        defaults: &CapacityDefaults,
    ) -> Result<Self> {
        Ok(Self {
            level: CapacityLevel::Queue,
            current_key: keys.current_concurrency_key_from_queue(lane)?,
            limit_key: keys.concurrency_limit_key_from_queue(lane)?,
            fallback_limit_key: Some(keys.env_concurrency_limit_key_from_queue(lane)?),
            default_limit: Some(defaults.env_limit),
        })
    }

    pub fn environment(
        keys: &RunQueueKeyProducer,
        lane: &str,
        defaults: &CapacityDefaults,
    ) -> Result<Self> {
        Ok(Self {
            level: CapacityLevel::Environment,
            current_key: keys.env_current_concurrency_key_from_queue(lane)?,
            limit_key: keys.env_concurrency_limit_key_from_queue(lane)?,
            fallback_limit_key: None,
            default_limit: Some(defaults.env_limit),
        })
    }

    pub fn project(
        keys: &RunQueueKeyProducer,
        lane: &str,
        defaults: &CapacityDefaults,
    ) -> Result<Self> {
        Ok(Self {
            level: CapacityLevel::Project,
            current_key: keys.project_current_concurrency_key_from_queue(lane)?,
            limit_key: keys.project_concurrency_limit_key_from_queue(lane)?,
            fallback_limit_key: None,
            default_limit: defaults.project_limit,
        })
    }

    pub fn task_identifier(
        keys: &RunQueueKeyProducer,
        lane: &str,
        task_identifier: &str,
        defaults: &CapacityDefaults,
    ) -> Result<Self> {
        Ok(Self {
            level: CapacityLevel::TaskIdentifier,
            current_key: keys
                .task_identifier_current_concurrency_key_from_queue(lane, task_identifier)?,
            limit_key: keys
                .task_identifier_concurrency_limit_key_from_queue(lane, task_identifier)?,
            fallback_limit_key: None,
            default_limit: defaults.task_limit,
        })
    }

    pub fn organization(
        keys: &RunQueueKeyProducer,
        lane: &str,
        defaults: &CapacityDefaults,
    ) -> Result<Self> {
        Ok(Self {
            level: CapacityLevel::Organization,
            current_key: keys.org_current_concurrency_key_from_queue(lane)?,
            limit_key: keys.org_concurrency_limit_key_from_queue(lane)?,
            fallback_limit_key: None,
            default_limit: defaults.org_limit,
        })
    }
}

/// Ordered set of levels checked and acquired together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityKeySet {
    pub keys: Vec<CapacityKey>,
    /// Organization disable flag; set means nothing is admitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_flag_key: Option<String>,
}

impl CapacityKeySet {
    pub fn new(keys: Vec<CapacityKey>) -> Self {
        Self {
            keys,
            disabled_flag_key: None,
        }
    }

    pub fn with_disabled_flag(mut self, key: impl Into<String>) -> Self {
        self.disabled_flag_key = Some(key.into());
        self
    }

    /// Every level a message claimed from `lane` must fit into:
    /// queue lane, environment, project, task identifier, organization
    pub fn for_message(
        keys: &RunQueueKeyProducer,
        lane: &str,
        task_identifier: &str,
        defaults: &CapacityDefaults,
    ) -> Result<Self> {
        Ok(Self::new(vec![
            CapacityKey::queue(keys, lane, defaults)?,
            CapacityKey::environment(keys, lane, defaults)?,
            CapacityKey::project(keys, lane, defaults)?,
            CapacityKey::task_identifier(keys, lane, task_identifier, defaults)?,
            CapacityKey::organization(keys, lane, defaults)?,
        ])
        .with_disabled_flag(keys.disabled_concurrency_limit_key_from_queue(lane)?))
    }

    pub fn level(&self, level: CapacityLevel) -> Option<&CapacityKey> {
        self.keys.iter().find(|k| k.level == level)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapacityKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Limits applied when no explicit limit key is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityDefaults {
    pub env_limit: u32,
    pub project_limit: Option<u32>,
    pub task_limit: Option<u32>,
    pub org_limit: Option<u32>,
}

impl Default for CapacityDefaults {
    fn default() -> Self {
        Self {
            env_limit: DEFAULT_ENV_CONCURRENCY_LIMIT,
            project_limit: None,
            task_limit: None,
            org_limit: None,
        }
    }
}

/// Result of an atomic check-and-acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    Granted,
    /// First level without headroom (or the organization is disabled)
    Denied { level: CapacityLevel },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted)
    }
}
