//! Key Producer
//!
//! Pure mapping from tenant/queue identity to the namespaced keys used for every lane,
//! concurrency set, limit, cursor and scan pattern in the shared store.
//!
//! Lane layout: `org:{org}:proj:{project}:env:{env}:queue:{queue}[:ck:{concurrencyKey}]`.
//! Keys are produced without the namespace prefix; the store prefixes them on write and
//! [`RunQueueKeyProducer::strip_key_prefix`] maps scanned keys back.

use serde::{Deserialize, Serialize};

use super::environment::AuthenticatedEnvironment;
use super::error::{DomainError, Result};

/// Default namespace for every stored key
pub const DEFAULT_KEY_PREFIX: &str = "runqueue:";

const ORG_PART: &str = "org";
const PROJECT_PART: &str = "proj";
const ENV_PART: &str = "env";
const QUEUE_PART: &str = "queue";
const CONCURRENCY_KEY_PART: &str = "ck";
const TASK_PART: &str = "task";
const MESSAGE_PART: &str = "message";
const CURSOR_PART: &str = "cursor";
const CURRENT_CONCURRENCY_PART: &str = "currentConcurrency";
const CONCURRENCY_LIMIT_PART: &str = "concurrency";
const DISABLED_CONCURRENCY_PART: &str = "disabledConcurrency";
const SHARED_QUEUE_PART: &str = "sharedQueue";

/// Components decoded from a lane key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub org_id: String,
    pub project_id: String,
    pub env_id: String,
    pub queue: String,
    pub concurrency_key: Option<String>,
}

/// Deterministic key producer for the run queue
#[derive(Debug, Clone)]
pub struct RunQueueKeyProducer {
    prefix: String,
}

impl Default for RunQueueKeyProducer {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl RunQueueKeyProducer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full storage key for an unprefixed key
    pub fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Remove the namespace prefix (no-op for unprefixed keys)
    pub fn strip_key_prefix(&self, key: &str) -> String {
        key.strip_prefix(self.prefix.as_str())
            .unwrap_or(key)
            .to_string()
    }

    // ------------------------------------------------------------------
    // Lanes
    // ------------------------------------------------------------------

    /// Address of the pending set for one lane
    pub fn queue_key(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
        concurrency_key: Option<&str>,
    ) -> String {
        let base = format!("{}:{}:{}", self.env_section(env), QUEUE_PART, queue);
        match concurrency_key {
            Some(ck) => format!("{}:{}:{}", base, CONCURRENCY_KEY_PART, ck),
            None => base,
        }
    }

    /// Common prefix of every lane inside `env`
    pub fn env_queue_key_prefix(&self, env: &AuthenticatedEnvironment) -> String {
        format!("{}:{}:", self.env_section(env), QUEUE_PART)
    }

    /// Inverse of [`queue_key`](Self::queue_key)
    pub fn extract_components_from_queue(&self, queue: &str) -> Result<QueueDescriptor> {
        let key = self.strip_key_prefix(queue);
        let parts: Vec<&str> = key.split(':').collect();

        let decode_error = |reason: &str| DomainError::KeyDecode {
            key: queue.to_string(),
            reason: reason.to_string(),
        };

        if parts.len() != 8 && parts.len() != 10 {
            return Err(decode_error("unexpected number of segments"));
        }

        let expected_tags = [
            (0, ORG_PART),
            (2, PROJECT_PART),
            (4, ENV_PART),
            (6, QUEUE_PART),
        ];
        for (index, tag) in expected_tags {
            if parts[index] != tag {
                return Err(decode_error(&format!(
                    "expected '{}' at segment {}, found '{}'",
                    tag, index, parts[index]
                )));
            }
        }

        let concurrency_key = if parts.len() == 10 {
            if parts[8] != CONCURRENCY_KEY_PART {
                return Err(decode_error(&format!(
                    "expected '{}' at segment 8, found '{}'",
                    CONCURRENCY_KEY_PART, parts[8]
                )));
            }
            Some(parts[9].to_string())
        } else {
            None
        };

        let values = [parts[1], parts[3], parts[5], parts[7]];
        if values.iter().any(|v| v.is_empty()) || concurrency_key.as_deref() == Some("") {
            return Err(decode_error("empty component"));
        }

        Ok(QueueDescriptor {
            org_id: parts[1].to_string(),
            project_id: parts[3].to_string(),
            env_id: parts[5].to_string(),
            queue: parts[7].to_string(),
            concurrency_key,
        })
    }

    // ------------------------------------------------------------------
    // Queue concurrency
    // ------------------------------------------------------------------

    /// Limit key of a base queue (shared by all of its concurrency-key lanes)
    pub fn queue_concurrency_limit_key(&self, env: &AuthenticatedEnvironment, queue: &str) -> String {
        format!("{}:{}", self.queue_key(env, queue, None), CONCURRENCY_LIMIT_PART)
    }

    pub fn concurrency_limit_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}", base_queue_key(&d), CONCURRENCY_LIMIT_PART))
    }

    pub fn current_concurrency_key(
        &self,
        env: &AuthenticatedEnvironment,
        queue: &str,
        concurrency_key: Option<&str>,
    ) -> String {
        format!(
            "{}:{}",
            self.queue_key(env, queue, concurrency_key),
            CURRENT_CONCURRENCY_PART
        )
    }

    pub fn current_concurrency_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}", lane_key(&d), CURRENT_CONCURRENCY_PART))
    }

    /// Lane key owning a lane current-concurrency set; `None` for other levels
    pub fn queue_from_current_concurrency_key(&self, key: &str) -> Option<String> {
        let key = self.strip_key_prefix(key);
        let suffix = format!(":{}", CURRENT_CONCURRENCY_PART);
        let queue = key.strip_suffix(suffix.as_str())?;
        self.extract_components_from_queue(queue).ok()?;
        Some(queue.to_string())
    }

    /// Organization-wide flag that blocks every dequeue of the organization
    pub fn disabled_concurrency_limit_key(&self, org_id: &str) -> String {
        format!("{}:{}:{}", ORG_PART, org_id, DISABLED_CONCURRENCY_PART)
    }

    pub fn disabled_concurrency_limit_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(self.disabled_concurrency_limit_key(&d.org_id))
    }

    // ------------------------------------------------------------------
    // Environment concurrency
    // ------------------------------------------------------------------

    pub fn env_current_concurrency_key(&self, env: &AuthenticatedEnvironment) -> String {
        format!("{}:{}", self.env_section(env), CURRENT_CONCURRENCY_PART)
    }

    pub fn env_concurrency_limit_key(&self, env: &AuthenticatedEnvironment) -> String {
        format!("{}:{}", self.env_section(env), CONCURRENCY_LIMIT_PART)
    }

    pub fn env_current_concurrency_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}", env_section(&d), CURRENT_CONCURRENCY_PART))
    }

    pub fn env_concurrency_limit_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}", env_section(&d), CONCURRENCY_LIMIT_PART))
    }

    // ------------------------------------------------------------------
    // Task identifier concurrency
    // ------------------------------------------------------------------

    pub fn task_identifier_current_concurrency_key(
        &self,
        env: &AuthenticatedEnvironment,
        task_identifier: &str,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            self.env_section(env),
            TASK_PART,
            task_identifier,
            CURRENT_CONCURRENCY_PART
        )
    }

    pub fn task_identifier_current_concurrency_key_prefix_from_queue(
        &self,
        queue: &str,
    ) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}:", env_section(&d), TASK_PART))
    }

    pub fn task_identifier_current_concurrency_key_from_queue(
        &self,
        queue: &str,
        task_identifier: &str,
    ) -> Result<String> {
        let prefix = self.task_identifier_current_concurrency_key_prefix_from_queue(queue)?;
        Ok(format!(
            "{}{}:{}",
            prefix, task_identifier, CURRENT_CONCURRENCY_PART
        ))
    }

    pub fn task_identifier_concurrency_limit_key(
        &self,
        env: &AuthenticatedEnvironment,
        task_identifier: &str,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            self.env_section(env),
            TASK_PART,
            task_identifier,
            CONCURRENCY_LIMIT_PART
        )
    }

    pub fn task_identifier_concurrency_limit_key_from_queue(
        &self,
        queue: &str,
        task_identifier: &str,
    ) -> Result<String> {
        let prefix = self.task_identifier_current_concurrency_key_prefix_from_queue(queue)?;
        Ok(format!(
            "{}{}:{}",
            prefix, task_identifier, CONCURRENCY_LIMIT_PART
        ))
    }

    // ------------------------------------------------------------------
    // Project concurrency
    // ------------------------------------------------------------------

    pub fn project_current_concurrency_key(&self, env: &AuthenticatedEnvironment) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            ORG_PART, env.organization_id, PROJECT_PART, env.project_id, CURRENT_CONCURRENCY_PART
        )
    }

    pub fn project_current_concurrency_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}", project_section(&d), CURRENT_CONCURRENCY_PART))
    }

    pub fn project_concurrency_limit_key(&self, env: &AuthenticatedEnvironment) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            ORG_PART, env.organization_id, PROJECT_PART, env.project_id, CONCURRENCY_LIMIT_PART
        )
    }

    pub fn project_concurrency_limit_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}", project_section(&d), CONCURRENCY_LIMIT_PART))
    }

    // ------------------------------------------------------------------
    // Organization concurrency
    // ------------------------------------------------------------------

    pub fn org_current_concurrency_key(&self, org_id: &str) -> String {
        format!("{}:{}:{}", ORG_PART, org_id, CURRENT_CONCURRENCY_PART)
    }

    pub fn org_concurrency_limit_key(&self, org_id: &str) -> String {
        format!("{}:{}:{}", ORG_PART, org_id, CONCURRENCY_LIMIT_PART)
    }

    pub fn org_current_concurrency_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(self.org_current_concurrency_key(&d.org_id))
    }

    pub fn org_concurrency_limit_key_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(self.org_concurrency_limit_key(&d.org_id))
    }

    // ------------------------------------------------------------------
    // Parent (shared) queues and scanning
    // ------------------------------------------------------------------

    /// Global parent index of lanes with pending work
    pub fn shared_queue_key(&self) -> String {
        SHARED_QUEUE_PART.to_string()
    }

    /// Parent index serving `env`.
    ///
    /// Development environments are served only by their own consumers, so they get a
    /// dedicated parent queue; all other environments share the global one.
    pub fn env_shared_queue_key(&self, env: &AuthenticatedEnvironment) -> String {
        if env.is_development() {
            format!("{}:{}", self.env_section(env), SHARED_QUEUE_PART)
        } else {
            self.shared_queue_key()
        }
    }

    /// Glob matching every stored parent queue
    pub fn shared_queue_scan_pattern(&self) -> String {
        format!("{}*{}", self.prefix, SHARED_QUEUE_PART)
    }

    /// Glob matching every stored lane current-concurrency set
    pub fn queue_current_concurrency_scan_pattern(&self) -> String {
        format!(
            "{}{}:*:{}:*:{}:*:{}:*:{}",
            self.prefix, ORG_PART, PROJECT_PART, ENV_PART, QUEUE_PART, CURRENT_CONCURRENCY_PART
        )
    }

    /// Glob matching the current-concurrency set of every level
    pub fn current_concurrency_scan_pattern(&self) -> String {
        format!("{}*:{}", self.prefix, CURRENT_CONCURRENCY_PART)
    }

    /// Persisted scan cursor of one consumer over one parent queue
    pub fn scan_cursor_key(&self, parent_queue: &str, consumer_id: &str) -> String {
        format!("{}:{}:{}", parent_queue, CURSOR_PART, consumer_id)
    }

    // ------------------------------------------------------------------
    // Message bodies
    // ------------------------------------------------------------------

    pub fn message_key(&self, org_id: &str, message_id: &str) -> String {
        format!("{}:{}:{}:{}", ORG_PART, org_id, MESSAGE_PART, message_id)
    }

    pub fn message_key_prefix_from_queue(&self, queue: &str) -> Result<String> {
        let d = self.extract_components_from_queue(queue)?;
        Ok(format!("{}:{}:{}:", ORG_PART, d.org_id, MESSAGE_PART))
    }

    fn env_section(&self, env: &AuthenticatedEnvironment) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            ORG_PART, env.organization_id, PROJECT_PART, env.project_id, ENV_PART, env.id
        )
    }
}

fn project_section(d: &QueueDescriptor) -> String {
    format!("{}:{}:{}:{}", ORG_PART, d.org_id, PROJECT_PART, d.project_id)
}

fn env_section(d: &QueueDescriptor) -> String {
    format!("{}:{}:{}", project_section(d), ENV_PART, d.env_id)
}

fn base_queue_key(d: &QueueDescriptor) -> String {
    format!("{}:{}:{}", env_section(d), QUEUE_PART, d.queue)
}

fn lane_key(d: &QueueDescriptor) -> String {
    match &d.concurrency_key {
        Some(ck) => format!("{}:{}:{}", base_queue_key(d), CONCURRENCY_KEY_PART, ck),
        None => base_queue_key(d),
    }
}
