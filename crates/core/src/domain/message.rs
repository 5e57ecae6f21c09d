// Message Payload Model

use serde::{Deserialize, Serialize};

use super::environment::{AuthenticatedEnvironment, EnvironmentType};
use super::error::{DomainError, Result};

/// Only payload version currently understood by the queue
pub const PAYLOAD_VERSION: &str = "1";

/// Upper bound for every identifier encoded into a key
pub const MAX_COMPONENT_LEN: usize = 256;

/// Characters that would break key encoding or glob scans
const RESERVED_CHARS: [char; 5] = [':', '*', '?', '[', ']'];

/// Message ID (the run id)
pub type MessageId = String;

/// Versioned unit of work placed on a queue lane.
///
/// Wire field names are camelCase so payloads written by other producers decode as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub version: String,
    pub run_id: MessageId,
    pub task_identifier: String,
    pub org_id: String,
    pub project_id: String,
    pub environment_id: String,
    pub environment_type: EnvironmentType,
    /// Logical queue name (not the encoded lane key)
    pub queue: String,
    /// Enqueue time in epoch ms
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_key: Option<String>,
}

impl MessagePayload {
    /// Create a version 1 payload addressed to `queue` inside `env`
    pub fn new(
        run_id: impl Into<String>,
        task_identifier: impl Into<String>,
        env: &AuthenticatedEnvironment,
        queue: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            version: PAYLOAD_VERSION.to_string(),
            run_id: run_id.into(),
            task_identifier: task_identifier.into(),
            org_id: env.organization_id.clone(),
            project_id: env.project_id.clone(),
            environment_id: env.id.clone(),
            environment_type: env.env_type,
            queue: queue.into(),
            timestamp,
            concurrency_key: None,
        }
    }

    pub fn with_concurrency_key(mut self, concurrency_key: impl Into<String>) -> Self {
        self.concurrency_key = Some(concurrency_key.into());
        self
    }

    /// Decode and validate an untyped payload
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let payload: MessagePayload = serde_json::from_value(value)
            .map_err(|e| DomainError::InvalidPayload(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Decode and validate a serialized payload
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let payload: MessagePayload =
            serde_json::from_str(raw).map_err(|e| DomainError::InvalidPayload(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn message_id(&self) -> &str {
        &self.run_id
    }

    /// Check the structural rules of the payload
    pub fn validate(&self) -> Result<()> {
        if self.version != PAYLOAD_VERSION {
            return Err(DomainError::InvalidPayload(format!(
                "unsupported version '{}' (expected '{}')",
                self.version, PAYLOAD_VERSION
            )));
        }

        let components = [
            ("runId", self.run_id.as_str()),
            ("taskIdentifier", self.task_identifier.as_str()),
            ("orgId", self.org_id.as_str()),
            ("projectId", self.project_id.as_str()),
            ("environmentId", self.environment_id.as_str()),
            ("queue", self.queue.as_str()),
        ];
        for (name, value) in components {
            validate_component(name, value).map_err(DomainError::InvalidPayload)?;
        }

        if let Some(concurrency_key) = &self.concurrency_key {
            validate_component("concurrencyKey", concurrency_key)
                .map_err(DomainError::InvalidPayload)?;
        }

        if self.timestamp < 0 {
            return Err(DomainError::InvalidPayload(format!(
                "timestamp must be non-negative, got {}",
                self.timestamp
            )));
        }

        Ok(())
    }

    /// Validate and check that the payload belongs to `env`
    pub fn validate_for(&self, env: &AuthenticatedEnvironment) -> Result<()> {
        self.validate()?;

        if self.org_id != env.organization_id
            || self.project_id != env.project_id
            || self.environment_id != env.id
        {
            return Err(DomainError::InvalidPayload(format!(
                "payload for {}/{}/{} does not belong to environment {}/{}/{}",
                self.org_id,
                self.project_id,
                self.environment_id,
                env.organization_id,
                env.project_id,
                env.id
            )));
        }

        if self.environment_type != env.env_type {
            return Err(DomainError::InvalidPayload(format!(
                "environment type mismatch: payload {} vs environment {}",
                self.environment_type, env.env_type
            )));
        }

        Ok(())
    }
}

/// Validate a single identifier that will be embedded in a key
pub(crate) fn validate_component(name: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} cannot be empty", name));
    }
    if value.len() > MAX_COMPONENT_LEN {
        return Err(format!(
            "{} too long ({} > {} bytes)",
            name,
            value.len(),
            MAX_COMPONENT_LEN
        ));
    }
    if let Some(c) = value
        .chars()
        .find(|c| RESERVED_CHARS.contains(c) || c.is_control())
    {
        return Err(format!("{} contains reserved character {:?}", name, c));
    }
    Ok(())
}
