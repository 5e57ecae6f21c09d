// Tenant environment descriptor (resolved upstream by the auth layer)

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};
use super::message::validate_component;

/// Environment type of a tenant environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    Development,
    Staging,
    Production,
    Preview,
}

impl std::fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentType::Development => write!(f, "DEVELOPMENT"),
            EnvironmentType::Staging => write!(f, "STAGING"),
            EnvironmentType::Production => write!(f, "PRODUCTION"),
            EnvironmentType::Preview => write!(f, "PREVIEW"),
        }
    }
}

impl std::str::FromStr for EnvironmentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DEVELOPMENT" => Ok(EnvironmentType::Development),
            "STAGING" => Ok(EnvironmentType::Staging),
            "PRODUCTION" => Ok(EnvironmentType::Production),
            "PREVIEW" => Ok(EnvironmentType::Preview),
            other => Err(DomainError::ValidationError(format!(
                "unknown environment type: {}",
                other
            ))),
        }
    }
}

/// Authenticated tenant environment.
///
/// Carries the org/project/env identity that every key of the environment is derived
/// from. It is constructed after authentication and never re-derived by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedEnvironment {
    pub id: String,
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    pub organization_id: String,
    pub project_id: String,
}

impl AuthenticatedEnvironment {
    /// Build a descriptor, rejecting identifiers that cannot be encoded into keys
    pub fn new(
        id: impl Into<String>,
        env_type: EnvironmentType,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self> {
        let env = Self {
            id: id.into(),
            env_type,
            organization_id: organization_id.into(),
            project_id: project_id.into(),
        };
        env.validate()?;
        Ok(env)
    }

    pub fn validate(&self) -> Result<()> {
        validate_component("environment id", &self.id).map_err(DomainError::ValidationError)?;
        validate_component("organization id", &self.organization_id)
            .map_err(DomainError::ValidationError)?;
        validate_component("project id", &self.project_id)
            .map_err(DomainError::ValidationError)?;
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.env_type == EnvironmentType::Development
    }
}
