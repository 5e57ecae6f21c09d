// Domain Layer - Pure queueing model and key layout

pub mod capacity;
pub mod claim;
pub mod environment;
pub mod error;
pub mod keys;
pub mod message;

// Re-exports
pub use capacity::{
    AcquireOutcome, CapacityDefaults, CapacityKey, CapacityKeySet, CapacityLevel, QueueCapacities,
    QueueCapacity, QueueRange, QueueWithScores, DEFAULT_ENV_CONCURRENCY_LIMIT,
};
pub use claim::{
    AbortReason, ClaimRecord, ClaimToken, ClaimedMessage, DequeueResult, NackOptions, NackOutcome,
    ReleaseKind,
};
pub use environment::{AuthenticatedEnvironment, EnvironmentType};
pub use error::DomainError;
pub use keys::{QueueDescriptor, RunQueueKeyProducer, DEFAULT_KEY_PREFIX};
pub use message::{MessageId, MessagePayload, PAYLOAD_VERSION};
