// Application Layer - Use Cases and Business Logic

pub mod maintenance;
pub mod recovery;
pub mod run_queue;
pub mod strategy;
pub mod worker;

// Re-exports
pub use maintenance::MaintenanceScheduler;
pub use recovery::ClaimReaper;
pub use run_queue::{
    ConcurrencyOverview, QueueConcurrency, RunQueue, RunQueueOptions, DEFAULT_LEASE_MS,
};
pub use strategy::{PriorityStrategy, QueueChoice, QueueSelection, QueueSelectionStrategy};
pub use worker::{
    shutdown_channel, ClaimHandler, ConsumerLoop, ConsumerSource, HandlerDecision, PollBackoff,
    ShutdownSender, ShutdownToken,
};
