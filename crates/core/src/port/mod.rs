// Port Layer - Interfaces for external dependencies

pub mod capacity_tracker;
pub mod cursor_store;
pub mod id_provider; // For deterministic testing
pub mod maintenance;
pub mod run_queue_store;
pub mod time_provider;

// Re-exports
pub use capacity_tracker::CapacityTracker;
pub use cursor_store::ScanCursorStore;
pub use id_provider::{IdProvider, SequentialIdProvider, UuidProvider};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceReport, MaintenanceStats};
pub use run_queue_store::{
    CandidateLane, CapacityKeysFor, ClaimAttempt, ClaimCompletion, ClaimRequest, EnqueueMessage,
    LaneSummary, RunQueueStore, StoredMessage,
};
pub use time_provider::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
