// Run Queue Infrastructure - SQLite Adapter
// Implements: RunQueueStore, CapacityTracker, ScanCursorStore, Maintenance

mod capacity;
mod connection;
mod cursor;
mod error;
mod maintenance_impl;
mod migration;
mod sets;
mod store;
mod transaction;

pub use connection::{create_pool, create_pool_with, BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS};
pub use maintenance_impl::SqliteMaintenance;
pub use migration::{current_schema_version, run_migrations};
pub use store::SqliteRunQueueStore;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
