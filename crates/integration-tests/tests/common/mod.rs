//! Shared fixtures: a RunQueue over SQLite with a manual clock

#![allow(dead_code)]

use std::sync::Arc;

use runqueue_core::application::{PriorityStrategy, RunQueue, RunQueueOptions};
use runqueue_core::domain::{
    AuthenticatedEnvironment, ClaimedMessage, DequeueResult, EnvironmentType, MessagePayload,
    RunQueueKeyProducer,
};
use runqueue_core::port::{Maintenance, ManualTimeProvider, SequentialIdProvider};
use runqueue_infra_sqlite::{
    create_pool_with, run_migrations, SqliteMaintenance, SqliteRunQueueStore,
};

pub const START_MS: i64 = 1_700_000_000_000;
pub const TASK: &str = "send-email";

pub struct Harness {
    pub run_queue: Arc<RunQueue>,
    pub store: Arc<SqliteRunQueueStore>,
    pub maintenance: Arc<dyn Maintenance>,
    pub clock: Arc<ManualTimeProvider>,
    pub keys: RunQueueKeyProducer,
}

/// In-memory database, seeded weighted strategy, default options
pub async fn harness() -> Harness {
    harness_with(PriorityStrategy::weighted(Some(7)), RunQueueOptions::default()).await
}

pub async fn harness_with(strategy: PriorityStrategy, options: RunQueueOptions) -> Harness {
    harness_at("sqlite::memory:", 1, strategy, options).await
}

pub async fn harness_at(
    database_url: &str,
    max_connections: u32,
    strategy: PriorityStrategy,
    options: RunQueueOptions,
) -> Harness {
    let pool = create_pool_with(database_url, max_connections).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let keys = RunQueueKeyProducer::default();
    let clock = Arc::new(ManualTimeProvider::new(START_MS));
    let store = Arc::new(SqliteRunQueueStore::new(
        pool.clone(),
        keys.clone(),
        clock.clone(),
    ));
    let run_queue = Arc::new(RunQueue::new(
        keys.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        strategy,
        Arc::new(SequentialIdProvider::new("claim")),
        clock.clone(),
        options,
    ));
    let maintenance = Arc::new(SqliteMaintenance::new(pool, keys.clone(), clock.clone()));

    Harness {
        run_queue,
        store,
        maintenance,
        clock,
        keys,
    }
}

/// Temp-file database URL plus the paths to remove afterwards
pub fn temp_database(name: &str) -> (String, Vec<std::path::PathBuf>) {
    let path = std::env::temp_dir().join(format!("runqueue-{}-{}.db", name, uuid::Uuid::new_v4()));
    let cleanup = vec![
        path.clone(),
        path.with_extension("db-wal"),
        path.with_extension("db-shm"),
    ];
    (format!("sqlite://{}", path.display()), cleanup)
}

pub fn env(id: &str, org: &str) -> AuthenticatedEnvironment {
    AuthenticatedEnvironment::new(id, EnvironmentType::Production, org, format!("proj_{}", org))
        .unwrap()
}

pub fn dev_env(id: &str, org: &str) -> AuthenticatedEnvironment {
    AuthenticatedEnvironment::new(id, EnvironmentType::Development, org, format!("proj_{}", org))
        .unwrap()
}

pub fn message(
    env: &AuthenticatedEnvironment,
    run_id: &str,
    queue: &str,
    timestamp: i64,
) -> MessagePayload {
    MessagePayload::new(run_id, TASK, env, queue, timestamp)
}

impl Harness {
    /// Enqueue `run_id` on `queue`, timestamped `age_ms` before the current clock
    pub async fn enqueue(
        &self,
        env: &AuthenticatedEnvironment,
        run_id: &str,
        queue: &str,
        age_ms: i64,
    ) -> String {
        let payload = message(env, run_id, queue, self.now() - age_ms);
        self.run_queue.enqueue(env, &payload).await.unwrap()
    }

    pub fn now(&self) -> i64 {
        use runqueue_core::port::TimeProvider;
        self.clock.now_millis()
    }

    /// Poll the shared parent queue
    pub async fn poll(&self, consumer_id: &str) -> DequeueResult {
        self.run_queue
            .dequeue(&self.keys.shared_queue_key(), consumer_id)
            .await
            .unwrap()
    }

    /// Poll the shared parent queue and expect a claim
    pub async fn claim(&self, consumer_id: &str) -> ClaimedMessage {
        match self.poll(consumer_id).await {
            DequeueResult::Claimed(message) => *message,
            DequeueResult::Abort(reason) => panic!("expected a claim, got abort: {}", reason),
        }
    }
}
