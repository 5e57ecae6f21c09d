//! Daemon configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional file named by
//! `RUNQUEUE_CONFIG`, then `RUNQUEUE_*` environment variables. Nested keys use a double
//! underscore, e.g. `RUNQUEUE_RPC__PORT=9700` or `RUNQUEUE_QUEUE__LEASE_MS=60000`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use runqueue_api_rpc::RpcServerConfig;
use runqueue_core::application::worker::constants::{
    DEFAULT_REAPER_BATCH_SIZE, DEFAULT_REAPER_INTERVAL,
};
use runqueue_core::application::{PriorityStrategy, RunQueueOptions, DEFAULT_LEASE_MS};
use runqueue_core::domain::{CapacityDefaults, DEFAULT_KEY_PREFIX};
use runqueue_core::port::MaintenanceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Names the optional configuration file
pub const CONFIG_FILE_ENV: &str = "RUNQUEUE_CONFIG";
const ENV_PREFIX: &str = "RUNQUEUE";
const DATABASE_FILE: &str = "runqueue.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output with colors
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Weighted,
    OldestFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub strategy: StrategyKind,
    /// Fixed RNG seed for the weighted strategy (reproducible selection)
    pub seed: Option<u64>,
    pub queue_selection_count: u64,
    pub lease_ms: u64,
    pub defaults: CapacityDefaults,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let options = RunQueueOptions::default();
        Self {
            strategy: StrategyKind::Weighted,
            seed: None,
            queue_selection_count: options.queue_selection_count,
            lease_ms: DEFAULT_LEASE_MS,
            defaults: options.capacity_defaults,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperSettings {
    pub interval_ms: u64,
    pub batch_size: u32,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_REAPER_INTERVAL.as_millis() as u64,
            batch_size: DEFAULT_REAPER_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceSettings {
    pub interval_minutes: u64,
    pub released_claim_retention_hours: i64,
    pub max_db_size_mb: f64,
    pub reconcile_concurrency: bool,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        let config = MaintenanceConfig::default();
        Self {
            interval_minutes: 60,
            released_claim_retention_hours: config.released_claim_retention_hours,
            max_db_size_mb: config.max_db_size_mb,
            reconcile_concurrency: config.reconcile_concurrency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub database_url: String,
    pub max_connections: u32,
    pub key_prefix: String,
    pub log_format: LogFormat,
    /// Used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Also write daily-rotated JSON logs here
    pub log_dir: Option<String>,
    pub rpc: RpcServerConfig,
    pub queue: QueueSettings,
    pub reaper: ReaperSettings,
    pub maintenance: MaintenanceSettings,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: runqueue_infra_sqlite::DEFAULT_MAX_CONNECTIONS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            log_format: LogFormat::Pretty,
            log_filter: "runqueue=info".to_string(),
            log_dir: None,
            rpc: RpcServerConfig::default(),
            queue: QueueSettings::default(),
            reaper: ReaperSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

fn default_database_url() -> String {
    match ProjectDirs::from("dev", "runqueue", "runqueue") {
        Some(dirs) => format!("sqlite://{}", dirs.data_dir().join(DATABASE_FILE).display()),
        None => format!("sqlite://{}", DATABASE_FILE),
    }
}

impl DaemonSettings {
    /// Load defaults, the `RUNQUEUE_CONFIG` file and the process environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(file.as_deref(), None)
    }

    /// `env` replaces the process environment when given
    pub fn load_from(file: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&DaemonSettings::default()).context("encoding default settings")?,
        );

        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: DaemonSettings = builder
            .build()
            .context("reading configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(settings)
    }

    pub fn priority_strategy(&self) -> PriorityStrategy {
        match self.queue.strategy {
            StrategyKind::Weighted => PriorityStrategy::weighted(self.queue.seed),
            StrategyKind::OldestFirst => PriorityStrategy::oldest_first(),
        }
    }

    pub fn run_queue_options(&self) -> RunQueueOptions {
        RunQueueOptions {
            queue_selection_count: self.queue.queue_selection_count,
            lease_ms: self.queue.lease_ms,
            capacity_defaults: self.queue.defaults.clone(),
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper.interval_ms.max(1))
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            released_claim_retention_hours: self.maintenance.released_claim_retention_hours,
            max_db_size_mb: self.maintenance.max_db_size_mb,
            reconcile_concurrency: self.maintenance.reconcile_concurrency,
        }
    }

    /// Directory holding the database file; None for in-memory databases
    pub fn database_dir(&self) -> Option<PathBuf> {
        let url = self.database_url.as_str();
        if url.contains(":memory:") || url.contains("mode=memory") {
            return None;
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        let path = path.split('?').next().unwrap_or(path);
        PathBuf::from(path)
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(PathBuf::from)
    }
}
