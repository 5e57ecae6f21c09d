// Worker constants (no magic values)
use std::time::Duration;

/// First idle sleep when a poll finds nothing (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Idle sleep ceiling after repeated empty polls (2s)
pub const MAX_IDLE_SLEEP_DURATION: Duration = Duration::from_secs(2);

/// Sleep duration after a store error before polling again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Relative jitter applied to every idle sleep (±10%)
pub const IDLE_JITTER_RATIO: f64 = 0.1;

/// Heartbeats sent per lease period while a handler runs
pub const HEARTBEAT_LEASE_DIVISOR: u64 = 3;

/// Retry delay used when a handler panics (1s)
pub const PANIC_RETRY_DELAY_MS: u64 = 1000;

/// How often the reaper looks for expired claims (5s)
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Expired claims released per reaper pass
pub const DEFAULT_REAPER_BATCH_SIZE: u32 = 100;
