use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_AWAIT_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_POLLING_INTERVAL_MILLIS: u64 = 100;
const DEFAULT_CRON_POLLING_INTERVAL_SECONDS: u64 = 3600;

/// Bounds for waiting on submitted jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    await_timeout_seconds: u64,
    polling_interval_millis: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            await_timeout_seconds: DEFAULT_AWAIT_TIMEOUT_SECONDS,
            polling_interval_millis: DEFAULT_POLLING_INTERVAL_MILLIS,
        }
    }
}

impl JobsConfig {
    #[must_use]
    pub const fn new(await_timeout_seconds: u64, polling_interval_millis: u64) -> Self {
        Self {
            await_timeout_seconds,
            polling_interval_millis,
        }
    }

    /// How long `await_result` blocks before giving up.
    #[must_use]
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_seconds)
    }

    /// How often `await_result` rechecks the store.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_millis.max(1))
    }
}

/// Schedule of a periodic job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CronConfig {
    enabled: bool,
    startup_wait_seconds: u64,
    polling_interval_seconds: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_wait_seconds: 0,
            polling_interval_seconds: DEFAULT_CRON_POLLING_INTERVAL_SECONDS,
        }
    }
}

impl CronConfig {
    #[must_use]
    pub const fn new(enabled: bool, startup_wait_seconds: u64, polling_interval_seconds: u64) -> Self {
        Self {
            enabled,
            startup_wait_seconds,
            polling_interval_seconds,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Delay before the first cycle after startup.
    #[must_use]
    pub fn startup_wait(&self) -> Duration {
        Duration::from_secs(self.startup_wait_seconds)
    }

    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    /// Minimum age of another runner's claim before this runner may claim.
    ///
    /// One second shorter than the polling interval so that a runner waking
    /// slightly early still wins its own next cycle.
    #[must_use]
    pub fn claim_interval(&self) -> Duration {
        self.polling_interval().saturating_sub(Duration::from_secs(1))
    }
}
