//! Configuration for background workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent job executions.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often idle workers look for queued jobs (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Maintenance loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between reconciliation passes.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Hours to keep finished jobs. 0 keeps them forever.
    #[serde(default = "default_retention")]
    pub retention_hours: u64,
}

fn default_interval() -> u64 {
    60
}

/// About a century.
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

fn default_retention() -> u64 {
    168 // 7 days
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            retention_hours: default_retention(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Age after which finished jobs are purged, if purging is enabled.
    pub fn retention(&self) -> Option<chrono::Duration> {
        match self.retention_hours {
            0 => None,
            hours => Some(chrono::Duration::hours(hours.min(MAX_RETENTION_HOURS) as i64)),
        }
    }
}
