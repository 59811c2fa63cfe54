use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::broadcaster::DEFAULT_CHANNEL_CAPACITY;
use crate::orchestrator::RetryConfig;
use crate::stage::{DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_TIMEOUT, DEFAULT_WEIGHT};
use crate::worker::{MaintenanceConfig, QueueConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub broadcaster: BroadcasterConfig,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelforge.db")
}

/// Broadcaster configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcasterConfig {
    /// Buffered events per subscriber before it is considered lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// A named, ordered list of stages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub stages: Vec<CommandStageConfig>,
}

/// A stage backed by an external command.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandStageConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Run through `sh -c`.
    pub command: String,
    /// Relative progress weight (1-100).
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub supports_retry: bool,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_true")]
    pub supports_resume: bool,
    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_stage_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_retry_attempts() -> u32 {
    DEFAULT_MAX_RETRY_ATTEMPTS
}

fn default_true() -> bool {
    true
}
