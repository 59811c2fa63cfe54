//! Core job record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, waiting for a worker.
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Halted on request; resumable.
    Paused,
    /// Finished successfully. The record carries an output path.
    Completed,
    /// Finished with an error. The record carries the last error.
    Failed,
    /// Canceled on request. No error is recorded.
    Canceled,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Canceled,
    ];

    /// Returns true for Completed, Failed and Canceled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Returns true if the job still has work ahead of it.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Stable lowercase name, as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {}", s))
    }
}

/// Stable classification of a failure.
///
/// Cancellation is deliberately absent: a canceled job has no error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or configuration. Retrying cannot help.
    Validation,
    /// Network hiccup, timeout, rate limit.
    Transient,
    /// Quota or capacity exhausted. Retried with a longer backoff.
    ResourceExhausted,
    /// The job was found running without a live execution.
    Orphaned,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Orphaned => "orphaned",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a failure of this kind is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::ResourceExhausted)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "transient" => Ok(ErrorKind::Transient),
            "resource_exhausted" => Ok(ErrorKind::ResourceExhausted),
            "orphaned" => Ok(ErrorKind::Orphaned),
            "internal" => Ok(ErrorKind::Internal),
            other => Err(format!("unknown error kind: {}", other)),
        }
    }
}

/// Structured error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn orphaned(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Orphaned, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a caller submits to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Name of a registered pipeline.
    pub pipeline: String,
    /// Opaque input handed to every stage.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
}

impl JobSpec {
    pub fn new(pipeline: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            pipeline: pipeline.into(),
            input,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Durable state of one submitted pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub pipeline: String,
    pub input: serde_json::Value,
    pub priority: i32,
    pub status: JobStatus,
    /// Aggregate progress, 0-100. Never decreases while running.
    pub percent: u8,
    pub current_stage: Option<String>,
    /// Set if and only if `status == Completed`.
    pub output_path: Option<String>,
    /// Set if and only if `status == Failed`.
    pub error: Option<JobError>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
