//! Types describing a stage and what one attempt produced.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::{ErrorKind, JobError};

/// Default progress weight for a stage.
pub const DEFAULT_WEIGHT: u32 = 20;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Static policy of one stage type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Unique, stable name. Also the key of the stage's output slot.
    pub name: String,
    pub display_name: String,
    /// Relative contribution to job progress, 1..=100.
    pub progress_weight: u32,
    /// Wall-clock limit for one attempt.
    pub timeout: Duration,
    pub supports_retry: bool,
    /// Retries after the first attempt. A stage runs at most `1 + max_retry_attempts` times.
    pub max_retry_attempts: u32,
    pub supports_resume: bool,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            progress_weight: DEFAULT_WEIGHT,
            timeout: DEFAULT_TIMEOUT,
            supports_retry: true,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            supports_resume: true,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Sets the progress weight, clamped to 1..=100.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.progress_weight = weight.clamp(1, 100);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, enabled: bool) -> Self {
        self.supports_retry = enabled;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_resume(mut self, enabled: bool) -> Self {
        self.supports_resume = enabled;
        self
    }

    /// Total number of attempts this stage may get.
    pub fn max_attempts(&self) -> u32 {
        if self.supports_retry {
            self.max_retry_attempts.saturating_add(1)
        } else {
            1
        }
    }
}

/// What a successful stage leaves behind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageOutput {
    /// Stage-defined payload, readable by later stages.
    pub value: serde_json::Value,
    /// Location of a produced file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl StageOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

/// A classified stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn timed_out(timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Transient,
            format!("attempt timed out after {}s", timeout.as_secs_f64()),
        )
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StageError {}

impl From<StageError> for JobError {
    fn from(err: StageError) -> Self {
        JobError::new(err.kind, err.message)
    }
}

/// Result of one stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success(StageOutput),
    /// Worth another attempt, subject to the stage's retry policy.
    Retryable(StageError),
    /// Fails the job immediately.
    Fatal(StageError),
    /// The stage observed the cancellation signal and stopped.
    Canceled,
}

impl StageOutcome {
    pub fn success(value: serde_json::Value) -> Self {
        StageOutcome::Success(StageOutput::new(value))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        StageOutcome::Retryable(StageError::new(ErrorKind::Transient, message))
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        StageOutcome::Retryable(StageError::new(ErrorKind::ResourceExhausted, message))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        StageOutcome::Fatal(StageError::new(ErrorKind::Validation, message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StageOutcome::Fatal(StageError::new(ErrorKind::Internal, message))
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Success(_) => "success",
            StageOutcome::Retryable(_) => "retryable",
            StageOutcome::Fatal(_) => "fatal",
            StageOutcome::Canceled => "canceled",
        }
    }
}
