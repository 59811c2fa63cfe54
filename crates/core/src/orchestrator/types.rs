//! Types produced by the pipeline orchestrator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::PipelineContext;
use crate::job::JobStoreError;
use crate::stage::{StageError, StageOutput};

/// What happened to produce a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEventKind {
    StageStarted,
    Progress,
    StageCompleted,
    /// Resumed run reused a stored output.
    StageSkipped,
    AttemptFailed {
        attempt: u32,
        error: StageError,
        will_retry: bool,
    },
}

/// One progress observation for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub stage: String,
    /// Aggregate job percent, 0-100. Never decreases within a run.
    pub percent: u8,
    /// Stage-local percent, 0.0-100.0. Never decreases within a stage.
    pub stage_percent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_total: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub kind: ProgressEventKind,
}

/// Per-run knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Consult `can_skip` before executing each stage.
    pub resume: bool,
}

impl RunOptions {
    pub fn resume() -> Self {
        Self { resume: true }
    }
}

/// A failed stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub attempt: u32,
    pub error: StageError,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded,
    /// Carries the last error only.
    Failed(StageFailure),
    /// `stage` is the stage that was running when cancellation was observed.
    Canceled { stage: Option<String> },
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: RunOutcome,
    pub context: PipelineContext,
    /// Every failed attempt, in order.
    pub failures: Vec<StageFailure>,
    /// Stages that ran to success in this run.
    pub executed: Vec<String>,
    /// Stages satisfied from stored outputs.
    pub skipped: Vec<String>,
    /// Artifact of the last stage that produced one.
    pub output_path: Option<String>,
    pub elapsed: Duration,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded)
    }

    pub fn canceled(&self) -> bool {
        matches!(self.outcome, RunOutcome::Canceled { .. })
    }
}

/// Persists stage outputs as soon as a stage succeeds.
pub trait StageCheckpoint: Send + Sync {
    fn save(&self, job_id: &str, stage: &str, output: &StageOutput) -> Result<(), JobStoreError>;
}
