//! Job record storage trait and types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{JobError, JobRecord, JobSpec, JobStatus};
use crate::stage::StageOutput;

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} job {job_id}: current status is {status}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

/// Filter for querying job records.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub pipeline: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            pipeline: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Repository contract for job records.
///
/// Every terminal transition (`complete`, `fail`, `cancel`) is a single atomic
/// write that also fixes `output_path` / `error`, and is rejected with
/// [`JobStoreError::InvalidState`] once the record is terminal.
pub trait JobStore: Send + Sync {
    /// Create a new Queued record.
    fn create(&self, spec: &JobSpec) -> Result<JobRecord, JobStoreError>;

    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError>;

    /// List records matching the filter, highest priority first, then oldest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobStoreError>;

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// All Queued, Running and Paused records.
    fn list_active(&self) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Atomically move a Queued record to Running.
    ///
    /// Returns `None` when another caller won the claim or the job is no longer queued.
    fn claim(&self, id: &str) -> Result<Option<JobRecord>, JobStoreError>;

    /// Record progress for a Running job. The stored percent never decreases.
    ///
    /// Returns false if the job is not Running.
    fn update_progress(
        &self,
        id: &str,
        percent: u8,
        stage: Option<&str>,
    ) -> Result<bool, JobStoreError>;

    /// Running -> Completed, setting `output_path` in the same write.
    fn complete(&self, id: &str, output_path: &str) -> Result<JobRecord, JobStoreError>;

    /// Any non-terminal status -> Failed, setting `error` in the same write.
    fn fail(&self, id: &str, error: &JobError) -> Result<JobRecord, JobStoreError>;

    /// Any non-terminal status -> Canceled.
    fn cancel(&self, id: &str) -> Result<JobRecord, JobStoreError>;

    /// Queued or Running -> Paused.
    fn pause(&self, id: &str) -> Result<JobRecord, JobStoreError>;

    /// Paused -> Queued.
    fn requeue(&self, id: &str) -> Result<JobRecord, JobStoreError>;

    fn increment_retry_count(&self, id: &str) -> Result<JobRecord, JobStoreError>;

    /// Persist one stage's output so a later run can skip the stage.
    fn save_stage_output(
        &self,
        id: &str,
        stage: &str,
        output: &StageOutput,
    ) -> Result<(), JobStoreError>;

    fn stage_outputs(&self, id: &str) -> Result<BTreeMap<String, StageOutput>, JobStoreError>;

    /// Delete terminal records (and their stage outputs) finished before `cutoff`.
    fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, JobStoreError>;
}
