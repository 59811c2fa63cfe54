//! Types for the job queue manager.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobRecord, JobStatus, JobStoreError};

/// Errors returned by [`JobQueueManager`](super::JobQueueManager) operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Submission named a pipeline that is not registered.
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    /// The job's status does not allow the operation.
    #[error("cannot {operation} job {job_id}: current status is {status}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    /// Job store error.
    #[error("job store error: {0}")]
    Store(String),
}

impl From<JobStoreError> for QueueError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => QueueError::NotFound(id),
            JobStoreError::InvalidState {
                job_id,
                status,
                operation,
            } => QueueError::InvalidState {
                job_id,
                status,
                operation,
            },
            JobStoreError::Database(message) => QueueError::Store(message),
        }
    }
}

/// Result of a cancel or pause request.
#[derive(Debug, Clone)]
pub enum StopOutcome {
    /// A live execution was signaled; it records the new status when it halts.
    Signaled,
    /// The job had no live execution and the new status is already stored.
    Applied(JobRecord),
}

/// Snapshot of queue activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Executions running in this process.
    pub active_executions: usize,
    pub queued: usize,
    pub running: usize,
    pub paused: usize,
    /// Live progress handler registrations.
    pub progress_handlers: usize,
    /// Live broadcaster subscribers.
    pub subscribers: usize,
}
