//! Events delivered to job subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobError, JobRecord, JobStatus};
use crate::orchestrator::ProgressEvent;

/// Everything a subscriber of one job can receive.
///
/// A `Terminal` event is always the last one on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress(ProgressEvent),
    /// Non-terminal status change (running, paused, queued again).
    Status {
        job_id: String,
        status: JobStatus,
        percent: u8,
        timestamp: DateTime<Utc>,
    },
    Terminal {
        job_id: String,
        status: JobStatus,
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Snapshot event for a record: `Terminal` if the record is terminal, else `Status`.
    pub fn from_record(record: &JobRecord) -> Self {
        if record.is_terminal() {
            JobEvent::Terminal {
                job_id: record.id.clone(),
                status: record.status,
                percent: record.percent,
                output_path: record.output_path.clone(),
                error: record.error.clone(),
                timestamp: record.updated_at,
            }
        } else {
            JobEvent::Status {
                job_id: record.id.clone(),
                status: record.status,
                percent: record.percent,
                timestamp: record.updated_at,
            }
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Progress(event) => &event.job_id,
            JobEvent::Status { job_id, .. } | JobEvent::Terminal { job_id, .. } => job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Terminal { .. })
    }

    /// Aggregate percent carried by the event.
    pub fn percent(&self) -> u8 {
        match self {
            JobEvent::Progress(event) => event.percent,
            JobEvent::Status { percent, .. } | JobEvent::Terminal { percent, .. } => *percent,
        }
    }

    /// Short name, used as the SSE event type.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Progress(_) => "progress",
            JobEvent::Status { .. } => "status",
            JobEvent::Terminal { .. } => "terminal",
        }
    }
}
