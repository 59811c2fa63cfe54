//! Job queue manager.
//!
//! Owns the lifecycle of every job execution in this process:
//! - submission and atomic claiming of queued records
//! - one scoped progress handler per execution, removed on every exit path
//! - terminal writes that fix status and output path together
//! - cancel, pause and resume requests
//! - reconciliation of records left running without a live execution

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::PipelineRegistry;
use super::types::{QueueError, QueueStatus, StopOutcome};
use crate::broadcaster::{JobEvent, JobSubscription, ProgressBroadcaster};
use crate::job::{JobError, JobFilter, JobRecord, JobSpec, JobStatus, JobStore, JobStoreError};
use crate::metrics;
use crate::orchestrator::{
    PipelineContext, PipelineOrchestrator, PipelineRun, ProgressCallback, ProgressEvent,
    ProgressEventKind, ProgressRelay, RetryConfig, RunOptions, RunOutcome, StageCheckpoint,
};
use crate::stage::StageOutput;

/// Queued records examined per dispatch attempt.
const CLAIM_BATCH: i64 = 16;

/// Why a live execution was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum StopReason {
    None = 0,
    Cancel = 1,
    Pause = 2,
    Shutdown = 3,
}

impl StopReason {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StopReason::Cancel,
            2 => StopReason::Pause,
            3 => StopReason::Shutdown,
            _ => StopReason::None,
        }
    }
}

/// Handle to one live execution.
#[derive(Clone)]
struct Execution {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl Execution {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(AtomicU8::new(StopReason::None as u8)),
        }
    }

    /// Cancel overrides any earlier reason; pause and shutdown only apply first.
    fn signal(&self, reason: StopReason) {
        if reason == StopReason::Cancel {
            self.reason.store(reason as u8, Ordering::SeqCst);
        } else {
            let _ = self.reason.compare_exchange(
                StopReason::None as u8,
                reason as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        self.token.cancel();
    }

    fn reason(&self) -> StopReason {
        StopReason::from_u8(self.reason.load(Ordering::SeqCst))
    }
}

/// Removes an execution from the live table when the execution ends.
struct ExecutionGuard<'a> {
    executions: &'a DashMap<String, Execution>,
    job_id: String,
}

impl<'a> ExecutionGuard<'a> {
    fn new(executions: &'a DashMap<String, Execution>, job_id: &str) -> Self {
        metrics::ACTIVE_EXECUTIONS.inc();
        Self {
            executions,
            job_id: job_id.to_string(),
        }
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.executions.remove(&self.job_id);
        metrics::ACTIVE_EXECUTIONS.dec();
    }
}

/// Checkpoints stage outputs into the job store.
struct StoreCheckpoint {
    store: Arc<dyn JobStore>,
}

impl StageCheckpoint for StoreCheckpoint {
    fn save(&self, job_id: &str, stage: &str, output: &StageOutput) -> Result<(), JobStoreError> {
        self.store.save_stage_output(job_id, stage, output)
    }
}

/// Bridges the pipeline orchestrator to the job store and the broadcaster.
///
/// Live executions are tracked in a concurrent map keyed by job id. An entry
/// is inserted before the store claim and removed after the terminal write,
/// so a Running record without an entry has no execution behind it.
pub struct JobQueueManager {
    store: Arc<dyn JobStore>,
    registry: PipelineRegistry,
    orchestrator: PipelineOrchestrator,
    broadcaster: ProgressBroadcaster,
    executions: DashMap<String, Execution>,
    work_available: Notify,
}

impl JobQueueManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: PipelineRegistry,
        retry: RetryConfig,
        broadcaster: ProgressBroadcaster,
    ) -> Self {
        let checkpoint = Arc::new(StoreCheckpoint {
            store: Arc::clone(&store),
        });
        let orchestrator = PipelineOrchestrator::new(retry, Arc::new(ProgressRelay::new()))
            .with_checkpoint(checkpoint);

        Self {
            store,
            registry,
            orchestrator,
            broadcaster,
            executions: DashMap::new(),
            work_available: Notify::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    pub fn relay(&self) -> &Arc<ProgressRelay> {
        self.orchestrator.relay()
    }

    /// Executions currently running in this process.
    pub fn active_executions(&self) -> usize {
        self.executions.len()
    }

    pub fn is_executing(&self, job_id: &str) -> bool {
        self.executions.contains_key(job_id)
    }

    /// Resolves when a job was submitted or resumed.
    pub(crate) fn work_available(&self) -> Notified<'_> {
        self.work_available.notified()
    }

    /// Create a Queued record for `spec` and wake a worker.
    pub fn submit(&self, spec: JobSpec) -> Result<JobRecord, QueueError> {
        if !self.registry.contains(&spec.pipeline) {
            return Err(QueueError::UnknownPipeline(spec.pipeline));
        }

        let record = self.store.create(&spec)?;
        metrics::JOBS_SUBMITTED
            .with_label_values(&[record.pipeline.as_str()])
            .inc();
        info!(
            job_id = %record.id,
            pipeline = %record.pipeline,
            priority = record.priority,
            "Job submitted"
        );

        self.work_available.notify_one();
        Ok(record)
    }

    pub fn get(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        self.store
            .get(job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.store.list(filter)?)
    }

    pub fn count(&self, filter: &JobFilter) -> Result<i64, QueueError> {
        Ok(self.store.count(filter)?)
    }

    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        let count = |status: JobStatus| -> Result<usize, QueueError> {
            Ok(self.store.count(&JobFilter::new().with_status(status))? as usize)
        };

        Ok(QueueStatus {
            active_executions: self.executions.len(),
            queued: count(JobStatus::Queued)?,
            running: count(JobStatus::Running)?,
            paused: count(JobStatus::Paused)?,
            progress_handlers: self.relay().handler_count(),
            subscribers: self.broadcaster.total_subscribers(),
        })
    }

    /// Claim and run the next queued job, if any.
    ///
    /// Returns the record as left by the execution, or `None` when nothing
    /// could be claimed.
    pub async fn process_next(&self) -> Result<Option<JobRecord>, QueueError> {
        let filter = JobFilter::new()
            .with_status(JobStatus::Queued)
            .with_limit(CLAIM_BATCH);

        for candidate in self.store.list(&filter)? {
            if let Some(record) = self.process_job(&candidate.id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Run one queued job to its next stored status.
    ///
    /// Returns `None` without side effects if the job is not Queued or another
    /// caller won the claim.
    pub async fn process_job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let previous = self.get(job_id)?;
        if previous.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %previous.status, "Job not queued, skipping");
            return Ok(None);
        }

        let execution = Execution::new();
        match self.executions.entry(job_id.to_string()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(slot) => {
                slot.insert(execution.clone());
            }
        }
        let _guard = ExecutionGuard::new(&self.executions, job_id);

        let Some(record) = self.store.claim(job_id)? else {
            debug!(job_id = %job_id, "Lost claim race");
            return Ok(None);
        };
        let started = Instant::now();
        self.broadcaster.publish(JobEvent::from_record(&record));
        info!(job_id = %job_id, pipeline = %record.pipeline, "Job started");

        let Some(stages) = self.registry.get(&record.pipeline) else {
            let error = JobError::validation(format!("unknown pipeline: {}", record.pipeline));
            let result = self.store.fail(job_id, &error);
            return self.finish(job_id, result, started).map(Some);
        };

        // A job that ran before resumes from its checkpointed outputs.
        let resume = previous.started_at.is_some();
        let outputs = if resume {
            match self.store.stage_outputs(job_id) {
                Ok(outputs) => outputs,
                Err(e) => {
                    let error = JobError::internal(format!("failed to load stage outputs: {}", e));
                    let result = self.store.fail(job_id, &error);
                    return self.finish(job_id, result, started).map(Some);
                }
            }
        } else {
            BTreeMap::new()
        };
        let context = PipelineContext::with_stage_outputs(job_id, record.input.clone(), outputs);

        let run = {
            let _registration = self
                .relay()
                .register(job_id, self.progress_handler(job_id, record.percent));
            AssertUnwindSafe(self.orchestrator.run(
                &stages,
                context,
                RunOptions { resume },
                &execution.token,
            ))
            .catch_unwind()
            .await
        };

        let result = match run {
            Ok(run) => self.record_run(job_id, &run, &execution),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %job_id, "Pipeline panicked: {}", message);
                self.store.fail(
                    job_id,
                    &JobError::internal(format!("pipeline panicked: {}", message)),
                )
            }
        };

        self.finish(job_id, result, started).map(Some)
    }

    /// Store the outcome of a finished run.
    fn record_run(
        &self,
        job_id: &str,
        run: &PipelineRun,
        execution: &Execution,
    ) -> Result<JobRecord, JobStoreError> {
        match &run.outcome {
            RunOutcome::Succeeded => match run.output_path.as_deref() {
                Some(path) => self.store.complete(job_id, path),
                None => self.store.fail(
                    job_id,
                    &JobError::validation("pipeline finished without an output artifact"),
                ),
            },
            RunOutcome::Failed(failure) => self.store.fail(
                job_id,
                &JobError::new(
                    failure.error.kind,
                    format!("stage '{}' failed: {}", failure.stage, failure.error.message),
                ),
            ),
            RunOutcome::Canceled { .. } => match execution.reason() {
                StopReason::Pause => self.store.pause(job_id),
                StopReason::Shutdown => self
                    .store
                    .pause(job_id)
                    .and_then(|_| self.store.requeue(job_id)),
                StopReason::Cancel | StopReason::None => self.store.cancel(job_id),
            },
        }
    }

    /// Handler that mirrors one execution's progress into the store and the broadcaster.
    ///
    /// `floor` is the stored percent at claim time, so a resumed job never
    /// reports less than it already had.
    fn progress_handler(&self, job_id: &str, floor: u8) -> ProgressCallback {
        let store = Arc::clone(&self.store);
        let broadcaster = self.broadcaster.clone();
        let job_id = job_id.to_string();

        Arc::new(move |event: &ProgressEvent| {
            let mut event = event.clone();
            event.percent = event.percent.max(floor);

            if matches!(
                event.kind,
                ProgressEventKind::AttemptFailed {
                    will_retry: true,
                    ..
                }
            ) {
                if let Err(e) = store.increment_retry_count(&job_id) {
                    warn!(job_id = %job_id, "Failed to record retry: {}", e);
                }
            }

            if let Err(e) = store.update_progress(&job_id, event.percent, Some(&event.stage)) {
                warn!(job_id = %job_id, "Failed to record progress: {}", e);
            }
            broadcaster.publish(JobEvent::Progress(event));
        })
    }

    /// Resolve the stored result of an execution and announce it.
    fn finish(
        &self,
        job_id: &str,
        result: Result<JobRecord, JobStoreError>,
        started: Instant,
    ) -> Result<JobRecord, QueueError> {
        let record = match result {
            Ok(record) => record,
            Err(JobStoreError::InvalidState {
                status, operation, ..
            }) => {
                warn!(
                    job_id = %job_id,
                    status = %status,
                    operation = %operation,
                    "Job changed state during execution, keeping stored state"
                );
                self.get(job_id)?
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to record job result: {}", e);
                return Err(e.into());
            }
        };

        let status = record.status.as_str();
        metrics::JOBS_FINISHED.with_label_values(&[status]).inc();
        metrics::JOB_DURATION
            .with_label_values(&[status])
            .observe(started.elapsed().as_secs_f64());

        self.broadcaster.publish(JobEvent::from_record(&record));

        match record.status {
            JobStatus::Completed => info!(
                job_id = %job_id,
                output_path = record.output_path.as_deref().unwrap_or_default(),
                "Job completed"
            ),
            JobStatus::Failed => warn!(
                job_id = %job_id,
                error = %record.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "Job failed"
            ),
            status => info!(job_id = %job_id, status = %status, "Job stopped"),
        }

        Ok(record)
    }

    fn signal(&self, job_id: &str, reason: StopReason) -> bool {
        match self.executions.get(job_id) {
            Some(execution) => {
                execution.signal(reason);
                true
            }
            None => false,
        }
    }

    /// Cancel a job.
    ///
    /// A live execution is signaled and records `Canceled` itself when it
    /// halts; a queued or paused job is canceled right away.
    pub fn cancel(&self, job_id: &str) -> Result<StopOutcome, QueueError> {
        if self.signal(job_id, StopReason::Cancel) {
            info!(job_id = %job_id, "Cancellation requested");
            return Ok(StopOutcome::Signaled);
        }

        let record = self.store.cancel(job_id)?;
        // A worker may have claimed the job in between.
        self.signal(job_id, StopReason::Cancel);

        metrics::JOBS_FINISHED
            .with_label_values(&[record.status.as_str()])
            .inc();
        self.broadcaster.publish(JobEvent::from_record(&record));
        info!(job_id = %job_id, "Job canceled");
        Ok(StopOutcome::Applied(record))
    }

    /// Pause a job, keeping its checkpointed stage outputs.
    pub fn pause(&self, job_id: &str) -> Result<StopOutcome, QueueError> {
        if self.signal(job_id, StopReason::Pause) {
            info!(job_id = %job_id, "Pause requested");
            return Ok(StopOutcome::Signaled);
        }

        let record = self.store.pause(job_id)?;
        self.signal(job_id, StopReason::Pause);

        self.broadcaster.publish(JobEvent::from_record(&record));
        info!(job_id = %job_id, "Job paused");
        Ok(StopOutcome::Applied(record))
    }

    /// Put a paused job back in the queue.
    pub fn resume(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        let record = self.store.requeue(job_id)?;
        self.broadcaster.publish(JobEvent::from_record(&record));
        info!(job_id = %job_id, "Job resumed");

        self.work_available.notify_one();
        Ok(record)
    }

    /// Ask every live execution to stop and requeue its job.
    pub fn interrupt_all(&self) -> usize {
        let mut interrupted = 0;
        for entry in self.executions.iter() {
            entry.value().signal(StopReason::Shutdown);
            interrupted += 1;
        }
        if interrupted > 0 {
            info!(executions = interrupted, "Interrupted live executions");
        }
        interrupted
    }

    /// Subscribe to a job's events.
    ///
    /// A job that is already terminal yields exactly its terminal event.
    pub fn subscribe(&self, job_id: &str) -> Result<JobSubscription, QueueError> {
        let subscription = self.broadcaster.subscribe(job_id);
        let record = self.get(job_id)?;

        if record.is_terminal() {
            self.broadcaster
                .finish(&subscription, JobEvent::from_record(&record));
        }
        Ok(subscription)
    }

    /// Fail Running records that have no live execution in this process.
    pub fn reconcile_orphans(&self) -> Result<Vec<JobRecord>, QueueError> {
        let error = JobError::orphaned("job was running without a live execution");
        let mut reconciled = Vec::new();

        for job in self.store.list_active()? {
            if job.status != JobStatus::Running || self.executions.contains_key(&job.id) {
                continue;
            }

            match self.store.fail(&job.id, &error) {
                Ok(record) => {
                    metrics::ORPHANED_JOBS.inc();
                    metrics::JOBS_FINISHED
                        .with_label_values(&[record.status.as_str()])
                        .inc();
                    warn!(job_id = %record.id, "Marked orphaned job as failed");
                    self.broadcaster.publish(JobEvent::from_record(&record));
                    reconciled.push(record);
                }
                Err(JobStoreError::InvalidState { .. }) | Err(JobStoreError::NotFound(_)) => {
                    debug!(job_id = %job.id, "Job finished before reconciliation");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(reconciled)
    }

    /// Delete terminal jobs that finished more than `retention` ago.
    pub fn purge_finished(&self, retention: chrono::Duration) -> Result<usize, QueueError> {
        let purged = self.store.purge_finished_before(Utc::now() - retention)?;
        if purged > 0 {
            metrics::JOBS_PURGED.inc_by(purged as u64);
            info!(purged, "Purged finished jobs");
        }
        Ok(purged)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
