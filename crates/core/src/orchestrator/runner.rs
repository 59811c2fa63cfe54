//! Pipeline orchestrator implementation.
//!
//! Runs an ordered list of stages against one context:
//! - skip on resume when the stage allows it
//! - per-attempt timeout through a child cancellation token
//! - exponential backoff between retryable failures
//! - immediate halt on cancellation

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::RetryConfig;
use super::context::PipelineContext;
use super::progress::ProgressTracker;
use super::relay::ProgressRelay;
use super::types::{PipelineRun, RunOptions, RunOutcome, StageCheckpoint, StageFailure};
use crate::metrics;
use crate::stage::{PipelineStage, StageError, StageOutcome, StageOutput};

/// How one stage ended after all its attempts.
enum StageResult {
    Completed(StageOutput),
    Failed(StageFailure),
    Canceled,
}

#[derive(Default)]
struct RunLedger {
    failures: Vec<StageFailure>,
    executed: Vec<String>,
    skipped: Vec<String>,
}

/// Drives stages through retry, timeout, skip and cancellation policy.
///
/// One orchestrator is shared by every job; all per-run state lives on the
/// stack of [`PipelineOrchestrator::run`].
pub struct PipelineOrchestrator {
    retry: RetryConfig,
    relay: Arc<ProgressRelay>,
    checkpoint: Option<Arc<dyn StageCheckpoint>>,
}

impl PipelineOrchestrator {
    pub fn new(retry: RetryConfig, relay: Arc<ProgressRelay>) -> Self {
        Self {
            retry,
            relay,
            checkpoint: None,
        }
    }

    /// Persist each stage output as soon as the stage succeeds.
    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn StageCheckpoint>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn relay(&self) -> &Arc<ProgressRelay> {
        &self.relay
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run `stages` in order against `context`.
    ///
    /// Progress events for `context.job_id()` go to the relay. The returned run
    /// owns the final context whatever the outcome.
    pub async fn run(
        &self,
        stages: &[Arc<dyn PipelineStage>],
        mut context: PipelineContext,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let started = Instant::now();
        let job_id = context.job_id().to_string();
        let weights = stages
            .iter()
            .map(|s| s.descriptor().progress_weight as u64)
            .collect();
        let tracker = ProgressTracker::new(&job_id, weights, &self.relay);
        let mut ledger = RunLedger::default();

        info!(
            job_id = %job_id,
            stages = stages.len(),
            resume = options.resume,
            "Starting pipeline run"
        );

        for (index, stage) in stages.iter().enumerate() {
            let name = stage.name().to_string();

            if cancel.is_cancelled() {
                return Self::finish(
                    stages,
                    context,
                    RunOutcome::Canceled { stage: Some(name) },
                    ledger,
                    started,
                );
            }

            if options.resume && stage.can_skip(&context) {
                debug!(job_id = %job_id, stage = %name, "Skipping stage with stored output");
                metrics::STAGES_SKIPPED.with_label_values(&[name.as_str()]).inc();
                tracker.stage_skipped(index, &name);
                ledger.skipped.push(name);
                continue;
            }

            tracker.stage_started(index, &name);

            match self
                .run_stage(index, stage.as_ref(), &mut context, &tracker, cancel, &mut ledger)
                .await
            {
                StageResult::Completed(output) => {
                    if let Some(ref checkpoint) = self.checkpoint {
                        if let Err(e) = checkpoint.save(&job_id, &name, &output) {
                            warn!(job_id = %job_id, stage = %name, "Failed to checkpoint stage output: {}", e);
                        }
                    }
                    context.record_output(&name, output);

                    let items = stage.items_processed(&context);
                    metrics::ITEMS_PROCESSED
                        .with_label_values(&[name.as_str()])
                        .inc_by(items);

                    tracker.stage_completed(index, &name);
                    ledger.executed.push(name);
                }
                StageResult::Failed(failure) => {
                    return Self::finish(
                        stages,
                        context,
                        RunOutcome::Failed(failure),
                        ledger,
                        started,
                    );
                }
                StageResult::Canceled => {
                    return Self::finish(
                        stages,
                        context,
                        RunOutcome::Canceled { stage: Some(name) },
                        ledger,
                        started,
                    );
                }
            }
        }

        Self::finish(stages, context, RunOutcome::Succeeded, ledger, started)
    }

    async fn run_stage(
        &self,
        index: usize,
        stage: &dyn PipelineStage,
        context: &mut PipelineContext,
        tracker: &ProgressTracker<'_>,
        cancel: &CancellationToken,
        ledger: &mut RunLedger,
    ) -> StageResult {
        let descriptor = stage.descriptor();
        let name = descriptor.name.as_str();
        let max_attempts = descriptor.max_attempts();
        let mut attempt = 1;

        loop {
            let attempt_started = Instant::now();
            let outcome = {
                let reporter = tracker.reporter(index, name);
                let mut ctx = context.stage_context(name, attempt);
                let attempt_token = cancel.child_token();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => StageOutcome::Canceled,
                    _ = tokio::time::sleep(descriptor.timeout) => {
                        attempt_token.cancel();
                        StageOutcome::Retryable(StageError::timed_out(descriptor.timeout))
                    }
                    outcome = stage.execute(&mut ctx, &reporter, &attempt_token) => outcome,
                }
            };

            metrics::STAGE_ATTEMPTS
                .with_label_values(&[name, outcome.label()])
                .inc();
            metrics::STAGE_DURATION
                .with_label_values(&[name])
                .observe(attempt_started.elapsed().as_secs_f64());

            let error = match outcome {
                StageOutcome::Success(output) => {
                    debug!(job_id = %context.job_id(), stage = %name, attempt, "Stage succeeded");
                    return StageResult::Completed(output);
                }
                StageOutcome::Canceled => {
                    info!(job_id = %context.job_id(), stage = %name, attempt, "Stage canceled");
                    return StageResult::Canceled;
                }
                StageOutcome::Fatal(error) => {
                    let failure = StageFailure {
                        stage: name.to_string(),
                        attempt,
                        error,
                    };
                    tracker.attempt_failed(index, name, attempt, &failure.error, false);
                    ledger.failures.push(failure.clone());
                    warn!(
                        job_id = %context.job_id(),
                        stage = %name,
                        attempt,
                        "Stage failed fatally: {}",
                        failure.error
                    );
                    return StageResult::Failed(failure);
                }
                StageOutcome::Retryable(error) => error,
            };

            let will_retry = attempt < max_attempts && !cancel.is_cancelled();
            tracker.attempt_failed(index, name, attempt, &error, will_retry);
            let failure = StageFailure {
                stage: name.to_string(),
                attempt,
                error,
            };
            ledger.failures.push(failure.clone());

            if !will_retry {
                if cancel.is_cancelled() {
                    return StageResult::Canceled;
                }
                warn!(
                    job_id = %context.job_id(),
                    stage = %name,
                    attempts = attempt,
                    "Stage exhausted its attempts: {}",
                    failure.error
                );
                return StageResult::Failed(failure);
            }

            let delay = self.retry.delay_for(attempt, failure.error.kind);
            warn!(
                job_id = %context.job_id(),
                stage = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Stage attempt failed, retrying: {}",
                failure.error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StageResult::Canceled,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn finish(
        stages: &[Arc<dyn PipelineStage>],
        context: PipelineContext,
        outcome: RunOutcome,
        ledger: RunLedger,
        started: Instant,
    ) -> PipelineRun {
        let output_path = context
            .last_artifact(stages.iter().map(|s| s.name()))
            .map(str::to_string);
        let elapsed = started.elapsed();

        info!(
            job_id = %context.job_id(),
            outcome = ?outcome,
            executed = ledger.executed.len(),
            skipped = ledger.skipped.len(),
            failed_attempts = ledger.failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Pipeline run finished"
        );

        PipelineRun {
            outcome,
            context,
            failures: ledger.failures,
            executed: ledger.executed,
            skipped: ledger.skipped,
            output_path,
            elapsed,
        }
    }
}
