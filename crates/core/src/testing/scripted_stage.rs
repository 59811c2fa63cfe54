//! Stage with scripted outcomes for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::job::ErrorKind;
use crate::orchestrator::StageContext;
use crate::stage::{
    PipelineStage, ProgressReporter, StageDescriptor, StageError, StageOutcome, StageOutput,
    StageProgress,
};

/// What one attempt of a [`ScriptedStage`] does.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(StageOutput),
    Retryable(StageError),
    Fatal(StageError),
    /// Return `Canceled` right away.
    Cancel,
    /// Block until the attempt's cancellation token fires, then return `Canceled`.
    Hang,
    /// Panic inside `execute`.
    Panic(String),
}

impl Step {
    pub fn ok() -> Self {
        Step::Succeed(StageOutput::default())
    }

    pub fn transient(message: &str) -> Self {
        Step::Retryable(StageError::new(ErrorKind::Transient, message))
    }

    pub fn exhausted(message: &str) -> Self {
        Step::Retryable(StageError::new(ErrorKind::ResourceExhausted, message))
    }

    pub fn fatal(message: &str) -> Self {
        Step::Fatal(StageError::new(ErrorKind::Validation, message))
    }

    pub fn panic(message: &str) -> Self {
        Step::Panic(message.to_string())
    }
}

/// Mock implementation of [`PipelineStage`].
///
/// Provides controllable behavior for testing:
/// - one scripted [`Step`] per attempt, then default success
/// - progress reports emitted before each step
/// - call counting and a max-concurrency probe
/// - a notification when an attempt starts
///
/// # Example
///
/// ```rust,ignore
/// use reelforge_core::testing::{ScriptedStage, Step};
///
/// let stage = ScriptedStage::new("tts", vec![Step::transient("503"), Step::ok()])
///     .with_progress(vec![50.0]);
/// ```
pub struct ScriptedStage {
    descriptor: StageDescriptor,
    steps: Mutex<VecDeque<Step>>,
    progress: Vec<f32>,
    delay: Option<Duration>,
    artifact: Option<String>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    active_jobs: Mutex<HashMap<String, usize>>,
    overlapping: AtomicUsize,
    attempts: Mutex<Vec<u32>>,
    scratch: Mutex<Vec<Value>>,
    entered: Notify,
}

impl ScriptedStage {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            descriptor: StageDescriptor::new(name),
            steps: Mutex::new(steps.into()),
            progress: Vec::new(),
            delay: None,
            artifact: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            active_jobs: Mutex::new(HashMap::new()),
            overlapping: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
            scratch: Mutex::new(Vec::new()),
            entered: Notify::new(),
        }
    }

    /// A stage that always succeeds.
    pub fn succeeding(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    /// A stage that blocks until canceled.
    pub fn hanging(name: &str) -> Self {
        Self::new(name, vec![Step::Hang])
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.descriptor = self.descriptor.with_weight(weight);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor = self.descriptor.with_timeout(timeout);
        self
    }

    pub fn with_retry(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.with_retry(enabled);
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.descriptor = self.descriptor.with_max_retry_attempts(attempts);
        self
    }

    pub fn with_resume(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.with_resume(enabled);
        self
    }

    /// Stage-local percentages reported at the start of every attempt.
    pub fn with_progress(mut self, percents: Vec<f32>) -> Self {
        self.progress = percents;
        self
    }

    /// Cancel-aware pause before every step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Artifact attached to default successes.
    pub fn with_artifact(mut self, path: &str) -> Self {
        self.artifact = Some(path.to_string());
        self
    }

    /// Number of `execute` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `execute` invocations observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Times an attempt started while another attempt for the same job was still running.
    pub fn overlapping_executions(&self) -> usize {
        self.overlapping.load(Ordering::SeqCst)
    }

    /// Attempt numbers seen, in call order.
    pub fn seen_attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }

    /// Scratch values seen at the start of each call.
    pub fn seen_scratch(&self) -> Vec<Value> {
        self.scratch.lock().unwrap().clone()
    }

    /// Wait until an attempt has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    fn next_step(&self, job_id: &str, attempt: u32) -> Step {
        self.steps.lock().unwrap().pop_front().unwrap_or_else(|| {
            let mut output = StageOutput::new(json!({
                "stage": self.descriptor.name,
                "job_id": job_id,
                "attempt": attempt,
            }));
            output.artifact = self.artifact.clone();
            Step::Succeed(output)
        })
    }

    async fn play(
        &self,
        ctx: &mut StageContext<'_>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        for percent in &self.progress {
            progress.report(StageProgress::new(*percent));
        }

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return StageOutcome::Canceled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.next_step(ctx.job_id(), ctx.attempt()) {
            Step::Succeed(output) => StageOutcome::Success(output),
            Step::Retryable(error) => StageOutcome::Retryable(error),
            Step::Fatal(error) => StageOutcome::Fatal(error),
            Step::Cancel => StageOutcome::Canceled,
            Step::Hang => {
                cancel.cancelled().await;
                StageOutcome::Canceled
            }
            Step::Panic(message) => panic!("{}", message),
        }
    }
}

#[async_trait]
impl PipelineStage for ScriptedStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard::enter(self, ctx.job_id());

        let attempt = ctx.attempt();
        self.attempts.lock().unwrap().push(attempt);
        self.scratch.lock().unwrap().push(ctx.scratch().clone());
        *ctx.scratch() = json!(attempt);
        self.entered.notify_one();

        self.play(ctx, progress, cancel).await
    }
}

/// Tracks one in-flight attempt; released even when the attempt future is dropped.
struct ActiveGuard<'a> {
    stage: &'a ScriptedStage,
    job_id: String,
}

impl<'a> ActiveGuard<'a> {
    fn enter(stage: &'a ScriptedStage, job_id: &str) -> Self {
        let active = stage.active.fetch_add(1, Ordering::SeqCst) + 1;
        stage.max_active.fetch_max(active, Ordering::SeqCst);

        let mut jobs = stage.active_jobs.lock().unwrap();
        let count = jobs.entry(job_id.to_string()).or_insert(0);
        if *count > 0 {
            stage.overlapping.fetch_add(1, Ordering::SeqCst);
        }
        *count += 1;

        Self {
            stage,
            job_id: job_id.to_string(),
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.stage.active.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut jobs) = self.stage.active_jobs.lock() {
            if let Some(count) = jobs.get_mut(&self.job_id) {
                *count -= 1;
                if *count == 0 {
                    jobs.remove(&self.job_id);
                }
            }
        }
    }
}
