//! Pipeline orchestrator.
//!
//! Sequences the stages of one job against a [`PipelineContext`]:
//! - weighted, monotonic progress through the [`ProgressRelay`]
//! - per-stage retry with exponential backoff and a per-attempt timeout
//! - skip-on-resume from stored stage outputs
//! - cancellation through a `CancellationToken`

mod config;
mod context;
mod progress;
mod relay;
mod runner;
mod types;

pub use config::RetryConfig;
pub use context::{PipelineContext, StageContext};
pub use relay::{ProgressCallback, ProgressRegistration, ProgressRelay};
pub use runner::PipelineOrchestrator;
pub use types::{
    PipelineRun, ProgressEvent, ProgressEventKind, RunOptions, RunOutcome, StageCheckpoint,
    StageFailure,
};
