pub mod broadcaster;
pub mod config;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod stage;
pub mod testing;
pub mod worker;

pub use broadcaster::{JobEvent, JobSubscription, ProgressBroadcaster};
pub use config::{
    load_config, load_config_from_str, validate_config, CommandStageConfig, Config, ConfigError,
    PipelineConfig,
};
pub use job::{
    ErrorKind, JobError, JobFilter, JobRecord, JobSpec, JobStatus, JobStore, JobStoreError,
    SqliteJobStore,
};
pub use orchestrator::{
    PipelineContext, PipelineOrchestrator, PipelineRun, ProgressEvent, ProgressEventKind,
    ProgressRelay, RetryConfig, RunOptions, RunOutcome, StageContext,
};
pub use queue::{JobQueueManager, PipelineRegistry, QueueError, QueueStatus, StopOutcome};
pub use stage::{
    CommandStage, PipelineStage, ProgressReporter, StageDescriptor, StageError, StageOutcome,
    StageOutput, StageProgress,
};
pub use worker::{MaintenanceConfig, MaintenanceLoop, QueueConfig, WorkerPool};
