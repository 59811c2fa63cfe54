//! The stage contract and its built-in implementations.

mod command;
mod progress;
mod traits;
mod types;

pub use command::{CommandStage, EXIT_RESOURCE_EXHAUSTED, EXIT_TRANSIENT, EXIT_VALIDATION};
pub use progress::{NoopReporter, ProgressReporter, StageProgress};
pub use traits::PipelineStage;
pub use types::{
    StageDescriptor, StageError, StageOutcome, StageOutput, DEFAULT_MAX_RETRY_ATTEMPTS,
    DEFAULT_TIMEOUT, DEFAULT_WEIGHT,
};
