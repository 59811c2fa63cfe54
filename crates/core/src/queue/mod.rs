//! Job queue manager and pipeline registry.

mod manager;
mod registry;
mod types;

pub use manager::JobQueueManager;
pub use registry::{PipelineInfo, PipelineRegistry, StageInfo};
pub use types::{QueueError, QueueStatus, StopOutcome};
