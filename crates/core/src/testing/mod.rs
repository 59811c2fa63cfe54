//! Testing utilities and stage doubles.
//!
//! This module provides a scriptable [`PipelineStage`](crate::stage::PipelineStage)
//! and fixtures for wiring a queue manager over an in-memory store, allowing
//! end-to-end tests without external programs.
//!
//! # Example
//!
//! ```rust,ignore
//! use reelforge_core::testing::{fixtures, ScriptedStage, Step};
//!
//! let tts = Arc::new(ScriptedStage::new("tts", vec![Step::transient("429"), Step::ok()]));
//! let manager = fixtures::manager(fixtures::registry("video", vec![tts.clone()]));
//!
//! let job = manager.submit(JobSpec::new("video", json!({})))?;
//! manager.process_job(&job.id).await?;
//! assert_eq!(tts.calls(), 2);
//! ```

mod scripted_stage;

pub use scripted_stage::{ScriptedStage, Step};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;
    use std::time::Duration;

    use super::ScriptedStage;
    use crate::broadcaster::ProgressBroadcaster;
    use crate::job::{JobRecord, JobStatus, JobStore, SqliteJobStore};
    use crate::orchestrator::RetryConfig;
    use crate::queue::{JobQueueManager, PipelineRegistry};
    use crate::stage::PipelineStage;

    /// Create an in-memory job store.
    pub fn memory_store() -> Arc<dyn JobStore> {
        Arc::new(SqliteJobStore::in_memory().expect("in-memory sqlite store"))
    }

    /// Registry with a single pipeline made of scripted stages.
    pub fn registry(name: &str, stages: Vec<Arc<ScriptedStage>>) -> PipelineRegistry {
        PipelineRegistry::new().with_pipeline(
            name,
            stages
                .into_iter()
                .map(|stage| stage as Arc<dyn PipelineStage>)
                .collect(),
        )
    }

    /// Manager over an in-memory store with no retry delays.
    pub fn manager(registry: PipelineRegistry) -> Arc<JobQueueManager> {
        manager_with_store(memory_store(), registry)
    }

    pub fn manager_with_store(
        store: Arc<dyn JobStore>,
        registry: PipelineRegistry,
    ) -> Arc<JobQueueManager> {
        Arc::new(JobQueueManager::new(
            store,
            registry,
            RetryConfig::immediate(),
            ProgressBroadcaster::default(),
        ))
    }

    /// Poll until the job reaches `status`, panicking after `timeout`.
    pub async fn wait_for_status(
        manager: &JobQueueManager,
        job_id: &str,
        status: JobStatus,
        timeout: Duration,
    ) -> JobRecord {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = manager.get(job_id).expect("job exists");
            if record.status == status {
                return record;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "job {} still {} after {:?}, expected {}",
                    job_id, record.status, timeout, status
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
