use std::sync::Arc;
use reelforge_core::{Config, JobQueueManager};

/// Shared application state
pub struct AppState {
    config: Config,
    manager: Arc<JobQueueManager>,
}

impl AppState {
    pub fn new(config: Config, manager: Arc<JobQueueManager>) -> Self {
        Self { config, manager }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &JobQueueManager {
        self.manager.as_ref()
    }
}
