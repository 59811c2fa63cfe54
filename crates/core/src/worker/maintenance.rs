//! Periodic reconciliation of stale job state.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MaintenanceConfig;
use crate::queue::JobQueueManager;

/// What one maintenance pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Running records failed as orphaned.
    pub orphaned: usize,
    /// Finished records deleted by retention.
    pub purged: usize,
}

/// Background loop that fails orphaned jobs and purges old finished ones.
///
/// Runs one pass at start, which picks up jobs left Running by a crash, then
/// one pass every `interval_secs`.
pub struct MaintenanceLoop {
    manager: Arc<JobQueueManager>,
    config: MaintenanceConfig,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceLoop {
    pub fn new(manager: Arc<JobQueueManager>, config: MaintenanceConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Run a single pass now.
    pub fn run_once(&self) -> MaintenanceReport {
        Self::pass(&self.manager, &self.config)
    }

    fn pass(manager: &JobQueueManager, config: &MaintenanceConfig) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match manager.reconcile_orphans() {
            Ok(reconciled) => report.orphaned = reconciled.len(),
            Err(e) => warn!("Failed to reconcile orphaned jobs: {}", e),
        }

        if let Some(retention) = config.retention() {
            match manager.purge_finished(retention) {
                Ok(purged) => report.purged = purged,
                Err(e) => warn!("Failed to purge finished jobs: {}", e),
            }
        }

        if report != MaintenanceReport::default() {
            info!(orphaned = report.orphaned, purged = report.purged, "Maintenance pass changed jobs");
        } else {
            debug!("Maintenance pass found nothing to do");
        }
        report
    }

    /// Spawn the loop task.
    pub fn start(&self) {
        let mut task = match self.task.lock() {
            Ok(task) => task,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.is_some() || self.shutdown.is_cancelled() {
            warn!("Maintenance loop already started");
            return;
        }

        let manager = Arc::clone(&self.manager);
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        *task = Some(tokio::spawn(async move {
            info!(interval_secs = config.interval_secs, "Maintenance loop started");
            loop {
                Self::pass(&manager, &config);

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Maintenance loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(config.interval()) => {}
                }
            }
            info!("Maintenance loop stopped");
        }));
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Maintenance task failed: {}", e);
            }
        }
    }
}
