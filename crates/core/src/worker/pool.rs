//! Pool of background workers draining the job queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::QueueConfig;
use crate::queue::JobQueueManager;

/// How often `stop` re-interrupts executions that started during shutdown.
const SHUTDOWN_INTERRUPT_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of workers, each running one job at a time.
///
/// Workers wake on submission, on resume, or every poll interval, then drain
/// queued jobs through [`JobQueueManager::process_next`]. The store's atomic
/// claim decides which worker gets a job.
pub struct WorkerPool {
    manager: Arc<JobQueueManager>,
    config: QueueConfig,
    shutdown: CancellationToken,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(manager: Arc<JobQueueManager>, config: QueueConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers. Calling it again, or after `stop`, does nothing.
    pub fn start(&self) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped");
            return;
        };
        if !join_set.is_empty() {
            warn!("Worker pool already running");
            return;
        }

        let workers = self.config.workers.max(1);
        let poll_interval = self.config.poll_interval();
        info!(workers, poll_interval_ms = self.config.poll_interval_ms, "Starting worker pool");

        for worker in 0..workers {
            let manager = Arc::clone(&self.manager);
            let shutdown = self.shutdown.clone();
            join_set.spawn(async move {
                debug!(worker, "Worker started");
                Self::work(worker, &manager, &shutdown, poll_interval).await;
                debug!(worker, "Worker stopped");
            });
        }
    }

    async fn work(
        worker: usize,
        manager: &Arc<JobQueueManager>,
        shutdown: &CancellationToken,
        poll_interval: Duration,
    ) {
        loop {
            while !shutdown.is_cancelled() {
                // Each job runs in its own task so a panic cannot take the worker down.
                let next = tokio::spawn({
                    let manager = Arc::clone(manager);
                    async move { manager.process_next().await }
                });
                match next.await {
                    Ok(Ok(Some(record))) => {
                        debug!(worker, job_id = %record.id, status = %record.status, "Worker finished job");
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        warn!(worker, "Failed to process job: {}", e);
                        break;
                    }
                    Err(e) => {
                        error!(worker, "Job task failed: {}", e);
                        // The claimed job lost its execution; fail it now.
                        if let Err(e) = manager.reconcile_orphans() {
                            warn!(worker, "Failed to reconcile after task failure: {}", e);
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = manager.work_available() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Stop the workers, requeueing whatever they were running.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        self.shutdown.cancel();
        self.manager.interrupt_all();

        // Take the join set out of the mutex before awaiting
        let join_set = match self.tasks.lock() {
            Ok(mut tasks) => tasks.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(mut join_set) = join_set {
            loop {
                tokio::select! {
                    next = join_set.join_next() => match next {
                        Some(Err(e)) => error!("Worker task failed: {}", e),
                        Some(Ok(())) => {}
                        None => break,
                    },
                    _ = tokio::time::sleep(SHUTDOWN_INTERRUPT_INTERVAL) => {
                        self.manager.interrupt_all();
                    }
                }
            }
        }

        info!("Worker pool stopped");
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}
