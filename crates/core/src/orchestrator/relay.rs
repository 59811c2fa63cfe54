//! Scoped progress handler registry.
//!
//! Every handler lives exactly as long as the [`ProgressRegistration`] guard
//! returned by [`ProgressRelay::register`]. Dropping the guard, on any exit
//! path, removes the handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::types::ProgressEvent;
use crate::metrics;

/// Callback invoked for every progress event of one job.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Job id -> live progress handlers.
///
/// Writers: [`ProgressRelay::register`] and registration drops.
/// Readers: the orchestrator, once per event.
#[derive(Default)]
pub struct ProgressRelay {
    handlers: DashMap<String, Vec<(u64, ProgressCallback)>>,
    next_id: AtomicU64,
}

impl ProgressRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `job_id` until the returned guard is dropped.
    pub fn register(
        self: &Arc<Self>,
        job_id: impl Into<String>,
        callback: ProgressCallback,
    ) -> ProgressRegistration {
        let job_id = job_id.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.handlers
            .entry(job_id.clone())
            .or_default()
            .push((id, callback));
        metrics::PROGRESS_HANDLERS.inc();
        debug!(job_id = %job_id, handler = id, "Registered progress handler");

        ProgressRegistration {
            relay: Arc::clone(self),
            job_id,
            id,
        }
    }

    /// Deliver `event` to every handler registered for its job.
    ///
    /// Handlers are invoked outside the map lock.
    pub fn dispatch(&self, event: &ProgressEvent) {
        let callbacks: Vec<ProgressCallback> = match self.handlers.get(&event.job_id) {
            Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return,
        };

        for callback in callbacks {
            callback(event);
        }
    }

    /// Live registrations across all jobs.
    pub fn handler_count(&self) -> usize {
        self.handlers.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn handler_count_for(&self, job_id: &str) -> usize {
        self.handlers
            .get(job_id)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    /// Jobs with at least one live handler.
    pub fn tracked_jobs(&self) -> usize {
        self.handlers.len()
    }

    fn deregister(&self, job_id: &str, id: u64) {
        let removed = match self.handlers.get_mut(job_id) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(handler_id, _)| *handler_id != id);
                before != entry.len()
            }
            None => false,
        };
        self.handlers.remove_if(job_id, |_, handlers| handlers.is_empty());

        if removed {
            metrics::PROGRESS_HANDLERS.dec();
            debug!(job_id = %job_id, handler = id, "Deregistered progress handler");
        }
    }
}

/// Keeps one handler registered. Dropping it deregisters the handler.
#[must_use = "the handler is removed as soon as the registration is dropped"]
pub struct ProgressRegistration {
    relay: Arc<ProgressRelay>,
    job_id: String,
    id: u64,
}

impl ProgressRegistration {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for ProgressRegistration {
    fn drop(&mut self) {
        self.relay.deregister(&self.job_id, self.id);
    }
}
