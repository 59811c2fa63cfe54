//! Per-job publish/subscribe hub.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::types::JobEvent;
use crate::metrics;

/// Default per-subscriber buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<JobEvent>,
    /// Set while events are being skipped because the buffer is full.
    lagging: bool,
}

struct Inner {
    /// Job id -> live subscribers. Entries are pruned as soon as they become empty.
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Inner {
    fn remove_subscriber(&self, job_id: &str, id: u64) -> Option<Subscriber> {
        let removed = match self.subscribers.get_mut(job_id) {
            Some(mut subs) => subs
                .iter()
                .position(|s| s.id == id)
                .map(|index| subs.remove(index)),
            None => None,
        };
        self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());

        if removed.is_some() {
            metrics::SUBSCRIBERS.dec();
        }
        removed
    }
}

/// Delivers [`JobEvent`]s to the live subscribers of each job.
///
/// Each subscriber owns a bounded channel, which keeps per-subscriber
/// ordering. One slot of every channel is held back for the terminal event:
/// a subscriber that cannot keep up misses intermediate events but still
/// receives the job's outcome. Publishing a terminal event removes and closes
/// every channel of that job.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    inner: Arc<Inner>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Open a subscription for `job_id`.
    pub fn subscribe(&self, job_id: &str) -> JobSubscription {
        // The extra slot is reserved for the terminal event.
        let (tx, rx) = mpsc::channel(self.inner.capacity + 1);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .subscribers
            .entry(job_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                tx,
                lagging: false,
            });
        metrics::SUBSCRIBERS.inc();
        debug!(job_id = %job_id, subscriber = id, "Subscriber attached");

        JobSubscription {
            job_id: job_id.to_string(),
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every subscriber of its job. Returns the number of deliveries.
    pub fn publish(&self, event: JobEvent) -> usize {
        let job_id = event.job_id().to_string();

        if event.is_terminal() {
            let Some((_, subs)) = self.inner.subscribers.remove(&job_id) else {
                return 0;
            };
            let mut delivered = 0;
            for sub in &subs {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(job_id = %job_id, subscriber = sub.id, "Terminal event not delivered: {}", e)
                    }
                }
            }
            metrics::SUBSCRIBERS.sub(subs.len() as i64);
            debug!(job_id = %job_id, subscribers = subs.len(), "Closed job subscriptions");
            return delivered;
        }

        let mut delivered = 0;
        let mut dropped = 0;
        if let Some(mut subs) = self.inner.subscribers.get_mut(&job_id) {
            subs.retain_mut(|sub| {
                if sub.tx.is_closed() {
                    dropped += 1;
                    return false;
                }
                if sub.tx.capacity() <= 1 {
                    if !sub.lagging {
                        warn!(job_id = %job_id, subscriber = sub.id, "Subscriber lagging, skipping events");
                        sub.lagging = true;
                    }
                    return true;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        sub.lagging = false;
                        true
                    }
                    Err(TrySendError::Full(_)) => true,
                    Err(TrySendError::Closed(_)) => {
                        dropped += 1;
                        false
                    }
                }
            });
        }

        if dropped > 0 {
            self.inner
                .subscribers
                .remove_if(&job_id, |_, subs| subs.is_empty());
            metrics::SUBSCRIBERS.sub(dropped);
        }
        delivered
    }

    /// Deliver a synthesized terminal `event` to `subscription` and close it.
    ///
    /// Does nothing and returns false if a terminal publish already reached
    /// the subscription, so a terminal event is delivered exactly once.
    pub fn finish(&self, subscription: &JobSubscription, event: JobEvent) -> bool {
        match self
            .inner
            .remove_subscriber(&subscription.job_id, subscription.id)
        {
            Some(sub) => sub.tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.inner
            .subscribers
            .get(job_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.inner.subscribers.iter().map(|e| e.value().len()).sum()
    }

    /// Jobs with at least one live subscriber.
    pub fn tracked_jobs(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// Receiving side of one job subscription.
///
/// Ends after the job's terminal event. Dropping it detaches the subscriber.
pub struct JobSubscription {
    job_id: String,
    id: u64,
    rx: mpsc::Receiver<JobEvent>,
    hub: Weak<Inner>,
}

impl JobSubscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

impl Stream for JobSubscription {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            if inner.remove_subscriber(&self.job_id, self.id).is_some() {
                debug!(job_id = %self.job_id, subscriber = self.id, "Subscriber detached");
            }
        }
    }
}
