//! Fan-out of job events to external subscribers.
//!
//! Subscriptions are keyed by job id and close themselves after the job's
//! terminal event, so nothing accumulates for finished jobs.

mod hub;
mod types;

pub use hub::{JobSubscription, ProgressBroadcaster, DEFAULT_CHANNEL_CAPACITY};
pub use types::JobEvent;
