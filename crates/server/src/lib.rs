//! HTTP adapter for the reelforge job queue.
//!
//! Exposes submission, inspection, control and a server-sent-events progress
//! stream over the queue manager. No orchestration logic lives here.

pub mod api;
pub mod metrics;
pub mod state;
