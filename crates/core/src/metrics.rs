//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Queue (submissions, terminal outcomes, live executions, orphans)
//! - Orchestrator (stage attempts, durations, skips, items)
//! - Progress plumbing (relay handlers, broadcaster subscribers)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Queue Metrics
// =============================================================================

/// Jobs accepted by the queue.
pub static JOBS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_jobs_submitted_total", "Total jobs submitted"),
        &["pipeline"],
    )
    .unwrap()
});

/// Jobs that left the running state, by resulting status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_jobs_finished_total",
            "Total job executions finished",
        ),
        &["status"], // "completed", "failed", "canceled", "paused"
    )
    .unwrap()
});

/// Wall-clock duration of one job execution.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelforge_job_duration_seconds",
            "Duration of job executions",
        )
        .buckets(vec![
            1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
        ]),
        &["status"],
    )
    .unwrap()
});

/// Executions currently running in this process.
pub static ACTIVE_EXECUTIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelforge_active_executions",
        "Job executions currently running",
    )
    .unwrap()
});

/// Running records failed by the maintenance loop.
pub static ORPHANED_JOBS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "reelforge_orphaned_jobs_total",
        "Total running jobs reconciled as orphaned",
    )
    .unwrap()
});

/// Finished records deleted by retention.
pub static JOBS_PURGED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("reelforge_jobs_purged_total", "Total finished jobs purged").unwrap()
});

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Stage attempts by stage and result.
pub static STAGE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_stage_attempts_total", "Total stage attempts"),
        &["stage", "result"], // result: "success", "retryable", "fatal", "canceled"
    )
    .unwrap()
});

/// Duration of a single stage attempt.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelforge_stage_duration_seconds",
            "Duration of stage attempts",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        &["stage"],
    )
    .unwrap()
});

/// Stages satisfied from stored outputs on resume.
pub static STAGES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_stages_skipped_total",
            "Total stages skipped on resume",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Items reported by successful stages.
pub static ITEMS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_stage_items_processed_total",
            "Total items processed by stages",
        ),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Progress Plumbing Metrics
// =============================================================================

/// Live progress handler registrations.
pub static PROGRESS_HANDLERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelforge_progress_handlers",
        "Live progress handler registrations",
    )
    .unwrap()
});

/// Live broadcaster subscribers.
pub static SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelforge_broadcast_subscribers",
        "Live job event subscribers",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Queue
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(ACTIVE_EXECUTIONS.clone()),
        Box::new(ORPHANED_JOBS.clone()),
        Box::new(JOBS_PURGED.clone()),
        // Orchestrator
        Box::new(STAGE_ATTEMPTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(STAGES_SKIPPED.clone()),
        Box::new(ITEMS_PROCESSED.clone()),
        // Progress plumbing
        Box::new(PROGRESS_HANDLERS.clone()),
        Box::new(SUBSCRIBERS.clone()),
    ]
}
