//! Weighted progress aggregation for one run.

use std::sync::Mutex;

use chrono::Utc;

use super::relay::ProgressRelay;
use super::types::{ProgressEvent, ProgressEventKind};
use crate::stage::{ProgressReporter, StageError, StageProgress};

struct TrackerState {
    /// Sum of raw weights of finished stages.
    completed_weight: u64,
    /// Highest aggregate percent emitted so far.
    last_percent: u8,
    /// Highest stage-local percent of the current stage.
    stage_percent: f32,
}

/// Turns stage-local reports into monotonic aggregate job progress.
///
/// `percent = 100 * (completed weights + weight[i] * stage% / 100) / total weight`,
/// rounded, held at 99 until every stage has finished, and clamped so it never
/// goes backwards. Events are dispatched while
/// the state lock is held, so observers see them in emission order.
pub(crate) struct ProgressTracker<'a> {
    job_id: String,
    weights: Vec<u64>,
    total_weight: u64,
    relay: &'a ProgressRelay,
    state: Mutex<TrackerState>,
}

impl<'a> ProgressTracker<'a> {
    /// `weights` are raw stage weights; zero is treated as one.
    pub(crate) fn new(job_id: &str, weights: Vec<u64>, relay: &'a ProgressRelay) -> Self {
        let weights: Vec<u64> = weights.into_iter().map(|w| w.max(1)).collect();
        let total_weight = weights.iter().sum::<u64>().max(1);
        Self {
            job_id: job_id.to_string(),
            weights,
            total_weight,
            relay,
            state: Mutex::new(TrackerState {
                completed_weight: 0,
                last_percent: 0,
                stage_percent: 0.0,
            }),
        }
    }

    /// Reporter bound to stage `index`.
    pub(crate) fn reporter<'t>(&'t self, index: usize, stage: &'t str) -> StageReporter<'t, 'a> {
        StageReporter {
            tracker: self,
            index,
            stage,
        }
    }

    pub(crate) fn stage_started(&self, index: usize, stage: &str) {
        self.update(index, stage, ProgressEventKind::StageStarted, None, |state| {
            state.stage_percent = 0.0;
        });
    }

    pub(crate) fn stage_progress(&self, index: usize, stage: &str, progress: StageProgress) {
        let percent = if progress.percent.is_finite() {
            progress.percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.update(index, stage, ProgressEventKind::Progress, Some(progress), |state| {
            state.stage_percent = state.stage_percent.max(percent);
        });
    }

    pub(crate) fn stage_completed(&self, index: usize, stage: &str) {
        self.finish_stage(index, stage, ProgressEventKind::StageCompleted);
    }

    pub(crate) fn stage_skipped(&self, index: usize, stage: &str) {
        self.finish_stage(index, stage, ProgressEventKind::StageSkipped);
    }

    pub(crate) fn attempt_failed(
        &self,
        index: usize,
        stage: &str,
        attempt: u32,
        error: &StageError,
        will_retry: bool,
    ) {
        let kind = ProgressEventKind::AttemptFailed {
            attempt,
            error: error.clone(),
            will_retry,
        };
        let message = Some(StageProgress::default().with_message(error.message.clone()));
        self.update(index, stage, kind, message, |_| {});
    }

    fn finish_stage(&self, index: usize, stage: &str, kind: ProgressEventKind) {
        let weight = self.weight(index);
        self.update(index, stage, kind, None, |state| {
            state.completed_weight += weight;
            state.stage_percent = 0.0;
        });
    }

    fn weight(&self, index: usize) -> u64 {
        self.weights.get(index).copied().unwrap_or(1)
    }

    fn update<F>(
        &self,
        index: usize,
        stage: &str,
        kind: ProgressEventKind,
        detail: Option<StageProgress>,
        apply: F,
    ) where
        F: FnOnce(&mut TrackerState),
    {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut state);

        let finished = matches!(
            kind,
            ProgressEventKind::StageCompleted | ProgressEventKind::StageSkipped
        );
        let in_flight = if finished {
            0.0
        } else {
            self.weight(index) as f64 * state.stage_percent as f64 / 100.0
        };
        let raw = 100.0 * (state.completed_weight as f64 + in_flight) / self.total_weight as f64;
        // Only a run with every stage finished may report 100.
        let ceiling = if state.completed_weight >= self.total_weight {
            100.0
        } else {
            99.0
        };
        let percent = (raw.round().clamp(0.0, ceiling) as u8).max(state.last_percent);
        state.last_percent = percent;

        let stage_percent = if finished { 100.0 } else { state.stage_percent };
        let detail = detail.unwrap_or_default();
        let event = ProgressEvent {
            job_id: self.job_id.clone(),
            stage: stage.to_string(),
            percent,
            stage_percent,
            message: detail.message,
            item_index: detail.item_index,
            item_total: detail.item_total,
            timestamp: Utc::now(),
            kind,
        };

        self.relay.dispatch(&event);
    }

    #[cfg(test)]
    fn last_percent(&self) -> u8 {
        self.state.lock().map(|s| s.last_percent).unwrap_or(0)
    }
}

/// [`ProgressReporter`] handed to one stage attempt.
pub(crate) struct StageReporter<'t, 'a> {
    tracker: &'t ProgressTracker<'a>,
    index: usize,
    stage: &'t str,
}

impl ProgressReporter for StageReporter<'_, '_> {
    fn report(&self, progress: StageProgress) {
        self.tracker.stage_progress(self.index, self.stage, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ProgressCallback;
    use std::sync::Arc;

    fn capture(relay: &Arc<ProgressRelay>, job_id: &str) -> (Arc<Mutex<Vec<ProgressEvent>>>, crate::orchestrator::ProgressRegistration) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |event: &ProgressEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        let registration = relay.register(job_id, callback);
        (events, registration)
    }

    #[test]
    fn test_weighted_scenario() {
        let relay = Arc::new(ProgressRelay::new());
        let (events, _registration) = capture(&relay, "job-1");
        let tracker = ProgressTracker::new("job-1", vec![10, 30, 60], &relay);

        tracker.stage_started(0, "script");
        tracker.stage_completed(0, "script");
        tracker.stage_started(1, "narration");
        tracker.reporter(1, "narration").report(StageProgress::new(50.0));
        tracker.stage_completed(1, "narration");
        tracker.stage_started(2, "render");
        tracker.stage_completed(2, "render");

        let percents: Vec<u8> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind != ProgressEventKind::StageStarted)
            .map(|e| e.percent)
            .collect();
        assert_eq!(percents, vec![10, 25, 40, 100]);
    }

    #[test]
    fn test_percent_never_decreases() {
        let relay = Arc::new(ProgressRelay::new());
        let (events, _registration) = capture(&relay, "job-1");
        let tracker = ProgressTracker::new("job-1", vec![50, 50], &relay);

        tracker.stage_started(0, "a");
        for p in [40.0, 80.0, 20.0, 60.0, f32::NAN, 90.0] {
            tracker.stage_progress(0, "a", StageProgress::new(p));
        }

        let events = events.lock().unwrap();
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        let stage_percents: Vec<f32> = events.iter().map(|e| e.stage_percent).collect();
        assert!(stage_percents[1..].windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(tracker.last_percent(), 45);
    }

    #[test]
    fn test_hundred_only_after_last_stage() {
        let relay = Arc::new(ProgressRelay::new());
        let tracker = ProgressTracker::new("job-1", vec![100, 100, 1], &relay);

        tracker.stage_completed(0, "a");
        tracker.stage_completed(1, "b");
        tracker.stage_started(2, "c");
        tracker.stage_progress(2, "c", StageProgress::new(50.0));
        assert_eq!(tracker.last_percent(), 99);

        tracker.stage_progress(2, "c", StageProgress::new(100.0));
        assert_eq!(tracker.last_percent(), 99);

        tracker.stage_completed(2, "c");
        assert_eq!(tracker.last_percent(), 100);
    }

    #[test]
    fn test_zero_weights_do_not_divide_by_zero() {
        let relay = Arc::new(ProgressRelay::new());
        let tracker = ProgressTracker::new("job-1", vec![0, 0], &relay);
        tracker.stage_completed(0, "a");
        assert_eq!(tracker.last_percent(), 50);
        tracker.stage_skipped(1, "b");
        assert_eq!(tracker.last_percent(), 100);
    }

    #[test]
    fn test_attempt_failed_keeps_percent() {
        let relay = Arc::new(ProgressRelay::new());
        let (events, _registration) = capture(&relay, "job-1");
        let tracker = ProgressTracker::new("job-1", vec![100], &relay);

        tracker.stage_progress(0, "a", StageProgress::new(30.0));
        tracker.attempt_failed(
            0,
            "a",
            1,
            &StageError::new(crate::job::ErrorKind::Transient, "503"),
            true,
        );

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.percent, 30);
        assert_eq!(last.message.as_deref(), Some("503"));
        assert!(matches!(
            last.kind,
            ProgressEventKind::AttemptFailed { attempt: 1, will_retry: true, .. }
        ));
    }
}
