//! The sink stages report progress through.

use serde::{Deserialize, Serialize};

/// One progress report from inside a stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageProgress {
    /// Stage-local completion, 0.0-100.0.
    pub percent: f32,
    pub message: Option<String>,
    pub item_index: Option<u32>,
    pub item_total: Option<u32>,
}

impl StageProgress {
    pub fn new(percent: f32) -> Self {
        Self {
            percent,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach `index` of `total` items, e.g. scene 3 of 8.
    pub fn with_item(mut self, index: u32, total: u32) -> Self {
        self.item_index = Some(index);
        self.item_total = Some(total);
        self
    }

    /// Percent of `index` completed items out of `total`.
    pub fn for_items(index: u32, total: u32) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (index as f32 / total as f32) * 100.0
        };
        Self::new(percent).with_item(index, total)
    }
}

/// Callback contract handed to a running stage.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: StageProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(StageProgress) + Send + Sync,
{
    fn report(&self, progress: StageProgress) {
        self(progress)
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _progress: StageProgress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_for_items() {
        let p = StageProgress::for_items(3, 4);
        assert_eq!(p.percent, 75.0);
        assert_eq!(p.item_index, Some(3));
        assert_eq!(p.item_total, Some(4));
        assert_eq!(StageProgress::for_items(0, 0).percent, 100.0);
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |p: StageProgress| seen.lock().unwrap().push(p.percent);

        reporter.report(StageProgress::new(10.0));
        reporter.report(StageProgress::new(50.0).with_message("halfway"));

        assert_eq!(*seen.lock().unwrap(), vec![10.0, 50.0]);
    }
}
