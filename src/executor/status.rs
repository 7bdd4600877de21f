//! Retry progress tracking for UI polling.
//!
//! The executor writes progress for each in-flight run under its breaker key;
//! readers only ever take snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

/// Snapshot of a run's retry progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryStatus {
    /// Retries issued so far (0 while the initial attempt runs).
    pub attempt: u32,
    /// Retry budget for the failure currently being retried.
    ///
    /// With the per-category policy the budget depends on the first failure's
    /// category, so this is 0 until that failure has been classified. An
    /// explicit `RunOptions` config is reported from the start.
    pub max_retries: u32,
    /// Milliseconds until the next attempt; 0 when not waiting.
    pub ms_until_next_retry: u64,
    /// True once the run has failed at least once and is retrying.
    pub is_retrying: bool,
}

#[derive(Debug)]
struct Progress {
    run_id: u64,
    attempt: u32,
    max_retries: u32,
    next_retry_at: Option<Instant>,
}

/// Shared map of run progress keyed by breaker key.
#[derive(Debug, Clone, Default)]
pub(crate) struct RetryTracker {
    runs: Arc<DashMap<String, Progress>>,
    next_run_id: Arc<AtomicU64>,
}

impl RetryTracker {
    /// Registers a new run and returns its id.
    pub(crate) fn begin(&self, key: &str, max_retries: u32) -> u64 {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        self.runs.insert(
            key.to_string(),
            Progress {
                run_id,
                attempt: 0,
                max_retries,
                next_retry_at: None,
            },
        );
        run_id
    }

    /// Records that a retry was scheduled after `delay`.
    pub(crate) fn scheduled(
        &self,
        key: &str,
        run_id: u64,
        attempt: u32,
        max_retries: u32,
        delay: Duration,
    ) {
        if let Some(mut progress) = self.runs.get_mut(key) {
            if progress.run_id == run_id {
                progress.attempt = attempt;
                progress.max_retries = max_retries;
                progress.next_retry_at = Some(Instant::now() + delay);
            }
        }
    }

    /// Removes the run, unless a newer run for the same key replaced it.
    pub(crate) fn finish(&self, key: &str, run_id: u64) {
        self.runs.remove_if(key, |_, progress| progress.run_id == run_id);
    }

    pub(crate) fn status(&self, key: &str) -> Option<RetryStatus> {
        let progress = self.runs.get(key)?;
        let ms_until_next_retry = progress
            .next_retry_at
            .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64)
            .unwrap_or(0);
        Some(RetryStatus {
            attempt: progress.attempt,
            max_retries: progress.max_retries,
            ms_until_next_retry,
            is_retrying: progress.attempt > 0,
        })
    }
}

/// Removes a run's progress when the run ends, including when its future is
/// dropped mid-flight.
pub(crate) struct RunGuard<'a> {
    tracker: &'a RetryTracker,
    key: &'a str,
    run_id: u64,
}

impl<'a> RunGuard<'a> {
    pub(crate) fn new(tracker: &'a RetryTracker, key: &'a str, max_retries: u32) -> Self {
        let run_id = tracker.begin(key, max_retries);
        Self {
            tracker,
            key,
            run_id,
        }
    }

    pub(crate) fn run_id(&self) -> u64 {
        self.run_id
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.key, self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_status_counts_down() {
        let tracker = RetryTracker::default();
        let run_id = tracker.begin("feed_load_page", 3);

        let status = tracker.status("feed_load_page").unwrap();
        assert_eq!(status.attempt, 0);
        assert!(!status.is_retrying);
        assert_eq!(status.ms_until_next_retry, 0);

        tracker.scheduled("feed_load_page", run_id, 1, 3, Duration::from_millis(2_000));
        tokio::time::advance(Duration::from_millis(500)).await;

        let status = tracker.status("feed_load_page").unwrap();
        assert_eq!(status.attempt, 1);
        assert!(status.is_retrying);
        assert_eq!(status.ms_until_next_retry, 1_500);
    }

    #[test]
    fn test_finish_ignores_stale_run() {
        let tracker = RetryTracker::default();
        let old = tracker.begin("k", 2);
        let new = tracker.begin("k", 2);

        tracker.finish("k", old);
        assert!(tracker.status("k").is_some());
        tracker.finish("k", new);
        assert!(tracker.status("k").is_none());
    }

    #[test]
    fn test_guard_clears_on_drop() {
        let tracker = RetryTracker::default();
        {
            let _guard = RunGuard::new(&tracker, "k", 1);
            assert!(tracker.status("k").is_some());
        }
        assert!(tracker.status("k").is_none());
    }
}
