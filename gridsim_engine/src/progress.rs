//! Progress tracking and cooperative cancellation for in-flight scenarios.

use gridsim_core::SimulationProgress;
use gridsim_env::ScenarioId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Entry {
    progress: SimulationProgress,
    started: Duration,
    cancelled: Arc<AtomicBool>,
}

/// Tracks every scenario between dispatch and aggregation.
///
/// `completed_iterations` only ever grows. Removing an entry (on finish or
/// cancel) makes later updates for it no-ops.
#[derive(Default)]
pub struct ProgressTracker {
    entries: Mutex<HashMap<ScenarioId, Entry>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ScenarioId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking and returns the scenario's cancellation flag.
    pub fn start(&self, scenario_id: ScenarioId, total_iterations: u32, now: Duration) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries().insert(
            scenario_id,
            Entry {
                progress: SimulationProgress {
                    scenario_id,
                    completed_iterations: 0,
                    total_iterations,
                    estimated_time_remaining_ms: 0,
                },
                started: now,
                cancelled: Arc::clone(&cancelled),
            },
        );
        cancelled
    }

    /// Adds finished iterations and refreshes the estimate.
    ///
    /// The estimate extrapolates the elapsed time since `start` over the
    /// remaining iterations; it is 0 until something has completed.
    pub fn record(&self, scenario_id: ScenarioId, iterations: u32, now: Duration) -> Option<SimulationProgress> {
        let mut entries = self.entries();
        let entry = entries.get_mut(&scenario_id)?;
        let progress = &mut entry.progress;

        progress.completed_iterations = progress
            .completed_iterations
            .saturating_add(iterations)
            .min(progress.total_iterations);

        let completed = progress.completed_iterations as u128;
        let remaining = (progress.total_iterations - progress.completed_iterations) as u128;
        progress.estimated_time_remaining_ms = if completed == 0 {
            0
        } else {
            let elapsed_ms = now.saturating_sub(entry.started).as_millis();
            (elapsed_ms * remaining / completed) as u64
        };
        Some(progress.clone())
    }

    pub fn get(&self, scenario_id: ScenarioId) -> Option<SimulationProgress> {
        self.entries().get(&scenario_id).map(|e| e.progress.clone())
    }

    /// Signals cancellation and stops tracking. False if not tracked.
    pub fn cancel(&self, scenario_id: ScenarioId) -> bool {
        match self.entries().remove(&scenario_id) {
            Some(entry) => {
                entry.cancelled.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, scenario_id: ScenarioId) {
        self.entries().remove(&scenario_id);
    }

    /// Number of scenarios currently tracked.
    pub fn active(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_from_recorded_start() {
        let tracker = ProgressTracker::new();
        let id = ScenarioId::from_seed(1);
        tracker.start(id, 1_000, Duration::from_secs(10));

        assert_eq!(tracker.get(id).unwrap().estimated_time_remaining_ms, 0);

        let p = tracker.record(id, 250, Duration::from_secs(12)).unwrap();
        assert_eq!(p.completed_iterations, 250);
        // 2s for 250 iterations, 750 to go
        assert_eq!(p.estimated_time_remaining_ms, 6_000);

        let p = tracker.record(id, 750, Duration::from_secs(14)).unwrap();
        assert_eq!(p.estimated_time_remaining_ms, 0);
        assert_eq!(p.fraction(), 1.0);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let tracker = ProgressTracker::new();
        let id = ScenarioId::from_seed(2);
        tracker.start(id, 10, Duration::ZERO);

        let p = tracker.record(id, 25, Duration::from_millis(5)).unwrap();
        assert_eq!(p.completed_iterations, 10);
    }

    #[test]
    fn test_cancel_sets_flag_and_stops_tracking() {
        let tracker = ProgressTracker::new();
        let id = ScenarioId::from_seed(3);
        let flag = tracker.start(id, 100, Duration::ZERO);

        assert!(tracker.cancel(id));
        assert!(flag.load(Ordering::Acquire));
        assert!(tracker.get(id).is_none());
        assert!(tracker.record(id, 10, Duration::ZERO).is_none());
        assert!(!tracker.cancel(id));
        assert_eq!(tracker.active(), 0);
    }
}
