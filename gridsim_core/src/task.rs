//! Units of work handed to workers and what they hand back.

use crate::scenario::Scenario;
use gridsim_env::ScenarioId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tunables of the per-iteration sampling logic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Scale applied to the summed correlation adjustment
    pub correlation_damping: f64,

    /// Penalty for soft constraints that do not declare one
    pub default_soft_penalty: f64,

    /// Outcome for hard constraints that do not declare one
    pub default_hard_penalty: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            correlation_damping: 0.1,
            default_soft_penalty: 0.1,
            default_hard_penalty: 0.0,
        }
    }
}

/// Per-task execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub sampler: SamplerConfig,

    /// Run seed; each task derives its own stream from this and its range
    pub seed: u64,
}

/// Identifies a task within its scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub scenario: ScenarioId,
    pub index: u32,
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.scenario, self.index)
    }
}

/// A contiguous slice `[start_iteration, end_iteration)` of a scenario.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub id: TaskId,
    pub scenario_id: ScenarioId,
    pub start_iteration: u32,
    pub end_iteration: u32,
    pub scenario: Arc<Scenario>,
    pub config: TaskConfig,
}

impl WorkerTask {
    pub fn iterations(&self) -> u32 {
        self.end_iteration.saturating_sub(self.start_iteration)
    }

    /// Seed for this task's RNG stream.
    pub fn stream_seed(&self) -> u64 {
        self.config
            .seed
            .wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add(self.start_iteration as u64)
    }
}

/// Output of one task. Produced once, consumed once by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: TaskId,
    pub scenario_id: ScenarioId,
    pub iterations: u32,
    pub outcomes: Vec<f64>,

    /// Factor name -> average over the task's iterations
    pub factors: BTreeMap<String, f64>,

    pub execution_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResult {
    /// Zero-iteration result carrying a failure.
    pub fn failed(task: &WorkerTask, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            task_id: task.id,
            scenario_id: task.scenario_id,
            iterations: 0,
            outcomes: Vec::new(),
            factors: BTreeMap::new(),
            execution_time_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Live progress of an in-flight scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationProgress {
    pub scenario_id: ScenarioId,
    pub completed_iterations: u32,
    pub total_iterations: u32,
    pub estimated_time_remaining_ms: u64,
}

impl SimulationProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_iterations == 0 {
            return 1.0;
        }
        self.completed_iterations as f64 / self.total_iterations as f64
    }
}

/// Splits a scenario into contiguous, non-overlapping tasks.
///
/// Each task gets `ceil(iterations / workers)` iterations except possibly
/// the last, so the number of tasks never exceeds `workers` and the ranges
/// exactly cover `0..iterations`.
pub fn split_tasks(scenario: &Arc<Scenario>, workers: usize, config: TaskConfig) -> Vec<WorkerTask> {
    let total = scenario.iterations;
    let workers = workers.max(1) as u32;
    let per_task = total.div_ceil(workers).max(1);

    let mut tasks = Vec::new();
    let mut start = 0u32;
    while start < total {
        let end = start.saturating_add(per_task).min(total);
        tasks.push(WorkerTask {
            id: TaskId {
                scenario: scenario.id,
                index: tasks.len() as u32,
            },
            scenario_id: scenario.id,
            start_iteration: start,
            end_iteration: end,
            scenario: Arc::clone(scenario),
            config,
        });
        start = end;
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ScenarioBuilder;
    use proptest::prelude::*;

    fn scenario(iterations: u32) -> Arc<Scenario> {
        Arc::new(
            ScenarioBuilder::new("split")
                .iterations(iterations)
                .add_normal_variable("x", 0.5, 0.1)
                .build()
                .unwrap(),
        )
    }

    fn config() -> TaskConfig {
        TaskConfig {
            sampler: SamplerConfig::default(),
            seed: 1,
        }
    }

    #[test]
    fn test_even_split() {
        let tasks = split_tasks(&scenario(10_000), 4, config());
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| t.iterations() == 2_500));
    }

    #[test]
    fn test_uneven_split_last_task_shorter() {
        let tasks = split_tasks(&scenario(10), 4, config());
        let sizes: Vec<u32> = tasks.iter().map(|t| t.iterations()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_more_workers_than_iterations() {
        let tasks = split_tasks(&scenario(3), 8, config());
        assert_eq!(tasks.len(), 3);
    }

    #[test]
    fn test_stream_seeds_differ_per_task() {
        let tasks = split_tasks(&scenario(100), 2, config());
        assert_ne!(tasks[0].stream_seed(), tasks[1].stream_seed());
    }

    proptest! {
        #[test]
        fn prop_iteration_conservation(iterations in 1u32..200_000, workers in 1usize..64) {
            let tasks = split_tasks(&scenario(iterations), workers, config());

            let total: u32 = tasks.iter().map(|t| t.iterations()).sum();
            prop_assert_eq!(total, iterations);
            prop_assert!(tasks.len() <= workers);
            prop_assert_eq!(tasks[0].start_iteration, 0);
            prop_assert_eq!(tasks.last().unwrap().end_iteration, iterations);
            for pair in tasks.windows(2) {
                prop_assert_eq!(pair[0].end_iteration, pair[1].start_iteration);
            }
        }
    }
}
