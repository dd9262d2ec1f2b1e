//! Combining worker results into a simulation result.
//!
//! Aggregation is order independent: outcomes are sorted before any
//! summation and factor values are sorted before averaging, so any
//! permutation of the same results produces bit-identical output.

use crate::error::AggregateError;
use crate::task::WorkerResult;
use gridsim_env::ScenarioId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 0.001;

/// Summary statistics of the outcome samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDistribution {
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub p25: f64,
    pub p75: f64,
    pub min: f64,
    pub max: f64,
}

/// Empirical percentile interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFactor {
    pub name: String,
    /// Mean of the per-task averages
    pub impact: f64,
    /// `max(0, 1 - sqrt(variance))` of the per-task averages
    pub confidence: f64,
}

/// Final output of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario_id: ScenarioId,

    /// Iterations that contributed outcomes (failed tasks excluded)
    pub iterations: u32,
    pub outcome_distribution: OutcomeDistribution,
    pub confidence_interval: ConfidenceInterval,

    /// Sorted by descending absolute impact
    pub key_factors: Vec<KeyFactor>,
    pub execution_time_ms: u64,

    /// `std_dev / sqrt(n)`
    pub standard_error: f64,
    pub converged: bool,
    pub failed_tasks: u32,
}

/// Aggregation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregator {
    pub confidence_level: f64,
    pub convergence_threshold: f64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
        }
    }
}

impl Aggregator {
    pub fn new(confidence_level: f64, convergence_threshold: f64) -> Self {
        Self {
            confidence_level,
            convergence_threshold,
        }
    }

    /// Combines every successful result.
    ///
    /// Results carrying an error only count towards `failed_tasks`.
    /// Returns [`AggregateError::NoResults`] when no outcome survives.
    pub fn aggregate(&self, results: &[WorkerResult]) -> Result<SimulationResult, AggregateError> {
        let successful: Vec<&WorkerResult> = results.iter().filter(|r| r.is_success()).collect();
        let failed_tasks = (results.len() - successful.len()) as u32;

        let mut outcomes: Vec<f64> = successful.iter().flat_map(|r| r.outcomes.iter().copied()).collect();
        if outcomes.is_empty() {
            return Err(AggregateError::NoResults);
        }
        outcomes.sort_by(f64::total_cmp);

        let scenario_id = successful
            .first()
            .map(|r| r.scenario_id)
            .ok_or(AggregateError::NoResults)?;
        let iterations = successful.iter().map(|r| r.iterations).sum();
        let execution_time_ms = results.iter().map(|r| r.execution_time_ms).max().unwrap_or(0);

        let outcome_distribution = describe(&outcomes);
        let standard_error = outcome_distribution.std_dev / (outcomes.len() as f64).sqrt();

        Ok(SimulationResult {
            scenario_id,
            iterations,
            outcome_distribution,
            confidence_interval: self.interval(&outcomes),
            key_factors: key_factors(&successful),
            execution_time_ms,
            standard_error,
            converged: standard_error <= self.convergence_threshold,
            failed_tasks,
        })
    }

    fn interval(&self, sorted: &[f64]) -> ConfidenceInterval {
        let n = sorted.len();
        let tail = (1.0 - self.confidence_level) / 2.0;
        let lower = ((n as f64 * tail).floor() as usize).min(n - 1);
        let upper = ((n as f64 * (1.0 - tail)).floor() as usize).min(n - 1);
        ConfidenceInterval {
            lower: sorted[lower],
            upper: sorted[upper],
            level: self.confidence_level,
        }
    }
}

/// Aggregates with the default confidence level and convergence threshold.
pub fn aggregate(results: &[WorkerResult]) -> Result<SimulationResult, AggregateError> {
    Aggregator::default().aggregate(results)
}

/// Statistics of a sorted, non-empty slice.
fn describe(sorted: &[f64]) -> OutcomeDistribution {
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    let percentile = |q: f64| sorted[((n as f64 * q).floor() as usize).min(n - 1)];

    OutcomeDistribution {
        mean,
        median,
        std_dev: variance.sqrt(),
        p25: percentile(0.25),
        p75: percentile(0.75),
        min: sorted[0],
        max: sorted[n - 1],
    }
}

fn key_factors(results: &[&WorkerResult]) -> Vec<KeyFactor> {
    let mut per_factor: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for result in results {
        for (name, value) in &result.factors {
            per_factor.entry(name.as_str()).or_default().push(*value);
        }
    }

    let mut factors: Vec<KeyFactor> = per_factor
        .into_iter()
        .map(|(name, mut values)| {
            values.sort_by(f64::total_cmp);
            let n = values.len() as f64;
            let impact = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - impact).powi(2)).sum::<f64>() / n;
            KeyFactor {
                name: name.to_string(),
                impact,
                confidence: (1.0 - variance.sqrt()).max(0.0),
            }
        })
        .collect();

    factors.sort_by(|a, b| {
        b.impact
            .abs()
            .total_cmp(&a.impact.abs())
            .then_with(|| a.name.cmp(&b.name))
    });
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ScenarioBuilder;
    use crate::sampler::Sampler;
    use crate::task::{split_tasks, SamplerConfig, TaskConfig, TaskId};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn result(index: u32, outcomes: Vec<f64>, factors: &[(&str, f64)]) -> WorkerResult {
        let scenario = ScenarioId::from_seed(7);
        WorkerResult {
            task_id: TaskId { scenario, index },
            scenario_id: scenario,
            iterations: outcomes.len() as u32,
            outcomes,
            factors: factors.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            execution_time_ms: 10 + index as u64,
            error: None,
        }
    }

    fn failure(index: u32) -> WorkerResult {
        let mut r = result(index, Vec::new(), &[]);
        r.iterations = 0;
        r.error = Some("boom".to_string());
        r
    }

    #[test]
    fn test_statistics() {
        let results = vec![
            result(0, vec![0.1, 0.2, 0.3, 0.4], &[]),
            result(1, vec![0.5, 0.6, 0.7, 0.8], &[]),
        ];
        let summary = aggregate(&results).unwrap();
        let d = summary.outcome_distribution;

        assert_eq!(summary.iterations, 8);
        assert_abs_diff_eq!(d.mean, 0.45, epsilon = 1e-12);
        assert_abs_diff_eq!(d.median, 0.45, epsilon = 1e-12);
        assert_eq!(d.p25, 0.3);
        assert_eq!(d.p75, 0.7);
        assert_eq!(d.min, 0.1);
        assert_eq!(d.max, 0.8);
        assert_abs_diff_eq!(d.std_dev, 0.0525f64.sqrt(), epsilon = 1e-12);
        assert_eq!(summary.execution_time_ms, 11);
    }

    #[test]
    fn test_confidence_interval_indices() {
        let outcomes: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let summary = aggregate(&[result(0, outcomes, &[])]).unwrap();

        // floor(100 * 0.025) = 2, floor(100 * 0.975) = 97
        assert_eq!(summary.confidence_interval.lower, 0.02);
        assert_eq!(summary.confidence_interval.upper, 0.97);
        assert_eq!(summary.confidence_interval.level, 0.95);
    }

    #[test]
    fn test_single_outcome() {
        let summary = aggregate(&[result(0, vec![0.3], &[])]).unwrap();
        assert_eq!(summary.outcome_distribution.median, 0.3);
        assert_eq!(summary.confidence_interval.upper, 0.3);
        assert_eq!(summary.standard_error, 0.0);
        assert!(summary.converged);
    }

    #[test]
    fn test_no_results() {
        assert_eq!(aggregate(&[]), Err(AggregateError::NoResults));
        assert_eq!(aggregate(&[failure(0), failure(1)]), Err(AggregateError::NoResults));
    }

    #[test]
    fn test_partial_failure_counts_successful_iterations_only() {
        let results = vec![
            result(0, vec![0.5; 2_500], &[]),
            failure(1),
            result(2, vec![0.5; 2_500], &[]),
            result(3, vec![0.5; 2_500], &[]),
        ];
        let summary = aggregate(&results).unwrap();
        assert_eq!(summary.iterations, 7_500);
        assert_eq!(summary.failed_tasks, 1);
    }

    #[test]
    fn test_key_factors_sorted_by_absolute_impact() {
        let results = vec![
            result(0, vec![0.5], &[("momentum", -0.8), ("field_position", 0.3)]),
            result(1, vec![0.5], &[("momentum", -0.6), ("field_position", 0.3)]),
        ];
        let factors = aggregate(&results).unwrap().key_factors;

        assert_eq!(factors[0].name, "momentum");
        assert_abs_diff_eq!(factors[0].impact, -0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(factors[0].confidence, 0.9, epsilon = 1e-12);
        assert_eq!(factors[1].name, "field_position");
        assert_eq!(factors[1].confidence, 1.0);
    }

    #[test]
    fn test_always_false_hard_constraint_aggregates_to_zero() {
        let scenario = Arc::new(
            ScenarioBuilder::new("blocked")
                .iterations(4_000)
                .add_normal_variable("x", 0.5, 0.1)
                .add_hard_constraint_with_penalty("never", "false", 0.0)
                .build()
                .unwrap(),
        );
        let config = TaskConfig {
            sampler: SamplerConfig::default(),
            seed: 11,
        };
        let sampler = Sampler::default();
        let results: Vec<WorkerResult> = split_tasks(&scenario, 4, config).iter().map(|t| sampler.run(t)).collect();

        let summary = aggregate(&results).unwrap();
        assert_eq!(summary.outcome_distribution.mean, 0.0);
        assert_eq!(summary.outcome_distribution.std_dev, 0.0);
        assert_eq!(summary.iterations, 4_000);
    }

    #[test]
    fn test_normal_scenario_across_four_tasks() {
        let scenario = Arc::new(
            ScenarioBuilder::new("normal")
                .iterations(10_000)
                .add_normal_variable("x", 0.5, 0.1)
                .build()
                .unwrap(),
        );
        let config = TaskConfig {
            sampler: SamplerConfig::default(),
            seed: 2024,
        };
        let tasks = split_tasks(&scenario, 4, config);
        assert!(tasks.iter().all(|t| t.iterations() == 2_500));

        let sampler = Sampler::default();
        let results: Vec<WorkerResult> = tasks.iter().map(|t| sampler.run(t)).collect();
        let summary = aggregate(&results).unwrap();

        assert_eq!(summary.iterations, 10_000);
        assert_abs_diff_eq!(summary.outcome_distribution.mean, 0.5, epsilon = 0.01);
        assert_eq!(summary.scenario_id, scenario.id);
    }

    proptest! {
        #[test]
        fn prop_order_independent(
            chunks in prop::collection::vec(prop::collection::vec(0.0f64..1.0, 1..40), 1..8),
            seed in any::<u64>(),
        ) {
            let results: Vec<WorkerResult> = chunks
                .iter()
                .enumerate()
                .map(|(i, c)| result(i as u32, c.clone(), &[("momentum", c[0])]))
                .collect();

            let mut shuffled = results.clone();
            // deterministic Fisher-Yates driven by the seed
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let a = aggregate(&results).unwrap();
            let b = aggregate(&shuffled).unwrap();
            prop_assert_eq!(a.outcome_distribution, b.outcome_distribution);
            prop_assert_eq!(a.confidence_interval, b.confidence_interval);
            prop_assert_eq!(a.key_factors, b.key_factors);
        }
    }
}
