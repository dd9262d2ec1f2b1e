//! Per-task Monte Carlo sampling.
//!
//! [`Sampler::run`] turns one [`WorkerTask`] into one [`WorkerResult`].
//! It is a pure function of the task: the RNG stream is seeded from the
//! task, nothing is shared with other tasks, and any failure is folded into
//! the result instead of being returned.
//!
//! Per iteration:
//! 1. Draw every variable from its distribution.
//! 2. Add `damping * sum(coefficient * raw draw of target)` to each
//!    correlated variable, then clamp to bounds and round discrete values.
//! 3. Check constraints in declaration order. A failing hard constraint
//!    makes its penalty the outcome and ends the iteration; failing soft
//!    constraints accumulate their penalties.
//! 4. Compute the outcome, subtract soft penalties and clamp to [0, 1].

use crate::error::SamplerError;
use crate::expression::Expr;
use crate::game_state::GameState;
use crate::scenario::{ConstraintKind, Scenario, VariableKind};
use crate::task::{SamplerConfig, WorkerResult, WorkerTask};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Score margin at which the situational adjustment saturates.
const SCORE_SATURATION: f64 = 28.0;

/// One iteration's sampled values, handed to the outcome function.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    /// Absolute iteration index within the scenario
    pub iteration: u32,
    pub scenario: &'a Scenario,

    /// Adjusted values, indexed like `scenario.variables`
    pub values: &'a [f64],
}

impl<'a> Sample<'a> {
    pub fn game_state(&self) -> &'a GameState {
        &self.scenario.game_state
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.scenario.variable_index(name).map(|i| self.values[i])
    }
}

/// Maps an iteration's sampled values to a raw outcome.
///
/// Must be pure. The sampler subtracts soft penalties from the returned
/// value and clamps the result to [0, 1].
pub trait OutcomeFunction: Send + Sync {
    fn outcome(&self, sample: &Sample<'_>) -> Result<f64, SamplerError>;
}

/// Default outcome: a win probability.
///
/// The weighted mean of the variable values (bounded variables are first
/// normalised onto [0, 1]) plus `0.5 * score_factor * (1 - time_factor)`,
/// so a lead matters more as the clock runs out.
#[derive(Debug, Clone, Copy, Default)]
pub struct WinProbabilityModel;

impl OutcomeFunction for WinProbabilityModel {
    fn outcome(&self, sample: &Sample<'_>) -> Result<f64, SamplerError> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (variable, value) in sample.scenario.variables.iter().zip(sample.values) {
            if variable.weight == 0.0 {
                continue;
            }
            let value = match variable.bounds {
                Some(bounds) => bounds.normalize(*value),
                None => *value,
            };
            weighted += variable.weight * value;
            total_weight += variable.weight;
        }
        let base = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.5
        };

        let state = sample.game_state();
        let situational = 0.5 * score_factor(state) * (1.0 - state.time_fraction_remaining());
        Ok((base + situational).clamp(0.0, 1.0))
    }
}

fn score_factor(state: &GameState) -> f64 {
    (state.score_differential() as f64 / SCORE_SATURATION).clamp(-1.0, 1.0)
}

/// Diagnostic factors. They depend only on the game state, so every
/// iteration of a task yields the same values and the task average equals
/// them.
pub fn game_factors(state: &GameState) -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("momentum".to_string(), state.momentum),
        ("time_remaining".to_string(), state.time_fraction_remaining()),
        ("field_position".to_string(), state.field_position as f64 / 100.0),
        ("score_differential".to_string(), score_factor(state)),
    ])
}

/// Runs worker tasks.
#[derive(Clone)]
pub struct Sampler {
    outcome: Arc<dyn OutcomeFunction>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(Arc::new(WinProbabilityModel))
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").finish_non_exhaustive()
    }
}

/// A constraint with its condition parsed.
struct CompiledConstraint<'a> {
    name: &'a str,
    kind: ConstraintKind,
    expr: Expr,
    penalty: f64,
}

impl Sampler {
    pub fn new(outcome: Arc<dyn OutcomeFunction>) -> Self {
        Self { outcome }
    }

    /// Executes every iteration of `task`. Never fails: errors come back as
    /// a zero-iteration result with `error` set.
    pub fn run(&self, task: &WorkerTask) -> WorkerResult {
        let started = Instant::now();
        match self.run_iterations(task) {
            Ok(outcomes) => WorkerResult {
                task_id: task.id,
                scenario_id: task.scenario_id,
                iterations: outcomes.len() as u32,
                factors: if outcomes.is_empty() {
                    BTreeMap::new()
                } else {
                    game_factors(&task.scenario.game_state)
                },
                outcomes,
                execution_time_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => WorkerResult::failed(task, e.to_string(), started.elapsed().as_millis() as u64),
        }
    }

    fn run_iterations(&self, task: &WorkerTask) -> Result<Vec<f64>, SamplerError> {
        let scenario = task.scenario.as_ref();
        if task.start_iteration > task.end_iteration || task.end_iteration > scenario.iterations {
            return Err(SamplerError::InvalidTask(format!(
                "range {}..{} outside 0..{}",
                task.start_iteration, task.end_iteration, scenario.iterations
            )));
        }

        let config = &task.config.sampler;
        let constraints = compile_constraints(scenario, config)?;
        let index: HashMap<&str, usize> = scenario
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.as_str(), i))
            .collect();

        // Correlation targets resolved to indices once per task.
        let mut couplings: Vec<Vec<(usize, f64)>> = Vec::with_capacity(scenario.variables.len());
        for variable in &scenario.variables {
            let mut targets = Vec::with_capacity(variable.correlations.len());
            for correlation in &variable.correlations {
                let target = index.get(correlation.target.as_str()).ok_or_else(|| {
                    SamplerError::InvalidTask(format!(
                        "variable '{}' correlates with undeclared '{}'",
                        variable.name, correlation.target
                    ))
                })?;
                targets.push((*target, correlation.coefficient));
            }
            couplings.push(targets);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(task.stream_seed());
        let mut raw = vec![0.0; scenario.variables.len()];
        let mut values = vec![0.0; scenario.variables.len()];
        let mut outcomes = Vec::with_capacity(task.iterations() as usize);

        for iteration in task.start_iteration..task.end_iteration {
            for (slot, variable) in raw.iter_mut().zip(&scenario.variables) {
                *slot = variable.distribution.sample(&mut rng);
            }

            for (i, variable) in scenario.variables.iter().enumerate() {
                let adjustment: f64 = couplings[i].iter().map(|(t, c)| c * raw[*t]).sum();
                let mut value = raw[i] + adjustment * config.correlation_damping;
                if let Some(bounds) = variable.bounds {
                    value = bounds.clamp(value);
                }
                if variable.kind == VariableKind::Discrete {
                    value = value.round();
                }
                values[i] = value;
            }

            let game_state = &scenario.game_state;
            let bindings = |name: &str| index.get(name).map(|i| values[*i]).or_else(|| game_state.field(name));

            let mut soft_penalty = 0.0;
            let mut forced = None;
            for constraint in &constraints {
                let holds = constraint
                    .expr
                    .holds(&bindings)
                    .map_err(|source| SamplerError::Constraint {
                        constraint: constraint.name.to_string(),
                        source,
                    })?;
                if holds {
                    continue;
                }
                match constraint.kind {
                    ConstraintKind::Hard => {
                        forced = Some(constraint.penalty);
                        break;
                    }
                    ConstraintKind::Soft => soft_penalty += constraint.penalty,
                }
            }

            let outcome = match forced {
                Some(penalty) => penalty,
                None => {
                    let sample = Sample {
                        iteration,
                        scenario,
                        values: &values,
                    };
                    let raw_outcome = self.outcome.outcome(&sample)?;
                    if !raw_outcome.is_finite() {
                        return Err(SamplerError::NonFinite(iteration));
                    }
                    (raw_outcome - soft_penalty).clamp(0.0, 1.0)
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

fn compile_constraints<'a>(
    scenario: &'a Scenario,
    config: &SamplerConfig,
) -> Result<Vec<CompiledConstraint<'a>>, SamplerError> {
    scenario
        .constraints
        .iter()
        .map(|c| -> Result<CompiledConstraint<'a>, SamplerError> {
            let expr = Expr::parse(&c.condition).map_err(|source| SamplerError::Constraint {
                constraint: c.name.clone(),
                source,
            })?;
            let penalty = c.penalty.unwrap_or(match c.kind {
                ConstraintKind::Hard => config.default_hard_penalty,
                ConstraintKind::Soft => config.default_soft_penalty,
            });
            Ok(CompiledConstraint {
                name: &c.name,
                kind: c.kind,
                expr,
                penalty,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ScenarioBuilder;
    use crate::task::{split_tasks, TaskConfig};
    use approx::assert_abs_diff_eq;

    fn config(seed: u64) -> TaskConfig {
        TaskConfig {
            sampler: SamplerConfig::default(),
            seed,
        }
    }

    fn single_task(scenario: Scenario, seed: u64) -> WorkerTask {
        let mut tasks = split_tasks(&Arc::new(scenario), 1, config(seed));
        tasks.remove(0)
    }

    #[test]
    fn test_normal_variable_mean() {
        let scenario = ScenarioBuilder::new("normal")
            .iterations(10_000)
            .add_normal_variable("x", 0.5, 0.1)
            .build()
            .unwrap();
        let tasks = split_tasks(&Arc::new(scenario), 4, config(42));
        let sampler = Sampler::default();

        let outcomes: Vec<f64> = tasks.iter().flat_map(|t| sampler.run(t).outcomes).collect();
        assert_eq!(outcomes.len(), 10_000);
        let mean = outcomes.iter().sum::<f64>() / outcomes.len() as f64;
        assert_abs_diff_eq!(mean, 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_failing_hard_constraint_yields_exact_penalty() {
        let scenario = ScenarioBuilder::new("hard")
            .iterations(500)
            .add_uniform_variable("x", 0.0, 1.0)
            .add_soft_constraint("never", "false")
            .add_hard_constraint_with_penalty("x_small", "x < 0.5", 0.25)
            .build()
            .unwrap();
        let result = Sampler::default().run(&single_task(scenario.clone(), 3));

        let task = single_task(scenario, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(task.stream_seed());
        for outcome in &result.outcomes {
            let x = task.scenario.variables[0].distribution.sample(&mut rng);
            if x >= 0.5 {
                assert_eq!(*outcome, 0.25);
            } else {
                // the always-failing soft constraint still applies
                assert_abs_diff_eq!(*outcome, (x - 0.1).clamp(0.0, 1.0), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_always_false_hard_constraint() {
        let scenario = ScenarioBuilder::new("blocked")
            .iterations(1_000)
            .add_normal_variable("x", 0.5, 0.1)
            .add_hard_constraint("never", "false")
            .build()
            .unwrap();
        let result = Sampler::default().run(&single_task(scenario, 9));
        assert_eq!(result.iterations, 1_000);
        assert!(result.outcomes.iter().all(|o| *o == 0.0));
    }

    #[test]
    fn test_same_seed_same_outcomes() {
        let scenario = ScenarioBuilder::red_zone(GameState::default())
            .unwrap()
            .iterations(2_000)
            .build()
            .unwrap();
        let a = Sampler::default().run(&single_task(scenario.clone(), 77));
        let b = Sampler::default().run(&single_task(scenario, 77));
        assert_eq!(a.outcomes, b.outcomes);
    }

    #[test]
    fn test_unknown_identifier_becomes_task_error() {
        let mut scenario = ScenarioBuilder::new("typo")
            .iterations(10)
            .add_normal_variable("x", 0.5, 0.1)
            .add_hard_constraint("typo", "x > 0")
            .build()
            .unwrap();
        // Skips validation, as an unchecked deserialized scenario would
        scenario.constraints[0].condition = "y > 0".to_string();
        let result = Sampler::default().run(&single_task(scenario, 1));

        assert!(!result.is_success());
        assert_eq!(result.iterations, 0);
        assert!(result.outcomes.is_empty());
        assert!(result.error.unwrap().contains("'y'"));
    }

    #[test]
    fn test_bounds_and_rounding() {
        let scenario = ScenarioBuilder::new("bounded")
            .iterations(1_000)
            .add_normal_variable("yards", 5.0, 10.0)
            .with_bounds("yards", 0.0, 10.0)
            .unwrap()
            .add_poisson_variable("sacks", 2.0)
            .add_normal_variable("pressure", 4.0, 1.0)
            .add_correlation("sacks", "pressure", 1.0)
            .unwrap()
            .add_hard_constraint_with_penalty("clamped", "yards >= 0 && yards <= 10", -1.0)
            .add_hard_constraint_with_penalty("integral", "sacks % 1 == 0", -1.0)
            .build()
            .unwrap();
        let result = Sampler::default().run(&single_task(scenario, 5));
        assert!(result.outcomes.iter().all(|o| *o >= 0.0));
    }

    #[test]
    fn test_correlation_adjustment_replays_stream() {
        let scenario = ScenarioBuilder::new("correlated")
            .iterations(200)
            .add_normal_variable("x", 0.5, 0.1)
            .add_uniform_variable("y", 0.0, 1.0)
            .with_weight("y", 0.0)
            .unwrap()
            .add_correlation("x", "y", 0.5)
            .unwrap()
            .build()
            .unwrap();
        let shared = Arc::new(scenario);

        let run_with = |damping: f64| {
            let config = TaskConfig {
                sampler: SamplerConfig {
                    correlation_damping: damping,
                    ..Default::default()
                },
                seed: 13,
            };
            let task = split_tasks(&shared, 1, config).remove(0);
            (Sampler::default().run(&task), task)
        };

        let (damped, task) = run_with(0.1);
        assert_eq!(damped.iterations, 200);

        // Only x is weighted and the default game state adds nothing
        let mut rng = ChaCha8Rng::seed_from_u64(task.stream_seed());
        for outcome in &damped.outcomes {
            let x = task.scenario.variables[0].distribution.sample(&mut rng);
            let y = task.scenario.variables[1].distribution.sample(&mut rng);
            let expected = (x + 0.1 * 0.5 * y).clamp(0.0, 1.0);
            assert_abs_diff_eq!(*outcome, expected, epsilon = 1e-12);
        }

        let (strong, _) = run_with(0.8);
        assert_ne!(damped.outcomes, strong.outcomes);
        let (uncoupled, _) = run_with(0.0);
        let lift = |a: &WorkerResult, b: &WorkerResult| {
            a.outcomes.iter().zip(&b.outcomes).map(|(a, b)| a - b).sum::<f64>()
        };
        // Positive coupling to a non-negative draw only ever lifts x
        assert!(lift(&strong, &uncoupled) > lift(&damped, &uncoupled));
        assert!(lift(&damped, &uncoupled) > 0.0);
    }

    #[test]
    fn test_game_state_fields_in_conditions() {
        let state = GameState {
            field_position: 90,
            ..Default::default()
        };
        let scenario = ScenarioBuilder::new("state")
            .iterations(100)
            .game_state(state)
            .add_uniform_variable("x", 0.2, 0.3)
            .add_hard_constraint_with_penalty("deep", "field_position < 50", 1.0)
            .build()
            .unwrap();
        let result = Sampler::default().run(&single_task(scenario, 2));
        assert!(result.outcomes.iter().all(|o| *o == 1.0));
    }

    #[test]
    fn test_factors_follow_game_state() {
        let state = GameState {
            momentum: 0.4,
            field_position: 60,
            ..Default::default()
        };
        let scenario = ScenarioBuilder::new("factors")
            .iterations(10)
            .game_state(state)
            .add_normal_variable("x", 0.5, 0.1)
            .build()
            .unwrap();
        let result = Sampler::default().run(&single_task(scenario, 1));

        assert_eq!(result.factors["momentum"], 0.4);
        assert_eq!(result.factors["field_position"], 0.6);
        assert_eq!(result.factors["time_remaining"], 1.0);
        assert_eq!(result.factors["score_differential"], 0.0);
    }

    #[test]
    fn test_late_lead_raises_win_probability() {
        let state = GameState {
            quarter: 4,
            time_remaining_secs: 0,
            home_score: 28,
            away_score: 0,
            ..Default::default()
        };
        let scenario = ScenarioBuilder::new("late")
            .iterations(100)
            .game_state(state)
            .add_uniform_variable("x", 0.0, 0.5)
            .build()
            .unwrap();
        let result = Sampler::default().run(&single_task(scenario, 1));
        assert!(result.outcomes.iter().all(|o| *o >= 0.5));
    }

    struct Failing;

    impl OutcomeFunction for Failing {
        fn outcome(&self, sample: &Sample<'_>) -> Result<f64, SamplerError> {
            if sample.iteration >= 5 {
                return Err(SamplerError::outcome("boom"));
            }
            Ok(0.5)
        }
    }

    #[test]
    fn test_outcome_failure_discards_task() {
        let scenario = ScenarioBuilder::new("fails")
            .iterations(10)
            .add_normal_variable("x", 0.5, 0.1)
            .build()
            .unwrap();
        let result = Sampler::new(Arc::new(Failing)).run(&single_task(scenario, 1));
        assert_eq!(result.iterations, 0);
        assert!(result.factors.is_empty());
        assert_eq!(result.error.as_deref(), Some("Outcome function failed: boom"));
    }
}
