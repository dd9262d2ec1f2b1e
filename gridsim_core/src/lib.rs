//! Gridsim Core - Monte Carlo scenario model and sampling
//!
//! Everything in this crate is synchronous and free of shared state:
//! 1. **Scenario model**: variables with distributions, correlations and
//!    constraints, validated by [`ScenarioBuilder::build`]
//! 2. **Sampler**: turns one [`WorkerTask`] into one [`WorkerResult`]
//! 3. **Aggregator**: combines results into a [`SimulationResult`]
//!
//! Scheduling, timeouts and elastic resources live in `gridsim_engine`.

pub mod aggregator;
pub mod builder;
pub mod distribution;
pub mod error;
pub mod expression;
pub mod game_state;
pub mod presets;
pub mod sampler;
pub mod scenario;
pub mod task;

// Re-export key types for convenience
pub use aggregator::{aggregate, Aggregator, ConfidenceInterval, KeyFactor, OutcomeDistribution, SimulationResult};
pub use builder::ScenarioBuilder;
pub use distribution::Distribution;
pub use error::{AggregateError, ExprError, SamplerError, ScenarioError};
pub use expression::Expr;
pub use game_state::{GameState, Team};
pub use sampler::{OutcomeFunction, Sample, Sampler, WinProbabilityModel};
pub use scenario::{Bounds, Constraint, ConstraintKind, Correlation, Scenario, Variable, VariableKind, MAX_ITERATIONS};
pub use task::{split_tasks, SamplerConfig, SimulationProgress, TaskConfig, TaskId, WorkerResult, WorkerTask};
