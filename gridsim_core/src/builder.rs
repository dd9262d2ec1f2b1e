//! Fluent construction of validated scenarios.

use crate::distribution::Distribution;
use crate::error::ScenarioError;
use crate::game_state::GameState;
use crate::scenario::{
    check_correlation, Bounds, Constraint, ConstraintKind, Correlation, Scenario, Variable,
};
use gridsim_env::ScenarioId;
use std::collections::{BTreeMap, HashSet};

/// Iterations used when the caller does not set a count.
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Builder for [`Scenario`].
///
/// Variable and constraint additions are infallible; everything is checked
/// in [`ScenarioBuilder::build`], which never hands out a partially valid
/// scenario. `add_correlation` and `with_bounds` fail early because they
/// refer to variables by name.
///
/// # Example
///
/// ```
/// use gridsim_core::ScenarioBuilder;
///
/// let scenario = ScenarioBuilder::new("drive")
///     .iterations(5_000)
///     .add_normal_variable("drive_success", 0.45, 0.1)
///     .add_beta_variable("completion_rate", 6.0, 4.0)
///     .add_correlation("drive_success", "completion_rate", 0.4)?
///     .add_hard_constraint("in_bounds", "field_position <= 100")
///     .build()?;
/// assert_eq!(scenario.variables.len(), 2);
/// # Ok::<(), gridsim_core::ScenarioError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    id: ScenarioId,
    name: String,
    game_state: GameState,
    iterations: u32,
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    metadata: BTreeMap<String, String>,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ScenarioId::new(),
            name: name.into(),
            game_state: GameState::default(),
            iterations: DEFAULT_ITERATIONS,
            variables: Vec::new(),
            constraints: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, id: ScenarioId) -> Self {
        self.id = id;
        self
    }

    pub fn game_state(mut self, game_state: GameState) -> Self {
        self.game_state = game_state;
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn add_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn add_normal_variable(self, name: impl Into<String>, mean: f64, std_dev: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Normal { mean, std_dev }))
    }

    pub fn add_uniform_variable(self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Uniform { min, max }))
    }

    pub fn add_beta_variable(self, name: impl Into<String>, alpha: f64, beta: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Beta { alpha, beta }))
    }

    pub fn add_gamma_variable(self, name: impl Into<String>, shape: f64, scale: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Gamma { shape, scale }))
    }

    pub fn add_poisson_variable(self, name: impl Into<String>, lambda: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Poisson { lambda }))
    }

    pub fn add_binomial_variable(self, name: impl Into<String>, n: u32, p: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Binomial { n, p }))
    }

    pub fn add_exponential_variable(self, name: impl Into<String>, lambda: f64) -> Self {
        self.add_variable(Variable::new(name, Distribution::Exponential { lambda }))
    }

    /// Clamps a declared variable to `[min, max]`.
    pub fn with_bounds(mut self, name: &str, min: f64, max: f64) -> Result<Self, ScenarioError> {
        let variable = self
            .variables
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| ScenarioError::UnknownVariable(name.to_string()))?;
        variable.bounds = Some(Bounds { min, max });
        Ok(self)
    }

    /// Sets a declared variable's weight in the outcome model.
    pub fn with_weight(mut self, name: &str, weight: f64) -> Result<Self, ScenarioError> {
        let variable = self
            .variables
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| ScenarioError::UnknownVariable(name.to_string()))?;
        variable.weight = weight;
        Ok(self)
    }

    /// Correlates two declared variables.
    ///
    /// The coupling is symmetric: each variable records the other as a
    /// target with the same coefficient. Re-declaring a pair replaces it.
    pub fn add_correlation(mut self, a: &str, b: &str, coefficient: f64) -> Result<Self, ScenarioError> {
        let declared: HashSet<&str> = self.variables.iter().map(|v| v.name.as_str()).collect();
        check_correlation(&declared, a, b, coefficient)?;

        for (from, to) in [(a, b), (b, a)] {
            // Duplicate names are a build() error; the first declaration wins here.
            if let Some(variable) = self.variables.iter_mut().find(|v| v.name == from) {
                variable.correlations.retain(|c| c.target != to);
                variable.correlations.push(Correlation {
                    target: to.to_string(),
                    coefficient,
                });
            }
        }
        Ok(self)
    }

    /// Adds a hard constraint with the sampler's default penalty.
    pub fn add_hard_constraint(self, name: impl Into<String>, condition: impl Into<String>) -> Self {
        self.push_constraint(name, ConstraintKind::Hard, condition, None)
    }

    pub fn add_hard_constraint_with_penalty(
        self,
        name: impl Into<String>,
        condition: impl Into<String>,
        penalty: f64,
    ) -> Self {
        self.push_constraint(name, ConstraintKind::Hard, condition, Some(penalty))
    }

    /// Adds a soft constraint with the sampler's default penalty.
    pub fn add_soft_constraint(self, name: impl Into<String>, condition: impl Into<String>) -> Self {
        self.push_constraint(name, ConstraintKind::Soft, condition, None)
    }

    pub fn add_soft_constraint_with_penalty(
        self,
        name: impl Into<String>,
        condition: impl Into<String>,
        penalty: f64,
    ) -> Self {
        self.push_constraint(name, ConstraintKind::Soft, condition, Some(penalty))
    }

    fn push_constraint(
        mut self,
        name: impl Into<String>,
        kind: ConstraintKind,
        condition: impl Into<String>,
        penalty: Option<f64>,
    ) -> Self {
        self.constraints.push(Constraint {
            name: name.into(),
            kind,
            condition: condition.into(),
            penalty,
        });
        self
    }

    /// Validates and produces the scenario.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        let scenario = Scenario {
            id: self.id,
            name: self.name,
            game_state: self.game_state,
            iterations: self.iterations,
            variables: self.variables,
            constraints: self.constraints,
            metadata: self.metadata,
        };
        scenario.validate()?;
        Ok(scenario)
    }
}
