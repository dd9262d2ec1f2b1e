//! Declarative scenario model.
//!
//! A `Scenario` is immutable once built. The dispatcher re-validates every
//! scenario it receives, so scenarios deserialized from JSON (which bypass
//! the builder) get the same checks.

use crate::distribution::Distribution;
use crate::error::ScenarioError;
use crate::expression::Expr;
use crate::game_state::GameState;
use gridsim_env::ScenarioId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Upper bound on iterations for a single scenario.
pub const MAX_ITERATIONS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Continuous,
    Discrete,
}

/// Inclusive clamp applied to a variable after correlation adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Maps a value inside the bounds onto [0, 1].
    pub fn normalize(&self, value: f64) -> f64 {
        (self.clamp(value) - self.min) / (self.max - self.min)
    }
}

/// Linear coupling from one variable to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// Name of the variable whose sampled value feeds the adjustment
    pub target: String,

    /// Coefficient in [-1, 1]
    pub coefficient: f64,
}

/// A random variable drawn once per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub distribution: Distribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,

    /// Contribution to the outcome model; 0 makes the variable constraint-only
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlations: Vec<Correlation>,
}

impl Variable {
    /// Creates a variable whose kind follows its distribution.
    pub fn new(name: impl Into<String>, distribution: Distribution) -> Self {
        let kind = if distribution.is_discrete() {
            VariableKind::Discrete
        } else {
            VariableKind::Continuous
        };
        Self {
            name: name.into(),
            kind,
            distribution,
            bounds: None,
            weight: default_weight(),
            correlations: Vec::new(),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Failure forces the iteration's outcome to the penalty
    Hard,
    /// Failure subtracts the penalty from the outcome
    Soft,
}

/// A condition every iteration is checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,

    /// Boolean expression over variable names and game-state fields
    pub condition: String,

    /// Hard: outcome on failure. Soft: amount subtracted on failure.
    /// `None` falls back to the sampler's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty: Option<f64>,
}

/// A complete simulation description bound to a game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub name: String,
    pub game_state: GameState,
    pub iterations: u32,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Scenario {
    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Index of a variable in `variables`.
    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    /// Checks every invariant, reporting the first one violated.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.iterations < 1 || self.iterations > MAX_ITERATIONS {
            return Err(ScenarioError::IterationsOutOfRange {
                got: self.iterations,
                max: MAX_ITERATIONS,
            });
        }

        let mut names = HashSet::new();
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                return Err(ScenarioError::EmptyVariableName);
            }
            if !names.insert(variable.name.as_str()) {
                return Err(ScenarioError::DuplicateVariable(variable.name.clone()));
            }
            variable
                .distribution
                .check()
                .map_err(|reason| ScenarioError::distribution(&variable.name, reason))?;
            if let Some(bounds) = variable.bounds {
                if !(bounds.min < bounds.max) {
                    return Err(ScenarioError::InvalidBounds {
                        variable: variable.name.clone(),
                        min: bounds.min,
                        max: bounds.max,
                    });
                }
            }
            if !variable.weight.is_finite() || variable.weight < 0.0 {
                return Err(ScenarioError::InvalidWeight {
                    variable: variable.name.clone(),
                    weight: variable.weight,
                });
            }
        }

        for variable in &self.variables {
            for correlation in &variable.correlations {
                check_correlation(&names, &variable.name, &correlation.target, correlation.coefficient)?;
            }
        }

        for constraint in &self.constraints {
            if constraint.condition.trim().is_empty() {
                return Err(ScenarioError::EmptyCondition(constraint.name.clone()));
            }
            let expr = Expr::parse(&constraint.condition).map_err(|source| ScenarioError::InvalidCondition {
                constraint: constraint.name.clone(),
                source,
            })?;
            if let Some(unknown) = expr
                .identifiers()
                .into_iter()
                .find(|name| !names.contains(name) && self.game_state.field(name).is_none())
            {
                return Err(ScenarioError::UnknownIdentifier {
                    constraint: constraint.name.clone(),
                    identifier: unknown.to_string(),
                });
            }
            if let Some(penalty) = constraint.penalty {
                let valid = match constraint.kind {
                    ConstraintKind::Hard => penalty.is_finite(),
                    ConstraintKind::Soft => penalty.is_finite() && penalty >= 0.0,
                };
                if !valid {
                    return Err(ScenarioError::InvalidPenalty {
                        constraint: constraint.name.clone(),
                        penalty,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Shared by `Scenario::validate` and the builder's `add_correlation`.
pub(crate) fn check_correlation(
    declared: &HashSet<&str>,
    from: &str,
    to: &str,
    coefficient: f64,
) -> Result<(), ScenarioError> {
    for name in [from, to] {
        if !declared.contains(name) {
            return Err(ScenarioError::DanglingCorrelation {
                from: from.to_string(),
                to: to.to_string(),
                missing: name.to_string(),
            });
        }
    }
    if from == to {
        return Err(ScenarioError::SelfCorrelation(from.to_string()));
    }
    if !coefficient.is_finite() || coefficient.abs() > 1.0 {
        return Err(ScenarioError::CoefficientOutOfRange {
            from: from.to_string(),
            to: to.to_string(),
            coefficient,
        });
    }
    Ok(())
}
