//! Error types for scenario validation, sampling and aggregation.

use thiserror::Error;

/// A violated scenario invariant.
///
/// Validation errors are fatal: they are surfaced before any iteration runs
/// and a scenario that produces one is never partially executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError {
    #[error("Iteration count {got} outside 1..={max}")]
    IterationsOutOfRange { got: u32, max: u32 },

    #[error("Variable name must not be empty")]
    EmptyVariableName,

    #[error("Duplicate variable name: {0}")]
    DuplicateVariable(String),

    #[error("Invalid distribution for variable '{variable}': {reason}")]
    InvalidDistribution { variable: String, reason: String },

    #[error("Invalid bounds for variable '{variable}': min {min} must be below max {max}")]
    InvalidBounds { variable: String, min: f64, max: f64 },

    #[error("Invalid weight {weight} for variable '{variable}'")]
    InvalidWeight { variable: String, weight: f64 },

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("Correlation {from} -> {to} references undeclared variable '{missing}'")]
    DanglingCorrelation {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Correlation coefficient {coefficient} between '{from}' and '{to}' outside [-1, 1]")]
    CoefficientOutOfRange {
        from: String,
        to: String,
        coefficient: f64,
    },

    #[error("Variable '{0}' cannot be correlated with itself")]
    SelfCorrelation(String),

    #[error("Constraint '{0}' has an empty condition")]
    EmptyCondition(String),

    #[error("Constraint '{constraint}' condition does not parse: {source}")]
    InvalidCondition {
        constraint: String,
        #[source]
        source: ExprError,
    },

    #[error("Constraint '{constraint}' references '{identifier}', which is neither a variable nor a game-state field")]
    UnknownIdentifier { constraint: String, identifier: String },

    #[error("Constraint '{constraint}' has invalid penalty {penalty}")]
    InvalidPenalty { constraint: String, penalty: f64 },
}

impl ScenarioError {
    /// Creates a distribution error for the named variable.
    pub fn distribution(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDistribution {
            variable: variable.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the constraint expression language.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("Parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),
}

impl ExprError {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }
}

/// A failure inside a single task.
///
/// Never escapes the sampler: it is folded into `WorkerResult::error`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerError {
    #[error("Constraint '{constraint}' failed to evaluate: {source}")]
    Constraint {
        constraint: String,
        #[source]
        source: ExprError,
    },

    #[error("Outcome function failed: {0}")]
    Outcome(String),

    #[error("Non-finite outcome at iteration {0}")]
    NonFinite(u32),

    #[error("Invalid task: {0}")]
    InvalidTask(String),
}

impl SamplerError {
    pub fn outcome(msg: impl Into<String>) -> Self {
        Self::Outcome(msg.into())
    }
}

/// Errors from the result aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("No results to aggregate")]
    NoResults,
}
