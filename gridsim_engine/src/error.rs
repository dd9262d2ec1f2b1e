//! Error types for the engine.

use gridsim_core::{AggregateError, ScenarioError};
use gridsim_env::ResourceId;
use thiserror::Error;

/// Errors surfaced to engine callers.
///
/// Per-task failures never show up here; they are folded into
/// `WorkerResult::error` and counted in `SimulationResult::failed_tasks`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The scenario broke an invariant; nothing was executed
    #[error("Scenario validation failed: {0}")]
    Validation(#[from] ScenarioError),

    /// Every task failed (or the scenario was cancelled before any finished)
    #[error("No results to aggregate")]
    NoResults,

    /// No idle resource could take a distributed batch
    #[error("No idle resources available for distributed execution")]
    ResourceExhausted,

    #[error("Unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// Operation not allowed in the resource's current state
    #[error("Resource {id} rejected operation: {reason}")]
    ResourceRejected { id: ResourceId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task ended without reporting
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a rejection for the given resource.
    pub fn rejected(id: ResourceId, reason: impl Into<String>) -> Self {
        Self::ResourceRejected {
            id,
            reason: reason.into(),
        }
    }
}

impl From<AggregateError> for EngineError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::NoResults => Self::NoResults,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
