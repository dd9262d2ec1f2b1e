//! JSON export of simulation runs.
//!
//! Writes the scenario summaries and results of one CLI invocation so they
//! can be inspected or plotted offline.

use crate::error::Result;
use gridsim_core::{GameState, Scenario, SimulationResult};
use gridsim_env::ScenarioId;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Scenario shape without its variable definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub id: ScenarioId,
    pub name: String,
    pub iterations: u32,
    pub variables: Vec<String>,
    pub constraints: Vec<String>,
    pub game_state: GameState,
}

impl ScenarioSummary {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id,
            name: scenario.name.clone(),
            iterations: scenario.iterations,
            variables: scenario.variables.iter().map(|v| v.name.clone()).collect(),
            constraints: scenario.constraints.iter().map(|c| c.name.clone()).collect(),
            game_state: scenario.game_state.clone(),
        }
    }
}

/// A scenario together with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRun {
    pub scenario: ScenarioSummary,
    pub result: SimulationResult,
}

/// A scenario that produced no result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedFailure {
    pub scenario: ScenarioSummary,
    pub error: String,
}

/// Complete export of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultExport {
    /// Run seed, if fixed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    pub workers: usize,

    pub runs: Vec<ExportedRun>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ExportedFailure>,
}

impl ResultExport {
    /// Creates a new export container.
    pub fn new(seed: Option<u64>, workers: usize) -> Self {
        Self {
            seed,
            workers,
            runs: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn add_run(&mut self, scenario: &Scenario, result: SimulationResult) {
        self.runs.push(ExportedRun {
            scenario: ScenarioSummary::new(scenario),
            result,
        });
    }

    pub fn add_failure(&mut self, scenario: &Scenario, error: impl ToString) {
        self.failures.push(ExportedFailure {
            scenario: ScenarioSummary::new(scenario),
            error: error.to_string(),
        });
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
