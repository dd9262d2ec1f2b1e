//! Named preset catalogue for the CLI and batch callers.

use gridsim_core::{GameState, ScenarioBuilder, ScenarioError};

/// Preset identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetId {
    /// Possession inside the opponent's 20
    RedZone,

    /// End-of-half hurry-up drive
    TwoMinuteDrill,

    /// Short yardage at the goal line
    GoalLineStand,

    /// Conversion attempt on fourth down
    FourthDown,
}

impl PresetId {
    /// Returns a list of all presets.
    pub fn all() -> Vec<PresetId> {
        vec![
            PresetId::RedZone,
            PresetId::TwoMinuteDrill,
            PresetId::GoalLineStand,
            PresetId::FourthDown,
        ]
    }

    /// Returns the preset name.
    pub fn name(&self) -> &'static str {
        match self {
            PresetId::RedZone => "red_zone",
            PresetId::TwoMinuteDrill => "two_minute_drill",
            PresetId::GoalLineStand => "goal_line_stand",
            PresetId::FourthDown => "fourth_down",
        }
    }

    /// Returns a description of the preset.
    pub fn description(&self) -> &'static str {
        match self {
            PresetId::RedZone => "Touchdown conversion inside the 20, turnovers end the drive",
            PresetId::TwoMinuteDrill => "Drive success against the clock with sacks and timeouts",
            PresetId::GoalLineStand => "Short-yardage push at the goal line, fumbles end the play",
            PresetId::FourthDown => "Reaching the line to gain on fourth down",
        }
    }

    /// Pre-populated builder for this preset.
    pub fn builder(&self, game_state: GameState) -> Result<ScenarioBuilder, ScenarioError> {
        match self {
            PresetId::RedZone => ScenarioBuilder::red_zone(game_state),
            PresetId::TwoMinuteDrill => ScenarioBuilder::two_minute_drill(game_state),
            PresetId::GoalLineStand => ScenarioBuilder::goal_line_stand(game_state),
            PresetId::FourthDown => ScenarioBuilder::fourth_down(game_state),
        }
    }
}

impl std::fmt::Display for PresetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PresetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "red_zone" | "redzone" => Ok(PresetId::RedZone),
            "two_minute_drill" | "twominutedrill" | "two_minute" | "2min" => Ok(PresetId::TwoMinuteDrill),
            "goal_line_stand" | "goallinestand" | "goal_line" => Ok(PresetId::GoalLineStand),
            "fourth_down" | "fourthdown" | "4th_down" => Ok(PresetId::FourthDown),
            _ => Err(format!("Unknown preset: {}", s)),
        }
    }
}
