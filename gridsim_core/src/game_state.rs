//! Read-only snapshot of a football game used by scenarios and the sampler.

use serde::{Deserialize, Serialize};

/// Seconds in one regulation quarter.
pub const QUARTER_SECONDS: u32 = 900;

/// Seconds in regulation.
pub const REGULATION_SECONDS: u32 = 4 * QUARTER_SECONDS;

/// Which side has the ball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    #[default]
    Home,
    Away,
}

/// Game situation the simulation is conditioned on.
///
/// The engine never mutates it; presets and the outcome model only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    /// Quarter (1-4, 5 = overtime)
    pub quarter: u8,

    /// Seconds left in the current quarter
    pub time_remaining_secs: u32,

    pub home_score: u32,
    pub away_score: u32,

    /// Team in possession
    pub possession: Team,

    /// Down (1-4)
    pub down: u8,

    /// Yards to a first down
    pub distance: u32,

    /// Yards from the possessing team's own goal line (0-100)
    pub field_position: u32,

    /// Timeouts left for the possessing team
    pub timeouts_remaining: u8,

    /// Recent-play momentum in [-1, 1], positive favours the possessing team
    pub momentum: f64,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            quarter: 1,
            time_remaining_secs: QUARTER_SECONDS,
            home_score: 0,
            away_score: 0,
            possession: Team::Home,
            down: 1,
            distance: 10,
            field_position: 25,
            timeouts_remaining: 3,
            momentum: 0.0,
        }
    }
}

impl GameState {
    /// Score margin from the possessing team's point of view.
    pub fn score_differential(&self) -> i64 {
        let (own, other) = match self.possession {
            Team::Home => (self.home_score, self.away_score),
            Team::Away => (self.away_score, self.home_score),
        };
        own as i64 - other as i64
    }

    /// Seconds left in regulation (overtime counts as the final quarter).
    pub fn game_seconds_remaining(&self) -> u32 {
        let later_quarters = 4u32.saturating_sub(self.quarter.max(1).min(4) as u32);
        later_quarters * QUARTER_SECONDS + self.time_remaining_secs.min(QUARTER_SECONDS)
    }

    /// Fraction of regulation still to play, in [0, 1].
    pub fn time_fraction_remaining(&self) -> f64 {
        (self.game_seconds_remaining() as f64 / REGULATION_SECONDS as f64).clamp(0.0, 1.0)
    }

    /// Resolves a game-state identifier used in constraint conditions.
    pub fn field(&self, name: &str) -> Option<f64> {
        let value = match name {
            "quarter" => self.quarter as f64,
            "time_remaining" => self.time_remaining_secs as f64,
            "game_time_remaining" => self.game_seconds_remaining() as f64,
            "home_score" => self.home_score as f64,
            "away_score" => self.away_score as f64,
            "score_differential" => self.score_differential() as f64,
            "down" => self.down as f64,
            "distance" => self.distance as f64,
            "field_position" => self.field_position as f64,
            "timeouts" => self.timeouts_remaining as f64,
            "momentum" => self.momentum,
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_differential_follows_possession() {
        let mut state = GameState {
            home_score: 21,
            away_score: 14,
            ..Default::default()
        };
        assert_eq!(state.score_differential(), 7);

        state.possession = Team::Away;
        assert_eq!(state.score_differential(), -7);
    }

    #[test]
    fn test_time_remaining_fraction() {
        let kickoff = GameState::default();
        assert_eq!(kickoff.game_seconds_remaining(), REGULATION_SECONDS);
        assert_eq!(kickoff.time_fraction_remaining(), 1.0);

        let late = GameState {
            quarter: 4,
            time_remaining_secs: 120,
            ..Default::default()
        };
        assert_eq!(late.game_seconds_remaining(), 120);
    }

    #[test]
    fn test_field_lookup() {
        let state = GameState::default();
        assert_eq!(state.field("down"), Some(1.0));
        assert_eq!(state.field("field_position"), Some(25.0));
        assert_eq!(state.field("nonsense"), None);
    }
}
