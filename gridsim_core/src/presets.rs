//! Ready-made situational scenarios.
//!
//! Presets adjust the supplied game state to the situation they model and
//! pre-populate variables and constraints. They return a builder so the
//! caller can still change iterations, ids or add variables before
//! `build()`.

use crate::builder::ScenarioBuilder;
use crate::error::ScenarioError;
use crate::game_state::GameState;

impl ScenarioBuilder {
    /// Possession inside the opponent's 20.
    pub fn red_zone(mut game_state: GameState) -> Result<Self, ScenarioError> {
        game_state.field_position = game_state.field_position.max(80);

        Ok(ScenarioBuilder::new("red_zone")
            .game_state(game_state)
            .metadata("preset", "red_zone")
            .add_beta_variable("td_conversion", 4.0, 5.0)
            .add_beta_variable("pass_completion", 6.0, 4.0)
            .add_normal_variable("yards_gained", 4.5, 3.0)
            .with_bounds("yards_gained", -5.0, 20.0)?
            .add_poisson_variable("turnovers", 0.15)
            .with_weight("turnovers", 0.0)?
            .add_correlation("td_conversion", "pass_completion", 0.35)?
            .add_hard_constraint_with_penalty("ball_secure", "turnovers == 0", 0.0)
            .add_soft_constraint_with_penalty("short_field", "yards_gained >= 0", 0.05)
        )
    }

    /// Final two minutes of a half.
    pub fn two_minute_drill(mut game_state: GameState) -> Result<Self, ScenarioError> {
        if game_state.quarter != 2 && game_state.quarter != 4 {
            game_state.quarter = 4;
        }
        game_state.time_remaining_secs = game_state.time_remaining_secs.min(120);

        Ok(ScenarioBuilder::new("two_minute_drill")
            .game_state(game_state)
            .metadata("preset", "two_minute_drill")
            .add_beta_variable("drive_success", 3.0, 4.0)
            .add_beta_variable("completion_rate", 6.0, 4.0)
            .add_gamma_variable("clock_per_play", 4.0, 6.0)
            .with_bounds("clock_per_play", 5.0, 45.0)?
            .with_weight("clock_per_play", 0.0)?
            .add_poisson_variable("sacks", 0.6)
            .with_weight("sacks", 0.0)?
            .add_correlation("drive_success", "completion_rate", 0.5)?
            .add_hard_constraint_with_penalty("drive_alive", "sacks < 3", 0.0)
            .add_soft_constraint_with_penalty(
                "clock_management",
                "clock_per_play * 8 <= time_remaining + timeouts * 40",
                0.15,
            )
        )
    }

    /// Third or fourth down inside the opponent's 5.
    pub fn goal_line_stand(mut game_state: GameState) -> Result<Self, ScenarioError> {
        game_state.field_position = game_state.field_position.max(95);
        game_state.down = game_state.down.max(3);
        game_state.distance = game_state.distance.min(100u32.saturating_sub(game_state.field_position)).max(1);

        Ok(ScenarioBuilder::new("goal_line_stand")
            .game_state(game_state)
            .metadata("preset", "goal_line_stand")
            .add_beta_variable("push_success", 5.0, 4.0)
            .add_normal_variable("run_yards", 1.2, 1.5)
            .with_bounds("run_yards", -3.0, 5.0)?
            .add_binomial_variable("fumbles", 3, 0.03)
            .with_weight("fumbles", 0.0)?
            .add_correlation("push_success", "run_yards", 0.6)?
            .add_hard_constraint_with_penalty("no_fumble", "fumbles == 0", 0.0)
        )
    }

    /// Going for it on fourth down.
    pub fn fourth_down(mut game_state: GameState) -> Result<Self, ScenarioError> {
        game_state.down = 4;

        Ok(ScenarioBuilder::new("fourth_down")
            .game_state(game_state)
            .metadata("preset", "fourth_down")
            .add_beta_variable("conversion", 5.0, 5.0)
            .add_exponential_variable("yards_gained", 0.25)
            .with_bounds("yards_gained", 0.0, 30.0)?
            .add_uniform_variable("play_call_quality", 0.3, 0.9)
            .add_correlation("conversion", "play_call_quality", 0.4)?
            .add_soft_constraint_with_penalty("line_to_gain", "yards_gained >= distance", 0.2)
        )
    }
}
