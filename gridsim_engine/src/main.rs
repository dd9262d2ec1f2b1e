//! Gridsim CLI
//!
//! Run preset Monte Carlo scenarios and walk the autoscaler on a virtual
//! clock.

use clap::{Args, Parser, Subcommand};
use gridsim_core::{GameState, Scenario, SimulationResult, Team};
use gridsim_engine::{
    Dispatcher, EngineConfig, EngineError, PresetId, Priority, ResourcePool, ResourceStatus,
    ResultExport, ScalingDecision, SimContext, TracingSink,
};
use gridsim_env::{EngineContext, TokioContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Gridsim Monte Carlo simulation engine CLI
#[derive(Parser, Debug)]
#[command(name = "gridsim")]
#[command(about = "Run Monte Carlo game simulations", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON output for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single preset scenario
    Run {
        /// Preset to run (see `gridsim presets`)
        #[arg(short, long, default_value = "red_zone")]
        preset: String,

        #[arg(short, long, default_value = "10000")]
        iterations: u32,

        /// Local workers (defaults to the configured pool)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run seed (omit for a fresh one)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Export the result to a JSON file
        #[arg(long)]
        export: Option<PathBuf>,

        #[command(flatten)]
        game: GameArgs,
    },

    /// Run several presets as one batch
    Batch {
        /// Comma-separated presets, or "all"
        #[arg(short, long, default_value = "all")]
        presets: String,

        #[arg(short, long, default_value = "10000")]
        iterations: u32,

        /// low, normal or high
        #[arg(long, default_value = "normal")]
        priority: String,

        #[arg(short, long)]
        seed: Option<u64>,

        #[arg(long)]
        export: Option<PathBuf>,

        #[command(flatten)]
        game: GameArgs,
    },

    /// List available presets
    Presets,

    /// Walk the autoscaler through a scripted load on a virtual clock
    ScaleDrill {
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Seconds of virtual time per step
        #[arg(long, default_value = "15")]
        step_secs: u64,
    },
}

/// Game situation the presets are conditioned on.
#[derive(Args, Debug)]
struct GameArgs {
    #[arg(long, default_value = "4")]
    quarter: u8,

    /// Seconds left in the quarter
    #[arg(long, default_value = "300")]
    time_remaining: u32,

    #[arg(long, default_value = "17")]
    home_score: u32,

    #[arg(long, default_value = "14")]
    away_score: u32,

    /// Possession by the away team
    #[arg(long)]
    away_ball: bool,

    #[arg(long, default_value = "1")]
    down: u8,

    #[arg(long, default_value = "10")]
    distance: u32,

    /// Yards from the offence's own goal line
    #[arg(long, default_value = "50")]
    field_position: u32,

    #[arg(long, default_value = "3")]
    timeouts: u8,

    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    momentum: f64,
}

impl From<&GameArgs> for GameState {
    fn from(args: &GameArgs) -> Self {
        GameState {
            quarter: args.quarter,
            time_remaining_secs: args.time_remaining,
            home_score: args.home_score,
            away_score: args.away_score,
            possession: if args.away_ball { Team::Away } else { Team::Home },
            down: args.down,
            distance: args.distance,
            field_position: args.field_position,
            timeouts_remaining: args.timeouts,
            momentum: args.momentum,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path),
        None => Ok(EngineConfig::default()),
    };
    let config = config.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let outcome = match cli.command {
        Command::Run {
            preset,
            iterations,
            workers,
            seed,
            export,
            game,
        } => {
            let presets = parse_presets(&preset);
            run_presets(config, cli.json, presets, iterations, workers, seed, Priority::Normal, export, &game, false).await
        }
        Command::Batch {
            presets,
            iterations,
            priority,
            seed,
            export,
            game,
        } => {
            let priority: Priority = priority.parse().unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            });
            let presets = parse_presets(&presets);
            run_presets(config, cli.json, presets, iterations, None, seed, priority, export, &game, true).await
        }
        Command::Presets => {
            list_presets(cli.json);
            Ok(true)
        }
        Command::ScaleDrill { seed, step_secs } => scale_drill(config, cli.json, seed, step_secs).await,
    };

    // Exit with proper code for scripts
    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn parse_presets(raw: &str) -> Vec<PresetId> {
    if raw == "all" {
        return PresetId::all();
    }
    raw.split(',')
        .map(|name| {
            name.trim().parse().unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = PresetId::all().iter().map(|p| p.name()).collect();
                eprintln!("Available presets: {}, all", names.join(", "));
                std::process::exit(1);
            })
        })
        .collect()
}

fn list_presets(json: bool) {
    if json {
        let presets: Vec<_> = PresetId::all()
            .iter()
            .map(|p| serde_json::json!({ "name": p.name(), "description": p.description() }))
            .collect();
        println!("{}", serde_json::Value::Array(presets));
        return;
    }
    for preset in PresetId::all() {
        println!("{:<18} {}", preset.name(), preset.description());
    }
}

/// Runs presets locally (one) or as a batch (several). Returns false if any
/// scenario produced no result.
#[allow(clippy::too_many_arguments)]
async fn run_presets(
    mut config: EngineConfig,
    json: bool,
    presets: Vec<PresetId>,
    iterations: u32,
    workers: Option<usize>,
    seed: Option<u64>,
    priority: Priority,
    export: Option<PathBuf>,
    game: &GameArgs,
    batch: bool,
) -> Result<bool, EngineError> {
    if let Some(workers) = workers {
        config.simulation.parallel_workers = workers;
    }
    if seed.is_some() {
        config.simulation.seed = seed;
    }

    let game_state = GameState::from(game);
    let scenarios: Vec<Scenario> = presets
        .iter()
        .map(|p| p.builder(game_state.clone()).and_then(|b| b.iterations(iterations).build()))
        .collect::<Result<_, _>>()?;

    let dispatcher = Arc::new(
        Dispatcher::builder(Arc::new(TokioContext::new()))
            .config(config.clone())
            .events(Arc::new(TracingSink))
            .build()?,
    );

    if !json {
        info!("Gridsim v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let outcomes: Vec<(Scenario, Result<SimulationResult, EngineError>)> = if batch {
        let results = dispatcher.run_batch_simulations(scenarios.clone(), priority).await?;
        let mut ordered = scenarios;
        ordered.sort_by_key(|s| s.iterations);
        ordered.into_iter().zip(results.into_iter().map(Ok)).collect()
    } else {
        let mut outcomes = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let result = dispatcher.run_simulation(&scenario).await;
            outcomes.push((scenario, result));
        }
        outcomes
    };

    let mut export_data = ResultExport::new(config.simulation.seed, config.simulation.parallel_workers);
    for (scenario, outcome) in &outcomes {
        match outcome {
            Ok(result) => {
                if !json {
                    info!(
                        "✓ {} mean={:.4} ci=[{:.4}, {:.4}] sd={:.4} n={} failed_tasks={} {}ms",
                        scenario.name,
                        result.outcome_distribution.mean,
                        result.confidence_interval.lower,
                        result.confidence_interval.upper,
                        result.outcome_distribution.std_dev,
                        result.iterations,
                        result.failed_tasks,
                        result.execution_time_ms
                    );
                    for factor in result.key_factors.iter().take(4) {
                        info!("    {:<16} {:+.4} (confidence {:.2})", factor.name, factor.impact, factor.confidence);
                    }
                }
                export_data.add_run(scenario, result.clone());
            }
            Err(e) => {
                error!("✗ {} FAILED: {}", scenario.name, e);
                export_data.add_failure(scenario, e);
            }
        }
    }

    if let Some(path) = &export {
        export_data.write_to_file(path)?;
        info!("Exported {} runs to {}", export_data.runs.len(), path.display());
    }

    if json {
        println!("{}", export_data.to_json()?);
    }
    Ok(export_data.failures.is_empty())
}

/// Scripted queue depths: ramp up, hold, drain.
fn drill_script() -> Vec<usize> {
    let mut script = Vec::new();
    script.extend([0, 2, 4, 8, 16, 24, 32, 32, 32, 32, 32, 32]);
    script.extend(std::iter::repeat(16).take(6));
    script.extend(std::iter::repeat(0).take(30));
    script
}

async fn scale_drill(config: EngineConfig, json: bool, seed: u64, step_secs: u64) -> Result<bool, EngineError> {
    let ctx = SimContext::shared(seed);
    let pool = ResourcePool::new(
        Arc::clone(&ctx),
        config.scaling.clone(),
        config.pool.clone(),
        gridsim_core::Sampler::default(),
        Arc::new(TracingSink),
    )?;

    let mut rows = Vec::new();
    for (step, queue_depth) in drill_script().into_iter().enumerate() {
        ctx.advance_time(Duration::from_secs(step_secs));
        // Let provisioning timers observe the new time
        tokio::task::yield_now().await;

        let before = pool.stats().await;
        let utilization = (before.load as f64 + queue_depth as f64) / before.capacity.max(1) as f64;
        let decision = pool.evaluate_scaling(queue_depth).await;
        pool.health_check().await;
        let stats = pool.stats().await;

        if !json && decision != ScalingDecision::NoChange {
            info!(
                "t={:>4}s queue={:>2} util={:.2} {:?} -> {} resources ({} provisioning)",
                ctx.now().as_secs(),
                queue_depth,
                utilization,
                decision,
                stats.total - stats.offline,
                stats.scaling
            );
        }
        rows.push(serde_json::json!({
            "step": step,
            "time_secs": ctx.now().as_secs(),
            "queue_depth": queue_depth,
            "utilization": utilization,
            "decision": decision,
            "active": stats.total - stats.offline,
            "scaling": stats.scaling,
        }));
    }

    let resources = pool.resources().await;
    let active = resources.iter().filter(|r| r.status != ResourceStatus::Offline).count();
    let within_bounds = active >= config.scaling.min_resources && active <= config.scaling.max_resources;

    if json {
        let summary = serde_json::json!({
            "seed": seed,
            "steps": rows,
            "final_active": active,
            "within_bounds": within_bounds,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("Drill finished at t={}s with {} active resources", ctx.now().as_secs(), active);
    }
    Ok(within_bounds)
}
