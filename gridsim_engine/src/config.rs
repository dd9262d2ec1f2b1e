//! Engine configuration.
//!
//! Supplied once at construction and never reloaded. Every section has
//! defaults, so a JSON file only needs the fields it changes:
//!
//! ```json
//! { "simulation": { "parallel_workers": 8, "seed": 42 },
//!   "scaling": { "max_resources": 16 } }
//! ```

use crate::error::{EngineError, Result};
use gridsim_core::{SamplerConfig, TaskConfig, MAX_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for a single scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Scenarios above this are rejected (never above 1,000,000)
    pub max_iterations: u32,

    /// `standard_error` at or below this marks a result converged
    pub convergence_threshold: f64,

    /// Size of the local worker pool; also the number of tasks per scenario
    pub parallel_workers: usize,

    /// Memoise seeded runs
    pub enable_caching: bool,

    /// Per-task timeout
    pub timeout_ms: u64,

    pub confidence_level: f64,

    /// Fixed run seed. `None` draws a fresh seed per run.
    pub seed: Option<u64>,

    pub sampler: SamplerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            convergence_threshold: 0.001,
            parallel_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            enable_caching: true,
            timeout_ms: 300_000,
            confidence_level: 0.95,
            seed: None,
            sampler: SamplerConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn task_config(&self, seed: u64) -> TaskConfig {
        TaskConfig {
            sampler: self.sampler,
            seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 || self.max_iterations > MAX_ITERATIONS {
            return Err(EngineError::config(format!(
                "max_iterations must be in 1..={MAX_ITERATIONS}"
            )));
        }
        if self.parallel_workers == 0 {
            return Err(EngineError::config("parallel_workers must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::config("timeout_ms must be positive"));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(EngineError::config("confidence_level must be in (0, 1)"));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold <= 0.0 {
            return Err(EngineError::config("convergence_threshold must be positive"));
        }
        if !self.sampler.correlation_damping.is_finite() {
            return Err(EngineError::config("correlation_damping must be finite"));
        }
        if !self.sampler.default_soft_penalty.is_finite() || self.sampler.default_soft_penalty < 0.0 {
            return Err(EngineError::config("default_soft_penalty must be non-negative"));
        }
        if !self.sampler.default_hard_penalty.is_finite() {
            return Err(EngineError::config("default_hard_penalty must be finite"));
        }
        Ok(())
    }
}

/// Autoscaler bounds and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    pub min_resources: usize,
    pub max_resources: usize,

    /// Informational set point between the two thresholds
    pub target_utilization: f64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,

    /// Minimum gap between two scaling actions
    pub cooldown_period_seconds: u64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_resources: 2,
            max_resources: 10,
            target_utilization: 0.7,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown_period_seconds: 60,
        }
    }
}

impl ScalingPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_period_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_resources > self.max_resources {
            return Err(EngineError::config("min_resources cannot exceed max_resources"));
        }
        if self.max_resources == 0 {
            return Err(EngineError::config("max_resources must be at least 1"));
        }
        for (name, value) in [
            ("target_utilization", self.target_utilization),
            ("scale_up_threshold", self.scale_up_threshold),
            ("scale_down_threshold", self.scale_down_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::config(format!("{name} must be in [0, 1]")));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(EngineError::config(
                "scale_up_threshold must be greater than scale_down_threshold",
            ));
        }
        Ok(())
    }
}

/// Resource pool timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Permanent local resources; the pool never shrinks below these
    pub local_workers: usize,

    pub health_check_interval_secs: u64,

    /// Heartbeats older than this take a resource offline
    pub heartbeat_timeout_secs: u64,

    /// Period of the heartbeat each elastic resource reports on its own.
    /// Zero leaves elastic resources to explicit `heartbeat` calls.
    pub elastic_heartbeat_interval_secs: u64,

    /// Period of the background autoscale evaluation
    pub evaluation_interval_secs: u64,

    pub cloud_function_provisioning_ms: u64,
    pub container_provisioning_ms: u64,

    /// Simulated per-task latency by resource kind
    pub local_task_latency_ms: u64,
    pub cloud_function_task_latency_ms: u64,
    pub container_task_latency_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            local_workers: 2,
            health_check_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            elastic_heartbeat_interval_secs: 10,
            evaluation_interval_secs: 15,
            cloud_function_provisioning_ms: 2_000,
            container_provisioning_ms: 5_000,
            local_task_latency_ms: 0,
            cloud_function_task_latency_ms: 100,
            container_task_latency_ms: 50,
        }
    }
}

impl PoolSettings {
    /// Same timings with no simulated latency or provisioning delay.
    pub fn instant() -> Self {
        Self {
            cloud_function_provisioning_ms: 0,
            container_provisioning_ms: 0,
            cloud_function_task_latency_ms: 0,
            container_task_latency_ms: 0,
            ..Self::default()
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn elastic_heartbeat_interval(&self) -> Option<Duration> {
        (self.elastic_heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.elastic_heartbeat_interval_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.health_check_interval_secs == 0 || self.evaluation_interval_secs == 0 {
            return Err(EngineError::config("background intervals must be positive"));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(EngineError::config("heartbeat_timeout_secs must be positive"));
        }
        if self.elastic_heartbeat_interval_secs >= self.heartbeat_timeout_secs {
            return Err(EngineError::config(
                "elastic_heartbeat_interval_secs must be below heartbeat_timeout_secs",
            ));
        }
        Ok(())
    }
}

/// Urgency of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Half the usual concurrency
    Low,
    #[default]
    Normal,
    /// Lets the autoscaler react before every distributed scenario
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub simulation: SimulationConfig,
    pub scaling: ScalingPolicy,
    pub pool: PoolSettings,

    /// Maximum scenarios of one batch in flight at once
    pub pool_size: usize,

    /// Batch scenarios above this many iterations go to the resource pool
    pub distributed_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            scaling: ScalingPolicy::default(),
            pool: PoolSettings::default(),
            pool_size: 4,
            distributed_threshold: 100_000,
        }
    }
}

impl EngineConfig {
    /// Loads a JSON configuration file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.scaling.validate()?;
        self.pool.validate()?;
        if self.pool_size == 0 {
            return Err(EngineError::config("pool_size must be at least 1"));
        }
        if self.pool.local_workers > self.scaling.max_resources {
            return Err(EngineError::config("local_workers cannot exceed max_resources"));
        }
        Ok(())
    }
}
