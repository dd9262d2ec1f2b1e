//! Scenario dispatch: validation, task splitting, progress and aggregation.
//!
//! ## Execution paths
//!
//! ```text
//!  run_simulation ──► split_tasks ──► WorkerPool (round-robin, timeout)
//!                                          │
//!  run_batch_simulations                   ▼
//!     ├─ iterations ≤ threshold ──► run_simulation ──► Aggregator
//!     └─ iterations > threshold ──► ResourcePool::distribute ──┘
//! ```
//!
//! Both paths produce the same `WorkerResult`s. Task failures are counted in
//! the result; validation, aggregation and resource errors go to the caller.

use crate::cache::{Fingerprint, ResultCache};
use crate::config::{EngineConfig, Priority, SimulationConfig};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::progress::ProgressTracker;
use crate::resource_pool::ResourcePool;
use crate::worker_pool::WorkerPool;
use gridsim_core::{
    split_tasks, Aggregator, OutcomeFunction, Sampler, Scenario, ScenarioError, SimulationProgress, SimulationResult,
    WinProbabilityModel, WorkerResult,
};
use gridsim_env::{EngineContext, ScenarioId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder<C: EngineContext> {
    ctx: Arc<C>,
    config: EngineConfig,
    outcome: Arc<dyn OutcomeFunction>,
    events: Arc<dyn EventSink>,
    resources: Option<Arc<ResourcePool<C>>>,
}

impl<C: EngineContext> DispatcherBuilder<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self {
            ctx,
            config: EngineConfig::default(),
            outcome: Arc::new(WinProbabilityModel),
            events: Arc::new(TracingSink),
            resources: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default win-probability model.
    pub fn outcome_function(mut self, outcome: Arc<dyn OutcomeFunction>) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses an existing resource pool instead of creating one from the config.
    pub fn resource_pool(mut self, resources: Arc<ResourcePool<C>>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Validates the configuration and spawns the local workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Dispatcher<C>> {
        self.config.validate()?;
        let sampler = Sampler::new(self.outcome);

        let resources = match self.resources {
            Some(resources) => resources,
            None => Arc::new(ResourcePool::new(
                Arc::clone(&self.ctx),
                self.config.scaling.clone(),
                self.config.pool.clone(),
                sampler.clone(),
                Arc::clone(&self.events),
            )?),
        };

        let workers = Arc::new(WorkerPool::new(
            self.ctx.as_ref(),
            self.config.simulation.parallel_workers,
            sampler,
        ));
        info!(
            workers = workers.size(),
            pool_size = self.config.pool_size,
            distributed_threshold = self.config.distributed_threshold,
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            ctx: self.ctx,
            config: self.config,
            workers,
            resources,
            progress: Arc::new(ProgressTracker::new()),
            cache: ResultCache::default(),
            events: self.events,
        })
    }
}

/// Runs scenarios on the local worker pool or the resource pool.
pub struct Dispatcher<C: EngineContext> {
    ctx: Arc<C>,
    config: EngineConfig,
    workers: Arc<WorkerPool>,
    resources: Arc<ResourcePool<C>>,
    progress: Arc<ProgressTracker>,
    cache: ResultCache,
    events: Arc<dyn EventSink>,
}

impl<C: EngineContext> Dispatcher<C> {
    pub fn builder(ctx: Arc<C>) -> DispatcherBuilder<C> {
        DispatcherBuilder::new(ctx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<ResourcePool<C>> {
        &self.resources
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Progress of an in-flight scenario.
    pub fn get_progress(&self, scenario_id: ScenarioId) -> Option<SimulationProgress> {
        self.progress.get(scenario_id)
    }

    /// Stops tracking the scenario and flags it cancelled.
    ///
    /// Queued tasks are skipped; tasks already sampling run to completion.
    pub fn cancel(&self, scenario_id: ScenarioId) -> bool {
        let cancelled = self.progress.cancel(scenario_id);
        if cancelled {
            info!(scenario = %scenario_id, "Scenario cancelled");
            self.events.emit(EngineEvent::ScenarioCancelled { scenario_id });
        }
        cancelled
    }

    /// Runs one scenario on the local worker pool with the engine config.
    pub async fn run_simulation(&self, scenario: &Scenario) -> Result<SimulationResult> {
        self.run_simulation_with(scenario, &self.config.simulation).await
    }

    /// Runs one scenario on the local worker pool.
    ///
    /// The scenario is split into `parallel_workers` contiguous tasks; each
    /// is bounded by `timeout_ms` and a failure or timeout only removes that
    /// task's iterations from the result.
    pub async fn run_simulation_with(&self, scenario: &Scenario, config: &SimulationConfig) -> Result<SimulationResult> {
        config.validate()?;
        check_scenario(scenario, config)?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let fingerprint = match (config.enable_caching, config.seed) {
            (true, Some(seed)) => Some(Fingerprint::of(scenario, config, seed)?),
            _ => None,
        };
        if let Some(hit) = fingerprint.and_then(|key| self.cache.get(key)) {
            info!(scenario = %scenario.id, "Cache hit");
            return Ok(hit);
        }

        let started = self.ctx.now();
        let scenario = Arc::new(scenario.clone());
        let tasks = split_tasks(&scenario, config.parallel_workers, config.task_config(seed));
        let cancelled = self.progress.start(scenario.id, scenario.iterations, started);
        let timeout = config.timeout();

        info!(
            scenario = %scenario.id,
            name = %scenario.name,
            iterations = scenario.iterations,
            tasks = tasks.len(),
            seed,
            "Running scenario"
        );

        let expected = tasks.len();
        let (tx, mut rx) = mpsc::channel(expected);
        for task in tasks {
            let tx = tx.clone();
            let ctx = Arc::clone(&self.ctx);
            let workers = Arc::clone(&self.workers);
            let cancelled = Arc::clone(&cancelled);
            let assigned = task.iterations();

            self.ctx.spawn("dispatch", async move {
                let result = workers.execute(ctx.as_ref(), task, cancelled, timeout).await;
                let _ = tx.send((assigned, result)).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(expected);
        while let Some((assigned, result)) = rx.recv().await {
            if let Some(error) = &result.error {
                warn!(task = %result.task_id, %error, "Task failed");
            }
            // Failed tasks still count as settled work
            if let Some(progress) = self.progress.record(scenario.id, assigned, self.ctx.now()) {
                self.events.emit(EngineEvent::Progress(progress));
            }
            results.push(result);
        }

        if results.len() < expected {
            self.progress.finish(scenario.id);
            return Err(EngineError::Internal(format!(
                "{} of {} tasks never reported",
                expected - results.len(),
                expected
            )));
        }

        let was_cancelled = cancelled.load(Ordering::Acquire);
        let outcome = self.finish(&scenario, config, &results, started);
        if let (Ok(result), Some(key)) = (&outcome, fingerprint) {
            if !was_cancelled && result.failed_tasks == 0 {
                self.cache.insert(key, result.clone());
            }
        }
        outcome
    }

    /// Runs one scenario across the idle resources of the resource pool.
    ///
    /// Each task is bounded by `timeout_ms` and reports progress as it
    /// settles, the same as on the local pool.
    ///
    /// With `Priority::High` the autoscaler is consulted before dispatch.
    /// Otherwise it is only consulted when no resource is idle, and the
    /// exhaustion is still reported to the caller.
    pub async fn run_distributed(
        &self,
        scenario: &Scenario,
        priority: Priority,
        queue_depth: usize,
    ) -> Result<SimulationResult> {
        let config = &self.config.simulation;
        check_scenario(scenario, config)?;

        if priority == Priority::High {
            let decision = self.resources.evaluate_scaling(queue_depth).await;
            debug!(scenario = %scenario.id, ?decision, queue_depth, "Pre-dispatch scaling");
        }

        let seed = config.seed.unwrap_or_else(rand::random);
        let started = self.ctx.now();
        let scenario = Arc::new(scenario.clone());
        let cancelled = self.progress.start(scenario.id, scenario.iterations, started);

        info!(
            scenario = %scenario.id,
            name = %scenario.name,
            iterations = scenario.iterations,
            %priority,
            "Running scenario on resource pool"
        );

        let settled = |assigned: u32, _: &WorkerResult| {
            if let Some(progress) = self.progress.record(scenario.id, assigned, self.ctx.now()) {
                self.events.emit(EngineEvent::Progress(progress));
            }
        };
        let outcome = self
            .resources
            .distribute(
                &scenario,
                config.task_config(seed),
                Arc::clone(&cancelled),
                config.timeout(),
                settled,
            )
            .await;
        let results = match outcome {
            Ok(results) => results,
            Err(EngineError::ResourceExhausted) => {
                self.progress.finish(scenario.id);
                if priority != Priority::High {
                    self.resources.evaluate_scaling(queue_depth + 1).await;
                }
                return Err(EngineError::ResourceExhausted);
            }
            Err(e) => {
                self.progress.finish(scenario.id);
                return Err(e);
            }
        };

        self.finish(&scenario, config, &results, started)
    }

    /// Runs many scenarios, cheapest first.
    ///
    /// Every scenario is validated before anything runs. At most
    /// `min(pool_size, scenarios)` run at once, halved for `Priority::Low`.
    /// Scenarios above `distributed_threshold` iterations go to the resource
    /// pool. Results come back in execution order (ascending iterations);
    /// the first scenario-level error in that order is returned once every
    /// scenario has settled.
    pub async fn run_batch_simulations(
        self: &Arc<Self>,
        mut scenarios: Vec<Scenario>,
        priority: Priority,
    ) -> Result<Vec<SimulationResult>> {
        for scenario in &scenarios {
            check_scenario(scenario, &self.config.simulation)?;
        }
        if scenarios.is_empty() {
            return Ok(Vec::new());
        }

        scenarios.sort_by_key(|s| s.iterations);
        let count = scenarios.len();
        let mut ceiling = self.config.pool_size.min(count).max(1);
        if priority == Priority::Low {
            ceiling = (ceiling / 2).max(1);
        }
        info!(scenarios = count, concurrency = ceiling, %priority, "Running batch");

        let permits = Arc::new(Semaphore::new(ceiling));
        let pending = Arc::new(AtomicUsize::new(count));
        let (tx, mut rx) = mpsc::channel(count);

        for (index, scenario) in scenarios.into_iter().enumerate() {
            let tx = tx.clone();
            let dispatcher = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let pending = Arc::clone(&pending);

            self.ctx.spawn("batch", async move {
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                let queue_depth = pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);

                let outcome = if scenario.iterations > dispatcher.config.distributed_threshold {
                    dispatcher.run_distributed(&scenario, priority, queue_depth).await
                } else {
                    dispatcher.run_simulation(&scenario).await
                };
                let _ = tx.send((index, outcome)).await;
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<Result<SimulationResult>>> = (0..count).map(|_| None).collect();
        while let Some((index, outcome)) = rx.recv().await {
            outcomes[index] = Some(outcome);
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|| Err(EngineError::Internal("batch scenario never reported".into()))))
            .collect()
    }

    /// Aggregates settled results and closes out tracking.
    fn finish(
        &self,
        scenario: &Scenario,
        config: &SimulationConfig,
        results: &[WorkerResult],
        started: std::time::Duration,
    ) -> Result<SimulationResult> {
        self.progress.finish(scenario.id);

        let aggregator = Aggregator::new(config.confidence_level, config.convergence_threshold);
        let mut result = match aggregator.aggregate(results) {
            Ok(result) => result,
            Err(e) => {
                warn!(scenario = %scenario.id, tasks = results.len(), "No successful tasks");
                return Err(e.into());
            }
        };

        let elapsed_ms = self.ctx.now().saturating_sub(started).as_millis() as u64;
        result.execution_time_ms = result.execution_time_ms.max(elapsed_ms);

        info!(
            scenario = %scenario.id,
            iterations = result.iterations,
            mean = result.outcome_distribution.mean,
            failed_tasks = result.failed_tasks,
            converged = result.converged,
            elapsed_ms = result.execution_time_ms,
            "Scenario complete"
        );
        self.events.emit(EngineEvent::ScenarioCompleted {
            scenario_id: scenario.id,
            iterations: result.iterations,
            mean: result.outcome_distribution.mean,
            execution_time_ms: result.execution_time_ms,
        });
        Ok(result)
    }
}

/// Scenario invariants plus the configured iteration ceiling.
fn check_scenario(scenario: &Scenario, config: &SimulationConfig) -> Result<()> {
    scenario.validate()?;
    if scenario.iterations > config.max_iterations {
        return Err(ScenarioError::IterationsOutOfRange {
            got: scenario.iterations,
            max: config.max_iterations,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::context::SimContext;
    use crate::events::RecordingSink;
    use approx::assert_abs_diff_eq;
    use gridsim_core::{Sample, SamplerError, ScenarioBuilder};
    use gridsim_env::TokioContext;
    use std::time::Duration;

    fn config(workers: usize, seed: Option<u64>) -> EngineConfig {
        EngineConfig {
            simulation: SimulationConfig {
                parallel_workers: workers,
                seed,
                ..Default::default()
            },
            pool: PoolSettings::instant(),
            ..Default::default()
        }
    }

    fn dispatcher(config: EngineConfig) -> (Arc<Dispatcher<TokioContext>>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::builder(Arc::new(TokioContext::new()))
            .config(config)
            .events(sink.clone())
            .build()
            .unwrap();
        (Arc::new(dispatcher), sink)
    }

    fn normal_scenario(name: &str, iterations: u32) -> Scenario {
        ScenarioBuilder::new(name)
            .iterations(iterations)
            .add_normal_variable("x", 0.5, 0.1)
            .build()
            .unwrap()
    }

    /// Fails every iteration in `[from, to)`.
    struct FailingRange {
        from: u32,
        to: u32,
    }

    impl OutcomeFunction for FailingRange {
        fn outcome(&self, sample: &Sample<'_>) -> std::result::Result<f64, SamplerError> {
            if (self.from..self.to).contains(&sample.iteration) {
                return Err(SamplerError::Outcome("injected failure".into()));
            }
            Ok(sample.values[0])
        }
    }

    /// Sleeps on every iteration.
    struct Slow(Duration);

    impl OutcomeFunction for Slow {
        fn outcome(&self, sample: &Sample<'_>) -> std::result::Result<f64, SamplerError> {
            std::thread::sleep(self.0);
            Ok(sample.values[0])
        }
    }

    #[tokio::test]
    async fn test_mean_across_four_tasks() {
        let (dispatcher, sink) = dispatcher(config(4, Some(17)));
        let scenario = normal_scenario("mean", 10_000);

        let result = dispatcher.run_simulation(&scenario).await.unwrap();
        assert_eq!(result.iterations, 10_000);
        assert_eq!(result.failed_tasks, 0);
        assert_abs_diff_eq!(result.outcome_distribution.mean, 0.5, epsilon = 0.01);

        let progress: Vec<u32> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Progress(p) => Some(p.completed_iterations),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 4);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&10_000));
        assert!(dispatcher.get_progress(scenario.id).is_none());
    }

    #[tokio::test]
    async fn test_seeded_runs_repeat_and_cache() {
        let (dispatcher, _) = dispatcher(config(3, Some(99)));
        let scenario = normal_scenario("seeded", 3_000);

        let first = dispatcher.run_simulation(&scenario).await.unwrap();
        assert_eq!(dispatcher.cache().len(), 1);
        let second = dispatcher.run_simulation(&scenario).await.unwrap();
        assert_eq!(first, second);

        // Same seed without the cache gives the same distribution
        let mut uncached = dispatcher.config().simulation.clone();
        uncached.enable_caching = false;
        let third = dispatcher.run_simulation_with(&scenario, &uncached).await.unwrap();
        assert_eq!(first.outcome_distribution, third.outcome_distribution);
        assert_eq!(dispatcher.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_unseeded_runs_skip_cache() {
        let (dispatcher, _) = dispatcher(config(2, None));
        dispatcher.run_simulation(&normal_scenario("fresh", 200)).await.unwrap();
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_drops_one_task() {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::builder(Arc::new(TokioContext::new()))
            .config(config(4, Some(3)))
            .outcome_function(Arc::new(FailingRange { from: 2_500, to: 5_000 }))
            .events(sink)
            .build()
            .unwrap();

        let result = dispatcher.run_simulation(&normal_scenario("partial", 10_000)).await.unwrap();
        assert_eq!(result.iterations, 7_500);
        assert_eq!(result.failed_tasks, 1);
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_all_tasks_failing_is_no_results() {
        let dispatcher = Dispatcher::builder(Arc::new(TokioContext::new()))
            .config(config(2, Some(3)))
            .outcome_function(Arc::new(FailingRange { from: 0, to: u32::MAX }))
            .build()
            .unwrap();

        let err = dispatcher.run_simulation(&normal_scenario("doomed", 100)).await.unwrap_err();
        assert!(matches!(err, EngineError::NoResults));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_task() {
        let mut config = config(1, Some(1));
        config.simulation.timeout_ms = 50;
        let dispatcher = Dispatcher::builder(Arc::new(TokioContext::new()))
            .config(config)
            .outcome_function(Arc::new(Slow(Duration::from_millis(20))))
            .build()
            .unwrap();

        let err = dispatcher.run_simulation(&normal_scenario("slow", 50)).await.unwrap_err();
        assert!(matches!(err, EngineError::NoResults));
    }

    #[tokio::test]
    async fn test_cancel_mid_run() {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Arc::new(
            Dispatcher::builder(Arc::new(TokioContext::new()))
                .config(config(1, Some(1)))
                .outcome_function(Arc::new(Slow(Duration::from_millis(5))))
                .events(sink.clone())
                .build()
                .unwrap(),
        );
        let scenario = normal_scenario("cancelled", 40);
        let id = scenario.id;

        let run = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run_simulation(&scenario).await })
        };
        while dispatcher.get_progress(id).is_none() {
            tokio::task::yield_now().await;
        }
        assert!(dispatcher.cancel(id));
        assert!(!dispatcher.cancel(id));

        // The single in-flight task runs to completion
        match run.await.unwrap() {
            Ok(result) => assert!(result.iterations <= 40),
            Err(e) => assert!(matches!(e, EngineError::NoResults)),
        }
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, EngineEvent::ScenarioCancelled { scenario_id } if *scenario_id == id)));
        assert!(dispatcher.get_progress(id).is_none());
    }

    #[tokio::test]
    async fn test_validation_fails_fast() {
        let (dispatcher, sink) = dispatcher(config(2, None));
        let mut scenario = normal_scenario("bad", 100);
        scenario.iterations = 0;

        let err = dispatcher.run_simulation(&scenario).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_iterations_above_configured_max() {
        let mut config = config(2, None);
        config.simulation.max_iterations = 500;
        let (dispatcher, _) = dispatcher(config);

        let err = dispatcher.run_simulation(&normal_scenario("big", 1_000)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ScenarioError::IterationsOutOfRange { got: 1_000, max: 500 })
        ));
    }

    #[tokio::test]
    async fn test_batch_runs_cheapest_first() {
        let mut config = config(2, Some(5));
        config.pool_size = 1;
        let (dispatcher, sink) = dispatcher(config);
        let scenarios = vec![
            normal_scenario("large", 3_000),
            normal_scenario("small", 100),
            normal_scenario("medium", 1_000),
        ];

        let results = dispatcher.run_batch_simulations(scenarios, Priority::Low).await.unwrap();
        let iterations: Vec<u32> = results.iter().map(|r| r.iterations).collect();
        assert_eq!(iterations, vec![100, 1_000, 3_000]);

        // One at a time, so completions follow execution order
        let completed: Vec<u32> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::ScenarioCompleted { iterations, .. } => Some(iterations),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![100, 1_000, 3_000]);
    }

    #[tokio::test]
    async fn test_batch_validates_everything_first() {
        let (dispatcher, sink) = dispatcher(config(2, None));
        let mut bad = normal_scenario("bad", 100);
        bad.iterations = 2_000_000;

        let err = dispatcher
            .run_batch_simulations(vec![normal_scenario("ok", 100), bad], Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_batch_sends_large_scenarios_to_resource_pool() {
        let mut config = config(2, Some(8));
        config.distributed_threshold = 1_000;
        let (dispatcher, _) = dispatcher(config);

        let results = dispatcher
            .run_batch_simulations(vec![normal_scenario("big", 4_000)], Priority::High)
            .await
            .unwrap();
        assert_eq!(results[0].iterations, 4_000);

        let completed: u64 = dispatcher.resources().resources().await.iter().map(|r| r.tasks_completed).sum();
        assert!(completed >= 2);
    }

    #[tokio::test]
    async fn test_distributed_progress_per_task() {
        let mut config = config(2, Some(6));
        config.pool.local_workers = 4;
        let (dispatcher, sink) = dispatcher(config);

        let result = dispatcher
            .run_distributed(&normal_scenario("spread", 4_000), Priority::Normal, 0)
            .await
            .unwrap();
        assert_eq!(result.iterations, 4_000);

        let progress: Vec<u32> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Progress(p) => Some(p.completed_iterations),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1_000, 2_000, 3_000, 4_000]);
    }

    #[tokio::test]
    async fn test_distributed_tasks_time_out() {
        let mut config = config(2, Some(1));
        config.simulation.timeout_ms = 50;
        let dispatcher = Dispatcher::builder(Arc::new(TokioContext::new()))
            .config(config)
            .outcome_function(Arc::new(Slow(Duration::from_millis(10))))
            .build()
            .unwrap();

        // Two local resources, 30 iterations of 10ms each
        let started = std::time::Instant::now();
        let err = dispatcher
            .run_distributed(&normal_scenario("slow", 60), Priority::Normal, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoResults));
        assert!(started.elapsed() < Duration::from_millis(250));

        // Resources stay busy until their samplers return
        assert_eq!(dispatcher.resources().stats().await.busy, 2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        let stats = dispatcher.resources().stats().await;
        assert_eq!((stats.busy, stats.idle), (0, 2));
    }

    #[tokio::test]
    async fn test_distributed_on_virtual_clock() {
        let ctx = SimContext::shared(4);
        let dispatcher = Dispatcher::builder(Arc::clone(&ctx))
            .config(config(2, Some(4)))
            .build()
            .unwrap();

        let result = dispatcher
            .run_distributed(&normal_scenario("virtual", 2_000), Priority::Normal, 0)
            .await
            .unwrap();
        assert_eq!(result.iterations, 2_000);
        assert_abs_diff_eq!(result.outcome_distribution.mean, 0.5, epsilon = 0.02);
    }
}
