//! Elastic pool of heterogeneous compute resources.
//!
//! ## Resource lifecycle
//!
//! ```text
//!            provisioning delay
//!   Scaling ───────────────────► Idle ◄──────► Busy
//!      │                          │              │
//!      └──────────────┬───────────┴──────────────┘
//!                     ▼  heartbeat older than the timeout
//!                  Offline  (terminal until removed)
//! ```
//!
//! Local workers are created with the pool, never scale down and only
//! leave it once offline and explicitly removed. Elastic resources (cloud
//! functions and containers) are added and removed by the autoscaler.
//!
//! The registry is guarded by a single async mutex. Every status or load
//! change happens under it, so a resource cannot be handed two tasks.

use crate::autoscaler::{Autoscaler, ScalingDecision, ScalingSnapshot};
use crate::config::{PoolSettings, ScalingPolicy};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::worker_pool::timeout_message;
use gridsim_core::{split_tasks, Sampler, Scenario, TaskConfig, WorkerResult, WorkerTask};
use gridsim_env::{EngineContext, ResourceId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// RNG stream used for resource ids and elastic kind choices.
const POOL_RNG_STREAM: u64 = 0x7265_736f_7572_6365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Local,
    CloudFunction,
    Container,
}

impl ResourceKind {
    /// Concurrent task slots.
    pub fn capacity(&self) -> u32 {
        match self {
            ResourceKind::Local => 1,
            ResourceKind::CloudFunction => 2,
            ResourceKind::Container => 4,
        }
    }

    pub fn is_elastic(&self) -> bool {
        !matches!(self, ResourceKind::Local)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Local => "local",
            ResourceKind::CloudFunction => "cloud_function",
            ResourceKind::Container => "container",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Idle,
    Busy,
    /// Provisioning
    Scaling,
    Offline,
}

/// A unit of compute capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    pub capacity: u32,
    pub current_load: u32,
    pub last_heartbeat: Duration,

    /// When a provisioning resource becomes idle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<Duration>,
    pub tasks_completed: u64,
}

/// Snapshot counts for dashboards and logs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub scaling: usize,
    pub offline: usize,
    pub capacity: u32,
    pub load: u32,
    pub utilization: f64,
}

struct Registry {
    resources: BTreeMap<ResourceId, ComputeResource>,
    autoscaler: Autoscaler,
}

impl Registry {
    fn set_status(&mut self, id: ResourceId, to: ResourceStatus, events: &dyn EventSink) {
        if let Some(resource) = self.resources.get_mut(&id) {
            let from = resource.status;
            if from != to {
                resource.status = to;
                events.emit(EngineEvent::ResourceStatusChanged { id, from, to });
            }
        }
    }

    /// Finishes provisioning for every resource whose delay has passed.
    fn promote_ready(&mut self, now: Duration, events: &dyn EventSink) {
        let ready: Vec<ResourceId> = self
            .resources
            .values()
            .filter(|r| r.status == ResourceStatus::Scaling && r.ready_at.is_some_and(|t| t <= now))
            .map(|r| r.id)
            .collect();

        for id in ready {
            if let Some(resource) = self.resources.get_mut(&id) {
                resource.ready_at = None;
                resource.last_heartbeat = now;
            }
            self.set_status(id, ResourceStatus::Idle, events);
            debug!(resource = %id, "Resource provisioned");
        }
    }

    fn active(&self) -> usize {
        self.resources
            .values()
            .filter(|r| r.status != ResourceStatus::Offline)
            .count()
    }

    /// `(load + queue_depth) / capacity` over non-offline resources.
    fn utilization(&self, queue_depth: usize) -> f64 {
        let (load, capacity) = self
            .resources
            .values()
            .filter(|r| r.status != ResourceStatus::Offline)
            .fold((0u32, 0u32), |(load, capacity), r| {
                let counted = matches!(r.status, ResourceStatus::Idle | ResourceStatus::Busy);
                (load + if counted { r.current_load } else { 0 }, capacity + r.capacity)
            });

        let pressure = load as f64 + queue_depth as f64;
        if capacity == 0 {
            return if pressure > 0.0 { 1.0 } else { 0.0 };
        }
        pressure / capacity as f64
    }

    /// Least-loaded idle elastic resource.
    fn scale_down_candidate(&self) -> Option<ResourceId> {
        self.resources
            .values()
            .filter(|r| r.kind.is_elastic() && r.status == ResourceStatus::Idle)
            .min_by_key(|r| (r.current_load, r.id))
            .map(|r| r.id)
    }

    fn begin_task(&mut self, id: ResourceId, events: &dyn EventSink) {
        if let Some(resource) = self.resources.get_mut(&id) {
            resource.current_load += 1;
        }
        self.set_status(id, ResourceStatus::Busy, events);
    }

    fn finish_task(&mut self, id: ResourceId, now: Duration, events: &dyn EventSink) {
        let Some(resource) = self.resources.get_mut(&id) else {
            return;
        };
        resource.current_load = resource.current_load.saturating_sub(1);
        resource.tasks_completed += 1;
        if resource.status == ResourceStatus::Offline {
            return;
        }
        resource.last_heartbeat = now;
        if resource.current_load == 0 {
            self.set_status(id, ResourceStatus::Idle, events);
        }
    }

    fn stats(&self) -> PoolStats {
        let count = |status: ResourceStatus| self.resources.values().filter(|r| r.status == status).count();
        let live = self.resources.values().filter(|r| r.status != ResourceStatus::Offline);
        PoolStats {
            total: self.resources.len(),
            idle: count(ResourceStatus::Idle),
            busy: count(ResourceStatus::Busy),
            scaling: count(ResourceStatus::Scaling),
            offline: count(ResourceStatus::Offline),
            capacity: live.clone().map(|r| r.capacity).sum(),
            load: live.map(|r| r.current_load).sum(),
            utilization: self.utilization(0),
        }
    }
}

/// Resource registry plus autoscaler and health sweep.
pub struct ResourcePool<C: EngineContext> {
    ctx: Arc<C>,
    settings: PoolSettings,
    registry: Arc<Mutex<Registry>>,
    events: Arc<dyn EventSink>,
    sampler: Sampler,
    rng: StdMutex<ChaCha8Rng>,
    loops: StdMutex<Vec<JoinHandle<()>>>,
}

impl<C: EngineContext> ResourcePool<C> {
    /// Creates the pool with its permanent local workers.
    pub fn new(
        ctx: Arc<C>,
        policy: ScalingPolicy,
        settings: PoolSettings,
        sampler: Sampler,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        settings.validate()?;
        if settings.local_workers > policy.max_resources {
            return Err(EngineError::config("local_workers cannot exceed max_resources"));
        }
        let autoscaler = Autoscaler::new(policy)?;
        let mut rng = ctx.derive_rng(POOL_RNG_STREAM);
        let now = ctx.now();

        let mut resources = BTreeMap::new();
        for _ in 0..settings.local_workers {
            let resource = ComputeResource {
                id: ResourceId::from_seed(rng.gen()),
                kind: ResourceKind::Local,
                status: ResourceStatus::Idle,
                capacity: ResourceKind::Local.capacity(),
                current_load: 0,
                last_heartbeat: now,
                ready_at: None,
                tasks_completed: 0,
            };
            events.emit(EngineEvent::ResourceAdded {
                id: resource.id,
                kind: resource.kind,
            });
            resources.insert(resource.id, resource);
        }

        Ok(Self {
            ctx,
            settings,
            registry: Arc::new(Mutex::new(Registry {
                resources,
                autoscaler,
            })),
            events,
            sampler,
            rng: StdMutex::new(rng),
            loops: StdMutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn next_id(&self) -> ResourceId {
        ResourceId::from_seed(self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen())
    }

    fn pick_elastic_kind(&self) -> ResourceKind {
        if self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(0.5) {
            ResourceKind::CloudFunction
        } else {
            ResourceKind::Container
        }
    }

    fn provisioning_delay(&self, kind: ResourceKind) -> Duration {
        Duration::from_millis(match kind {
            ResourceKind::Local => 0,
            ResourceKind::CloudFunction => self.settings.cloud_function_provisioning_ms,
            ResourceKind::Container => self.settings.container_provisioning_ms,
        })
    }

    fn task_latency(&self, kind: ResourceKind) -> Duration {
        Duration::from_millis(match kind {
            ResourceKind::Local => self.settings.local_task_latency_ms,
            ResourceKind::CloudFunction => self.settings.cloud_function_task_latency_ms,
            ResourceKind::Container => self.settings.container_task_latency_ms,
        })
    }

    /// Inserts a resource. Elastic kinds start in `Scaling` and a timer
    /// promotes them once the provisioning delay has passed; any registry
    /// access after that point promotes them as well.
    fn provision(&self, registry: &mut Registry, kind: ResourceKind, now: Duration) -> ResourceId {
        let delay = self.provisioning_delay(kind);
        let id = self.next_id();
        let status = if delay.is_zero() {
            ResourceStatus::Idle
        } else {
            ResourceStatus::Scaling
        };

        registry.resources.insert(
            id,
            ComputeResource {
                id,
                kind,
                status,
                capacity: kind.capacity(),
                current_load: 0,
                last_heartbeat: now,
                ready_at: (!delay.is_zero()).then_some(now + delay),
                tasks_completed: 0,
            },
        );
        self.events.emit(EngineEvent::ResourceAdded { id, kind });

        if !delay.is_zero() {
            let ctx = Arc::clone(&self.ctx);
            let registry = Arc::clone(&self.registry);
            let events = Arc::clone(&self.events);
            self.ctx.spawn("provision", async move {
                ctx.sleep(delay).await;
                let now = ctx.now();
                registry.lock().await.promote_ready(now, events.as_ref());
            });
        }

        if let Some(interval) = self.settings.elastic_heartbeat_interval().filter(|_| kind.is_elastic()) {
            self.spawn_heartbeat(id, interval);
        }
        id
    }

    /// Reports a heartbeat for `id` every `interval` until the resource is
    /// removed, goes offline or the pool is dropped.
    fn spawn_heartbeat(&self, id: ResourceId, interval: Duration) {
        let ctx = Arc::clone(&self.ctx);
        let registry = Arc::downgrade(&self.registry);
        self.ctx.spawn("heartbeat", async move {
            loop {
                ctx.sleep(interval).await;
                let Some(shared) = registry.upgrade() else { break };
                let mut guard = shared.lock().await;
                match guard.resources.get_mut(&id) {
                    Some(resource) if resource.status != ResourceStatus::Offline => {
                        resource.last_heartbeat = ctx.now();
                    }
                    _ => break,
                }
            }
            trace!(resource = %id, "Heartbeat stopped");
        });
    }

    /// Adds a resource by hand. Fails when the pool is at `max_resources`.
    pub async fn add_resource(&self, kind: ResourceKind) -> Result<ResourceId> {
        let now = self.ctx.now();
        let mut registry = self.registry.lock().await;
        registry.promote_ready(now, self.events.as_ref());
        if registry.active() >= registry.autoscaler.policy().max_resources {
            return Err(EngineError::config("pool is at max_resources"));
        }
        let id = self.provision(&mut registry, kind, now);
        info!(resource = %id, %kind, "Resource added");
        Ok(id)
    }

    /// Removes a resource.
    ///
    /// Busy resources are never removed. Local workers can only be removed
    /// once offline.
    pub async fn remove_resource(&self, id: ResourceId) -> Result<ComputeResource> {
        let mut registry = self.registry.lock().await;
        let resource = registry.resources.get(&id).ok_or(EngineError::UnknownResource(id))?;

        if resource.status == ResourceStatus::Busy {
            return Err(EngineError::rejected(id, "resource is busy"));
        }
        if resource.kind == ResourceKind::Local && resource.status != ResourceStatus::Offline {
            return Err(EngineError::rejected(id, "local workers are permanent while online"));
        }

        let removed = registry.resources.remove(&id).ok_or(EngineError::UnknownResource(id))?;
        self.events.emit(EngineEvent::ResourceRemoved {
            id,
            kind: removed.kind,
        });
        info!(resource = %id, kind = %removed.kind, "Resource removed");
        Ok(removed)
    }

    /// Records a heartbeat. Offline resources stay offline.
    pub async fn heartbeat(&self, id: ResourceId) -> Result<()> {
        let now = self.ctx.now();
        let mut registry = self.registry.lock().await;
        let resource = registry.resources.get_mut(&id).ok_or(EngineError::UnknownResource(id))?;
        if resource.status == ResourceStatus::Offline {
            return Err(EngineError::rejected(id, "offline resources are not revived"));
        }
        resource.last_heartbeat = now;
        Ok(())
    }

    /// Snapshot of every resource, ordered by id.
    pub async fn resources(&self) -> Vec<ComputeResource> {
        let mut registry = self.registry.lock().await;
        registry.promote_ready(self.ctx.now(), self.events.as_ref());
        registry.resources.values().cloned().collect()
    }

    pub async fn utilization(&self) -> f64 {
        self.stats().await.utilization
    }

    pub async fn stats(&self) -> PoolStats {
        let mut registry = self.registry.lock().await;
        registry.promote_ready(self.ctx.now(), self.events.as_ref());
        registry.stats()
    }

    /// Time of the last scaling action, if any.
    pub async fn last_scaling_action(&self) -> Option<Duration> {
        self.registry.lock().await.autoscaler.last_action()
    }

    /// Runs one autoscaler evaluation and applies its decision.
    ///
    /// Returns the action actually taken.
    pub async fn evaluate_scaling(&self, queue_depth: usize) -> ScalingDecision {
        let now = self.ctx.now();
        let mut registry = self.registry.lock().await;
        registry.promote_ready(now, self.events.as_ref());

        let snapshot = ScalingSnapshot {
            utilization: registry.utilization(queue_depth),
            active: registry.active(),
            now,
        };

        match registry.autoscaler.evaluate(&snapshot) {
            ScalingDecision::ScaleUp => {
                let kind = self.pick_elastic_kind();
                let id = self.provision(&mut registry, kind, now);
                registry.autoscaler.record_action(now);
                info!(
                    resource = %id,
                    %kind,
                    utilization = snapshot.utilization,
                    active = snapshot.active + 1,
                    "Scaled up"
                );
                self.events.emit(EngineEvent::ScaledUp {
                    id,
                    kind,
                    utilization: snapshot.utilization,
                });
                ScalingDecision::ScaleUp
            }
            ScalingDecision::ScaleDown => {
                let Some(id) = registry.scale_down_candidate() else {
                    debug!(utilization = snapshot.utilization, "No idle elastic resource to remove");
                    return ScalingDecision::NoChange;
                };
                let Some(removed) = registry.resources.remove(&id) else {
                    return ScalingDecision::NoChange;
                };
                registry.autoscaler.record_action(now);
                info!(
                    resource = %id,
                    kind = %removed.kind,
                    utilization = snapshot.utilization,
                    active = snapshot.active - 1,
                    "Scaled down"
                );
                self.events.emit(EngineEvent::ResourceRemoved {
                    id,
                    kind: removed.kind,
                });
                self.events.emit(EngineEvent::ScaledDown {
                    id,
                    kind: removed.kind,
                    utilization: snapshot.utilization,
                });
                ScalingDecision::ScaleDown
            }
            ScalingDecision::NoChange => ScalingDecision::NoChange,
        }
    }

    /// Refreshes local worker heartbeats, then takes every resource with a
    /// stale heartbeat offline. Returns the resources taken offline.
    ///
    /// Elastic resources report their own heartbeat, so only unresponsive
    /// ones go stale; idle ones stay online for the autoscaler to remove.
    pub async fn health_check(&self) -> Vec<ResourceId> {
        let now = self.ctx.now();
        let timeout = self.settings.heartbeat_timeout();
        let mut registry = self.registry.lock().await;
        registry.promote_ready(now, self.events.as_ref());

        for resource in registry.resources.values_mut() {
            if resource.kind == ResourceKind::Local && resource.status != ResourceStatus::Offline {
                resource.last_heartbeat = now;
            }
        }

        let stale: Vec<ResourceId> = registry
            .resources
            .values()
            .filter(|r| r.status != ResourceStatus::Offline && now.saturating_sub(r.last_heartbeat) > timeout)
            .map(|r| r.id)
            .collect();

        for id in &stale {
            warn!(resource = %id, "Heartbeat stale, taking resource offline");
            registry.set_status(*id, ResourceStatus::Offline, self.events.as_ref());
        }
        stale
    }

    /// Runs a scenario across every idle resource.
    ///
    /// Iterations are split evenly over the idle resources, each of which
    /// runs one task after its kind's simulated latency. Each task is bounded
    /// by `timeout`; an expired task is reported as failed while its
    /// resource stays busy until the sampler actually returns.
    ///
    /// `on_settled` sees every task as it settles along with the iterations
    /// it was assigned. Every result comes back, failures included; callers
    /// aggregate the successful ones.
    pub async fn distribute(
        &self,
        scenario: &Arc<Scenario>,
        config: TaskConfig,
        cancelled: Arc<AtomicBool>,
        timeout: Duration,
        mut on_settled: impl FnMut(u32, &WorkerResult),
    ) -> Result<Vec<WorkerResult>> {
        let now = self.ctx.now();
        let assignments: Vec<(WorkerTask, ResourceId, ResourceKind)> = {
            let mut registry = self.registry.lock().await;
            registry.promote_ready(now, self.events.as_ref());

            let idle: Vec<(ResourceId, ResourceKind)> = registry
                .resources
                .values()
                .filter(|r| r.status == ResourceStatus::Idle)
                .map(|r| (r.id, r.kind))
                .collect();
            if idle.is_empty() {
                return Err(EngineError::ResourceExhausted);
            }

            let tasks = split_tasks(scenario, idle.len(), config);
            tasks
                .into_iter()
                .zip(idle)
                .map(|(task, (id, kind))| {
                    registry.begin_task(id, self.events.as_ref());
                    (task, id, kind)
                })
                .collect()
        };

        let expected = assignments.len();
        info!(scenario = %scenario.id, tasks = expected, "Distributing scenario");

        let (tx, mut rx) = mpsc::channel(expected);
        for (task, id, kind) in assignments {
            let tx = tx.clone();
            let ctx = Arc::clone(&self.ctx);
            let registry = Arc::clone(&self.registry);
            let events = Arc::clone(&self.events);
            let sampler = self.sampler.clone();
            let cancelled = Arc::clone(&cancelled);
            let latency = self.task_latency(kind);

            self.ctx.spawn("resource-task", async move {
                let fallback = task.clone();
                let assigned = task.iterations();
                let mut deadline = ctx.sleep(timeout);

                let expired = tokio::select! {
                    _ = ctx.sleep(latency) => false,
                    _ = &mut deadline => true,
                };

                let mut running = None;
                let result = if expired {
                    timed_out(&fallback, timeout)
                } else if cancelled.load(Ordering::Acquire) {
                    WorkerResult::failed(&task, "cancelled", 0)
                } else {
                    let mut work = tokio::task::spawn_blocking(move || sampler.run(&task));
                    let joined = tokio::select! {
                        joined = &mut work => Some(joined),
                        _ = &mut deadline => None,
                    };
                    match joined {
                        Some(Ok(result)) => result,
                        Some(Err(e)) => WorkerResult::failed(&fallback, format!("resource task panicked: {e}"), 0),
                        None => {
                            running = Some(work);
                            timed_out(&fallback, timeout)
                        }
                    }
                };

                match running {
                    Some(work) => {
                        let _ = tx.send((id, assigned, result)).await;
                        let _ = work.await;
                        registry.lock().await.finish_task(id, ctx.now(), events.as_ref());
                    }
                    None => {
                        registry.lock().await.finish_task(id, ctx.now(), events.as_ref());
                        let _ = tx.send((id, assigned, result)).await;
                    }
                }
            });
        }
        drop(tx);

        // Timed-out tasks hold their sender until the sampler returns, so
        // stop once every task has reported
        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            let Some((resource, assigned, result)) = rx.recv().await else {
                break;
            };
            if let Some(error) = &result.error {
                warn!(task = %result.task_id, %resource, %error, "Distributed task failed");
            }
            on_settled(assigned, &result);
            results.push(result);
        }

        if results.len() < expected {
            return Err(EngineError::Internal(format!(
                "{} of {} distributed tasks never reported",
                expected - results.len(),
                expected
            )));
        }
        Ok(results)
    }
}

fn timed_out(task: &WorkerTask, timeout: Duration) -> WorkerResult {
    warn!(task = %task.id, timeout_ms = timeout.as_millis() as u64, "Distributed task timed out");
    WorkerResult::failed(task, timeout_message(timeout), timeout.as_millis() as u64)
}

impl<C: EngineContext> ResourcePool<C> {
    /// Starts the health sweep and periodic autoscale loops.
    ///
    /// The loops hold a weak reference and stop once the pool is dropped.
    /// Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        if !loops.is_empty() {
            return;
        }

        let health_interval = Duration::from_secs(self.settings.health_check_interval_secs);
        let weak: Weak<Self> = Arc::downgrade(self);
        let ctx = Arc::clone(&self.ctx);
        loops.push(self.ctx.spawn("health-sweep", async move {
            loop {
                ctx.sleep(health_interval).await;
                let Some(pool) = weak.upgrade() else { break };
                pool.health_check().await;
            }
        }));

        let eval_interval = Duration::from_secs(self.settings.evaluation_interval_secs);
        let weak: Weak<Self> = Arc::downgrade(self);
        let ctx = Arc::clone(&self.ctx);
        loops.push(self.ctx.spawn("autoscale", async move {
            loop {
                ctx.sleep(eval_interval).await;
                let Some(pool) = weak.upgrade() else { break };
                pool.evaluate_scaling(0).await;
            }
        }));

        info!(
            health_interval_secs = health_interval.as_secs(),
            eval_interval_secs = eval_interval.as_secs(),
            "Resource pool loops started"
        );
    }

    /// Stops the background loops. Resources are left as they are.
    pub fn shutdown(&self) {
        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in loops.drain(..) {
            handle.abort();
        }
    }
}

impl<C: EngineContext> Drop for ResourcePool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
