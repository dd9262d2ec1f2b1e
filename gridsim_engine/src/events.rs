//! Progress and resource notifications.
//!
//! The dispatcher and the resource pool report through an injected
//! [`EventSink`]. Delivery order across tasks is not guaranteed.

use crate::resource_pool::{ResourceKind, ResourceStatus};
use gridsim_core::SimulationProgress;
use gridsim_env::{ResourceId, ScenarioId};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Something observers may care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Emitted on every task completion
    Progress(SimulationProgress),

    ResourceAdded {
        id: ResourceId,
        kind: ResourceKind,
    },

    ResourceRemoved {
        id: ResourceId,
        kind: ResourceKind,
    },

    ResourceStatusChanged {
        id: ResourceId,
        from: ResourceStatus,
        to: ResourceStatus,
    },

    /// Autoscaler added a resource
    ScaledUp {
        id: ResourceId,
        kind: ResourceKind,
        utilization: f64,
    },

    /// Autoscaler removed a resource
    ScaledDown {
        id: ResourceId,
        kind: ResourceKind,
        utilization: f64,
    },

    ScenarioCompleted {
        scenario_id: ScenarioId,
        iterations: u32,
        mean: f64,
        execution_time_ms: u64,
    },

    ScenarioCancelled {
        scenario_id: ScenarioId,
    },
}

/// Receiver of engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::Progress(p) => debug!(
                scenario = %p.scenario_id,
                completed = p.completed_iterations,
                total = p.total_iterations,
                eta_ms = p.estimated_time_remaining_ms,
                "Progress"
            ),
            EngineEvent::ResourceStatusChanged { id, from, to } => {
                debug!(resource = %id, ?from, ?to, "Resource status changed")
            }
            other => info!(event = ?other, "Engine event"),
        }
    }
}

/// Fans events out over a tokio broadcast channel.
///
/// Receivers that fall behind lose the oldest events.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Forwards each event to several sinks.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
