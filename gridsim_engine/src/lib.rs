//! Gridsim Engine - parallel execution of Monte Carlo scenarios
//!
//! This crate runs validated scenarios from `gridsim_core` on two layers of
//! data-parallel workers and reports progress and resource activity through
//! an injected [`EventSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                           │
//! │   validate ─► split_tasks ─► progress ─► Aggregator         │
//! │       │                                                     │
//! │  ┌────▼─────────────┐          ┌──────────────────────────┐ │
//! │  │   WorkerPool     │          │      ResourcePool         │ │
//! │  │ N local workers  │          │ local │ cloud │ container │ │
//! │  │ round-robin      │          │   Autoscaler + health     │ │
//! │  └──────────────────┘          └──────────────────────────┘ │
//! │              ▲                             ▲                │
//! │              └──────── EngineContext ──────┘                │
//! │             (TokioContext or virtual-clock SimContext)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gridsim_engine::{Dispatcher, EngineConfig};
//! use gridsim_env::TokioContext;
//!
//! let dispatcher = Dispatcher::builder(Arc::new(TokioContext::new()))
//!     .config(EngineConfig::default())
//!     .build()?;
//! let result = dispatcher.run_simulation(&scenario).await?;
//! println!("win probability {:.3}", result.outcome_distribution.mean);
//! ```

pub mod autoscaler;
pub mod cache;
pub mod config;
mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
mod exporter;
pub mod presets;
mod progress;
pub mod resource_pool;
mod worker_pool;

pub use autoscaler::{Autoscaler, ScalingDecision, ScalingSnapshot};
pub use cache::{Fingerprint, ResultCache};
pub use config::{EngineConfig, PoolSettings, Priority, ScalingPolicy, SimulationConfig};
pub use context::SimContext;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{EngineError, Result};
pub use events::{ChannelSink, EngineEvent, EventSink, FanoutSink, RecordingSink, TracingSink};
pub use exporter::{ExportedFailure, ExportedRun, ResultExport, ScenarioSummary};
pub use presets::PresetId;
pub use progress::ProgressTracker;
pub use resource_pool::{ComputeResource, PoolStats, ResourceKind, ResourcePool, ResourceStatus};
pub use worker_pool::WorkerPool;
