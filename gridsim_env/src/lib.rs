//! Gridsim Environment Abstraction Layer
//!
//! This crate provides the runtime seam that lets the simulation engine run
//! against **Production** (tokio clock, OS entropy) or a **Simulated** clock.
//!
//! # Intercepted concerns
//!
//! - Time (`now()`, `sleep()`)
//! - Background work (`spawn()`)
//! - Randomness (`derive_rng()`)
//!
//! The autoscaler's cooldown, the health sweep's heartbeat staleness and the
//! provisioning delays of elastic resources are all expressed in terms of
//! this clock, so they can be exercised deterministically.
//!
//! # Example
//!
//! ```ignore
//! use gridsim_env::{EngineContext, TokioContext};
//!
//! async fn sweep_loop<Ctx: EngineContext>(ctx: &Ctx) {
//!     loop {
//!         ctx.sleep(Duration::from_secs(30)).await;
//!         sweep(ctx.now());
//!     }
//! }
//! ```

mod context;
mod tokio_impl;
mod types;

pub use context::EngineContext;
pub use tokio_impl::TokioContext;
pub use types::{ResourceId, ScenarioId};
