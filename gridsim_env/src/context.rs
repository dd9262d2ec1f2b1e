//! Core runtime context trait for the Gridsim engine.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for interacting with the runtime.
///
/// The dispatcher and the resource pool never reach for a process-wide
/// clock or RNG directly. Everything time- or entropy-related goes through
/// this trait so the engine can run against the real clock in production
/// and against a manually advanced clock in tests and drills.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` (in `gridsim_engine`) - virtual clock, seeded RNG
#[async_trait]
pub trait EngineContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since the context was created.
    ///
    /// Used for heartbeats, cooldowns and progress estimates.
    fn now(&self) -> Duration;

    /// Suspends the caller for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: waits until the virtual clock has been advanced far enough
    async fn sleep(&self, duration: Duration);

    /// Spawns a named background task.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives an RNG stream.
    ///
    /// Seeded contexts combine their master seed with `stream` so that each
    /// consumer gets an independent but reproducible stream.
    fn derive_rng(&self, stream: u64) -> ChaCha8Rng;

    /// Returns the context's seed (0 when unseeded).
    fn seed(&self) -> u64;
}
