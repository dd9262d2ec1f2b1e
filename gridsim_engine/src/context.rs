//! Simulation context implementing EngineContext with a virtual clock.

use async_trait::async_trait;
use gridsim_env::EngineContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Context backed by a manually advanced clock and a master seed.
///
/// This implements `EngineContext` using:
/// - A virtual clock that only moves on `advance_time` / `set_time`
/// - Sleep that resolves once the clock reaches the deadline
/// - Seeded ChaCha8 streams for reproducible resource choices
///
/// Autoscaler cooldowns, heartbeat staleness and provisioning delays can
/// therefore be walked through step by step.
#[derive(Clone)]
pub struct SimContext {
    /// Master seed for this context
    seed: u64,

    /// Current virtual time, shared by clones
    clock: Arc<watch::Sender<Duration>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        let (clock, _) = watch::channel(Duration::ZERO);
        Self {
            seed,
            clock: Arc::new(clock),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time, waking every sleeper whose deadline passed.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.send_modify(|now| *now += duration);
    }

    /// Sets the virtual time. Moving backwards is ignored.
    pub fn set_time(&self, time: Duration) {
        self.clock.send_modify(|now| *now = (*now).max(time));
    }
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("seed", &self.seed)
            .field("now", &self.now())
            .finish()
    }
}

#[async_trait]
impl EngineContext for SimContext {
    fn now(&self) -> Duration {
        *self.clock.borrow()
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let deadline = self.now() + duration;
        let mut rx = self.clock.subscribe();
        // The sender lives as long as `self`, so this only returns on the deadline
        let _ = rx.wait_for(|now| *now >= deadline).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        trace!(task = name, "spawn");
        tokio::spawn(future)
    }

    fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
        // Combine master seed with the stream for an independent sequence
        let combined_seed = self.seed.wrapping_mul(0x517cc1b727220a95) ^ stream;
        ChaCha8Rng::seed_from_u64(combined_seed)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
