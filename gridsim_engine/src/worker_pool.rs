//! Fixed-size local worker pool.
//!
//! Each worker owns an mpsc inbox and processes one task at a time on the
//! blocking thread pool. Tasks are handed out round-robin and answered
//! through a oneshot channel.

use gridsim_core::{Sampler, WorkerResult, WorkerTask};
use gridsim_env::EngineContext;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Queued tasks per worker before `execute` waits for room.
const INBOX_CAPACITY: usize = 64;

struct Job {
    task: WorkerTask,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Sender<WorkerResult>,
}

pub struct WorkerPool {
    inboxes: Vec<mpsc::Sender<Job>>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) sharing `sampler`.
    pub fn new<C: EngineContext>(ctx: &C, size: usize, sampler: Sampler) -> Self {
        let inboxes = (0..size.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
                ctx.spawn(&format!("worker-{index}"), worker_loop(index, rx, sampler.clone()));
                tx
            })
            .collect();

        Self {
            inboxes,
            next: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.inboxes.len()
    }

    /// Runs one task on the next worker, bounded by `timeout`.
    ///
    /// Always returns a result: timeouts, cancellation and lost workers come
    /// back as failed results. A timed-out task keeps its worker busy until
    /// it finishes on its own.
    pub async fn execute<C: EngineContext>(
        &self,
        ctx: &C,
        task: WorkerTask,
        cancelled: Arc<AtomicBool>,
        timeout: Duration,
    ) -> WorkerResult {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.inboxes.len();
        let (reply, rx) = oneshot::channel();
        let fallback = task.clone();

        let job = Job {
            task,
            cancelled,
            reply,
        };

        let mut deadline = ctx.sleep(timeout);

        tokio::select! {
            sent = self.inboxes[slot].send(job) => {
                if sent.is_err() {
                    return WorkerResult::failed(&fallback, format!("worker {slot} is gone"), 0);
                }
            }
            _ = &mut deadline => {
                warn!(task = %fallback.id, "Task timed out waiting for a worker");
                return WorkerResult::failed(&fallback, timeout_message(timeout), timeout.as_millis() as u64);
            }
        }

        tokio::select! {
            result = rx => result.unwrap_or_else(|_| {
                WorkerResult::failed(&fallback, format!("worker {slot} dropped the task"), 0)
            }),
            _ = &mut deadline => {
                warn!(task = %fallback.id, timeout_ms = timeout.as_millis() as u64, "Task timed out");
                WorkerResult::failed(&fallback, timeout_message(timeout), timeout.as_millis() as u64)
            }
        }
    }
}

pub(crate) fn timeout_message(timeout: Duration) -> String {
    format!("timed out after {}ms", timeout.as_millis())
}

async fn worker_loop(index: usize, mut inbox: mpsc::Receiver<Job>, sampler: Sampler) {
    while let Some(job) = inbox.recv().await {
        let result = if job.cancelled.load(Ordering::Acquire) {
            debug!(worker = index, task = %job.task.id, "Skipping cancelled task");
            WorkerResult::failed(&job.task, "cancelled", 0)
        } else {
            let sampler = sampler.clone();
            let task = job.task.clone();
            match tokio::task::spawn_blocking(move || sampler.run(&task)).await {
                Ok(result) => result,
                Err(e) => WorkerResult::failed(&job.task, format!("worker panicked: {e}"), 0),
            }
        };
        // The caller may have timed out and gone away
        let _ = job.reply.send(result);
    }
    debug!(worker = index, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsim_core::{split_tasks, SamplerConfig, Scenario, ScenarioBuilder, TaskConfig};
    use gridsim_env::TokioContext;

    fn tasks(iterations: u32, workers: usize) -> Vec<WorkerTask> {
        let scenario: Arc<Scenario> = Arc::new(
            ScenarioBuilder::new("pool")
                .iterations(iterations)
                .add_normal_variable("x", 0.5, 0.1)
                .build()
                .unwrap(),
        );
        let config = TaskConfig {
            sampler: SamplerConfig::default(),
            seed: 5,
        };
        split_tasks(&scenario, workers, config)
    }

    #[tokio::test]
    async fn test_executes_on_workers() {
        let ctx = TokioContext::new();
        let pool = WorkerPool::new(&ctx, 2, Sampler::default());
        assert_eq!(pool.size(), 2);

        for task in tasks(400, 4) {
            let result = pool
                .execute(&ctx, task, Arc::new(AtomicBool::new(false)), Duration::from_secs(5))
                .await;
            assert!(result.is_success());
            assert_eq!(result.iterations, 100);
        }
    }

    #[tokio::test]
    async fn test_cancelled_task_is_skipped() {
        let ctx = TokioContext::new();
        let pool = WorkerPool::new(&ctx, 1, Sampler::default());
        let task = tasks(100, 1).remove(0);

        let result = pool
            .execute(&ctx, task, Arc::new(AtomicBool::new(true)), Duration::from_secs(5))
            .await;
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_zero_size_gets_one_worker() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let pool = WorkerPool::new(&TokioContext::new(), 0, Sampler::default());
            assert_eq!(pool.size(), 1);
        });
    }
}
