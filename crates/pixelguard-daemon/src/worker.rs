//! Reconciliation workers and credential health.
//!
//! One worker task per credential. A worker dequeues the most urgent
//! corrective task and retries it until the observed pixel matches the
//! desired color, re-reading the canvas before every attempt so work that
//! someone else already did (or that became moot) is dropped without a
//! draw call. Pacing is server-driven: each response's suggested cooldown
//! is honored, with a fixed fallback when no usable cooldown arrives.
//!
//! Credential health is per-worker: consecutive authentication rejections
//! past the threshold retire the worker permanently; any success resets
//! the count. Other workers are untouched. When the last worker retires
//! the pool broadcasts zero on its active-count channel so the daemon can
//! surface the condition instead of idling silently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pixelguard_core::guard::CorrectiveTask;
use pixelguard_core::queue::ReconcileQueue;

use crate::store::CanvasStore;
use crate::transport::{Credential, DrawApi};

/// Draw status code meaning the credential was rejected.
pub const AUTH_INVALID_STATUS: i64 = -101;

/// Why a worker's task loop ended.
enum TaskOutcome {
    /// Task finished or was discarded; dequeue the next one.
    Done,
    /// The credential crossed the failure threshold.
    Retired,
    /// Shutdown was requested.
    Shutdown,
}

/// Per-credential health, owned by its worker.
#[derive(Debug, Default)]
struct CredentialHealth {
    consecutive_auth_failures: u32,
}

/// Shared collaborators every worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<CanvasStore>,
    pub queue: Arc<ReconcileQueue>,
    pub draw: Arc<dyn DrawApi>,
    pub fallback_cooldown: Duration,
    /// Snapshot age workers tolerate before re-checking a pixel.
    pub staleness_threshold: Duration,
    pub auth_failure_threshold: u32,
    pub shutdown: CancellationToken,
}

/// Handle to the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    active_rx: watch::Receiver<usize>,
}

impl WorkerPool {
    /// Spawn one worker per credential.
    #[must_use]
    pub fn spawn(credentials: Vec<Credential>, context: WorkerContext) -> Self {
        let (active_tx, active_rx) = watch::channel(credentials.len());
        let active_tx = Arc::new(active_tx);

        let handles = credentials
            .into_iter()
            .map(|credential| {
                let context = context.clone();
                let active_tx = Arc::clone(&active_tx);
                tokio::spawn(worker_loop(credential, context, active_tx))
            })
            .collect();

        Self { handles, active_rx }
    }

    /// Observe the number of workers that have not retired.
    #[must_use]
    pub fn active_workers(&self) -> watch::Receiver<usize> {
        self.active_rx.clone()
    }

    /// Wait for every worker to finish (after shutdown or retirement).
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    credential: Credential,
    context: WorkerContext,
    active_tx: Arc<watch::Sender<usize>>,
) {
    info!(worker = %credential.name, "worker started");
    let mut health = CredentialHealth::default();

    loop {
        let task = tokio::select! {
            () = context.shutdown.cancelled() => break,
            task = context.queue.dequeue() => task,
        };

        match run_task(&credential, &context, &mut health, task).await {
            TaskOutcome::Done => {}
            TaskOutcome::Shutdown => break,
            TaskOutcome::Retired => {
                let mut remaining = 0;
                active_tx.send_modify(|active| {
                    *active = active.saturating_sub(1);
                    remaining = *active;
                });
                error!(
                    worker = %credential.name,
                    remaining,
                    "retiring worker after repeated authentication rejections"
                );
                if remaining == 0 {
                    error!("no active credentials remain; reconciliation is stalled");
                }
                return;
            }
        }
    }
    info!(worker = %credential.name, "worker stopped");
}

/// Retry one corrective task until the pixel reads back correct.
async fn run_task(
    credential: &Credential,
    context: &WorkerContext,
    health: &mut CredentialHealth,
    task: CorrectiveTask,
) -> TaskOutcome {
    loop {
        if context.shutdown.is_cancelled() {
            return TaskOutcome::Shutdown;
        }

        // Always re-read before drawing: the pixel may already be correct
        // (duplicate task, another worker, or the feed caught up). When
        // the snapshot has gone stale (feed down), refresh it first so
        // the check is against something recent; concurrent workers
        // collapse into one fetch.
        context.store.lazy_refresh(context.staleness_threshold).await;
        match context.store.get(task.x, task.y) {
            Ok(observed) if observed == task.color => {
                debug!(
                    worker = %credential.name,
                    x = task.x,
                    y = task.y,
                    "pixel already correct, discarding task"
                );
                return TaskOutcome::Done;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "discarding task outside the canvas");
                return TaskOutcome::Done;
            }
        }

        let started = Instant::now();
        let cooldown = match context.draw.draw(credential, task.x, task.y, task.color).await {
            Ok(response) if response.status_code == 0 => {
                health.consecutive_auth_failures = 0;
                info!(
                    worker = %credential.name,
                    x = task.x,
                    y = task.y,
                    color = %task.color,
                    priority = task.priority,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "pixel drawn"
                );
                response.cooldown
            }
            Ok(response) if response.status_code == AUTH_INVALID_STATUS => {
                health.consecutive_auth_failures += 1;
                warn!(
                    worker = %credential.name,
                    failures = health.consecutive_auth_failures,
                    threshold = context.auth_failure_threshold,
                    "draw rejected: credential invalid"
                );
                if health.consecutive_auth_failures >= context.auth_failure_threshold {
                    return TaskOutcome::Retired;
                }
                response.cooldown
            }
            Ok(response) => {
                // Transient server-side refusal; the cooldown still applies.
                warn!(
                    worker = %credential.name,
                    status = response.status_code,
                    "draw refused, will retry"
                );
                response.cooldown
            }
            Err(error) => {
                warn!(
                    worker = %credential.name,
                    %error,
                    "draw request failed, applying fallback cooldown"
                );
                context.fallback_cooldown
            }
        };

        if !cooldown.is_zero() {
            tokio::select! {
                () = context.shutdown.cancelled() => return TaskOutcome::Shutdown,
                () = tokio::time::sleep(cooldown) => {}
            }
        }
    }
}
