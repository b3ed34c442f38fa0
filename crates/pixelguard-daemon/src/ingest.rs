//! Change-feed ingestion and drift monitoring.
//!
//! [`FeedIngestor`] owns the feed connection lifecycle: connect, send the
//! subscribe token, spawn a heartbeat ticker on the send half, and stream
//! messages from the receive half. Decoded update batches are applied to
//! the store and the touched coordinates get an incremental drift check.
//! Any stream end, clean or not, is an unknown gap: the ingestor forces
//! one full resync before reconnecting, so missed updates are healed by
//! the snapshot rather than guessed at.
//!
//! [`run_drift_monitor`] is the other half of the loop: it runs a full
//! drift scan at startup and again after every resync signal from the
//! store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pixelguard_core::feed::{
    self, HEARTBEAT_FRAME, Opcode, RecordHeader, SUBSCRIBE_TOKEN,
};
use pixelguard_core::guard::{BASELINE_PRIORITY, GuardRegion};
use pixelguard_core::queue::ReconcileQueue;

use crate::store::CanvasStore;
use crate::transport::{FeedConnector, FeedSink, FeedSource};

/// Feed connection lifecycle, observable for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Why a streaming session ended.
enum StreamEnd {
    Closed,
    Failed,
    Shutdown,
}

/// Owns the feed connection and feeds the store.
pub struct FeedIngestor {
    store: Arc<CanvasStore>,
    guard: Arc<Mutex<GuardRegion>>,
    queue: Arc<ReconcileQueue>,
    connector: Arc<dyn FeedConnector>,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
    state_tx: watch::Sender<FeedState>,
}

impl FeedIngestor {
    #[must_use]
    pub fn new(
        store: Arc<CanvasStore>,
        guard: Arc<Mutex<GuardRegion>>,
        queue: Arc<ReconcileQueue>,
        connector: Arc<dyn FeedConnector>,
        heartbeat_interval: Duration,
        reconnect_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(FeedState::Disconnected);
        Self {
            store,
            guard,
            queue,
            connector,
            heartbeat_interval,
            reconnect_delay,
            shutdown,
            state_tx,
        }
    }

    /// Observe connection state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown. Reconnects forever; the feed being down is a
    /// degraded mode, never a fatal one.
    pub async fn run(self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(FeedState::Connecting);
            let (mut sink, mut source) = match self.connector.connect().await {
                Ok(halves) => halves,
                Err(error) => {
                    warn!(%error, "feed connect failed");
                    self.set_state(FeedState::Disconnected);
                    if self.pause(self.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(error) = sink.send(&SUBSCRIBE_TOKEN).await {
                warn!(%error, "failed to send subscribe token");
                self.set_state(FeedState::Disconnected);
                if self.pause(self.reconnect_delay).await {
                    break;
                }
                continue;
            }

            let heartbeat = tokio::spawn(heartbeat_loop(sink, self.heartbeat_interval));

            self.set_state(FeedState::Streaming);
            info!("feed streaming");
            let end = self.stream(&mut *source).await;
            heartbeat.abort();
            self.set_state(FeedState::Disconnected);

            match end {
                StreamEnd::Shutdown => break,
                StreamEnd::Closed | StreamEnd::Failed => {
                    // Updates may have been lost in the gap; resync the
                    // whole canvas before trusting the feed again.
                    info!("feed stream ended; forcing full resync");
                    self.store.force_refresh().await;
                    if self.pause(self.reconnect_delay).await {
                        break;
                    }
                }
            }
        }
        self.set_state(FeedState::Disconnected);
        info!("feed ingestor stopped");
    }

    async fn stream(&self, source: &mut dyn FeedSource) -> StreamEnd {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return StreamEnd::Shutdown,
                message = source.next_message() => match message {
                    Ok(Some(bytes)) => self.handle_message(&bytes),
                    Ok(None) => {
                        info!("feed closed by server");
                        return StreamEnd::Closed;
                    }
                    Err(error) => {
                        warn!(%error, "feed stream error");
                        return StreamEnd::Failed;
                    }
                },
            }
        }
    }

    fn handle_message(&self, message: &[u8]) {
        let header = match RecordHeader::parse(message) {
            Ok(header) => header,
            Err(error) => {
                warn!(%error, "dropping unparseable feed message");
                return;
            }
        };

        match header.opcode_kind() {
            Opcode::Update => self.apply_updates(message),
            Opcode::Presence => debug!("feed presence record"),
            Opcode::HeartbeatAck => debug!("heartbeat acknowledged"),
            Opcode::Unknown(opcode) => {
                debug!(opcode, "ignoring unknown feed opcode");
            }
        }
    }

    fn apply_updates(&self, message: &[u8]) {
        let updates = feed::decode_update_batch(message);
        if updates.is_empty() {
            return;
        }

        let applied = self.store.apply_batch(&updates);
        debug!(count = applied.len(), "applied feed updates");

        // Lock order everywhere: guard, then canvas.
        let tasks = {
            let guard = lock_guard(&self.guard);
            self.store
                .with_canvas(|canvas| guard.find_drift_among(applied, canvas, BASELINE_PRIORITY))
        };
        for task in tasks {
            debug!(x = task.x, y = task.y, priority = task.priority, "feed update drifted");
            self.queue.enqueue(task);
        }
    }

    fn set_state(&self, state: FeedState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(?state, "feed state transition");
                *current = state;
                true
            }
        });
    }

    /// Sleep for `delay` unless shutdown fires first; true means shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }
}

/// Sends a heartbeat immediately, then every interval, until the sink
/// fails or the owning ingestor aborts the task.
async fn heartbeat_loop(mut sink: Box<dyn FeedSink>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        debug!("sending feed heartbeat");
        if let Err(error) = sink.send(&HEARTBEAT_FRAME).await {
            warn!(%error, "heartbeat send failed");
            return;
        }
    }
}

/// Full drift scan at startup and after every resync signal.
pub async fn run_drift_monitor(
    store: Arc<CanvasStore>,
    guard: Arc<Mutex<GuardRegion>>,
    queue: Arc<ReconcileQueue>,
    shutdown: CancellationToken,
) {
    let mut resyncs = store.subscribe_resyncs();

    // Initial scan covers the startup snapshot even if it landed before
    // this task subscribed.
    full_scan(&store, &guard, &queue);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = resyncs.changed() => {
                if changed.is_err() {
                    break;
                }
                full_scan(&store, &guard, &queue);
            }
        }
    }
    info!("drift monitor stopped");
}

fn full_scan(
    store: &CanvasStore,
    guard: &Arc<Mutex<GuardRegion>>,
    queue: &ReconcileQueue,
) {
    let tasks = {
        let guard = lock_guard(guard);
        store.with_canvas(|canvas| guard.find_drift(canvas, BASELINE_PRIORITY))
    };
    info!(drifted = tasks.len(), "full drift scan");
    for task in tasks {
        queue.enqueue(task);
    }
}

fn lock_guard(guard: &Arc<Mutex<GuardRegion>>) -> std::sync::MutexGuard<'_, GuardRegion> {
    guard.lock().unwrap_or_else(|e| e.into_inner())
}
