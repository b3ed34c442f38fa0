//! Shared observed-canvas store.
//!
//! One coarse `std::sync::Mutex` guards the bitmap; every access is a
//! short in-memory operation and the lock is never held across an await.
//! Refreshes go through a separate async gate so that concurrent callers
//! collapse into a single snapshot fetch (the losers find a fresh canvas
//! when the gate opens). Every successful full replace bumps a generation
//! counter on a watch channel; the drift monitor subscribes to it and runs
//! a full scan per bump.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pixelguard_core::canvas::{Canvas, CanvasError, PixelUpdate};
use pixelguard_core::palette::ColorCode;

use crate::transport::SnapshotFetcher;

/// Result of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The canvas was replaced with a fresh snapshot.
    Refreshed,
    /// The cached canvas was still fresh enough; no fetch was made.
    Cached,
    /// The fetch or the snapshot validation failed; the canvas is
    /// unchanged. Refresh failures are never fatal, they just mean "no
    /// update this time".
    Failed,
}

/// The shared observed canvas, with single-flight refresh and a resync
/// signal.
pub struct CanvasStore {
    canvas: Mutex<Canvas>,
    fetcher: Arc<dyn SnapshotFetcher>,
    /// Serializes refresh attempts; the canvas lock stays short.
    refresh_gate: tokio::sync::Mutex<()>,
    last_refresh: Mutex<Option<Instant>>,
    resync_tx: watch::Sender<u64>,
}

/// Fill color for the canvas before the first snapshot lands.
const INITIAL_FILL: ColorCode = match ColorCode::from_ascii(b'0') {
    Some(code) => code,
    None => panic!("initial fill must be a palette member"),
};

impl CanvasStore {
    #[must_use]
    pub fn new(width: u32, height: u32, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        let (resync_tx, _) = watch::channel(0);
        Self {
            canvas: Mutex::new(Canvas::new(width, height, INITIAL_FILL)),
            fetcher,
            refresh_gate: tokio::sync::Mutex::new(()),
            last_refresh: Mutex::new(None),
            resync_tx,
        }
    }

    /// Read one pixel.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::OutOfBounds`] for coordinates outside the
    /// canvas.
    pub fn get(&self, x: u32, y: u32) -> Result<ColorCode, CanvasError> {
        self.lock_canvas().get(x, y)
    }

    /// Run a closure against the canvas under the lock.
    ///
    /// The closure must stay synchronous and short.
    pub fn with_canvas<R>(&self, f: impl FnOnce(&Canvas) -> R) -> R {
        f(&self.lock_canvas())
    }

    /// Apply a batch of single-pixel updates, returning the coordinates
    /// actually written. Out-of-bounds updates are logged and skipped; the
    /// rest of the batch still applies.
    pub fn apply_batch(&self, updates: &[PixelUpdate]) -> Vec<(u32, u32)> {
        let mut canvas = self.lock_canvas();
        let mut applied = Vec::with_capacity(updates.len());
        for update in updates {
            match canvas.set(update.x, update.y, update.color) {
                Ok(()) => applied.push((update.x, update.y)),
                Err(error) => {
                    warn!(%error, "skipping out-of-bounds feed update");
                }
            }
        }
        applied
    }

    /// Subscribe to the resync signal. The value is a generation counter
    /// bumped on every successful full replace; receivers only care that
    /// it changed.
    #[must_use]
    pub fn subscribe_resyncs(&self) -> watch::Receiver<u64> {
        self.resync_tx.subscribe()
    }

    /// Refresh only if the cached snapshot is older than `staleness`.
    /// Concurrent callers collapse into one fetch.
    pub async fn lazy_refresh(&self, staleness: Duration) -> RefreshOutcome {
        let _gate = self.refresh_gate.lock().await;

        let last = *self.lock_last_refresh();
        if let Some(age) = last.map(|at| at.elapsed()) {
            if age <= staleness {
                debug!(age_ms = age.as_millis() as u64, "snapshot still fresh");
                return RefreshOutcome::Cached;
            }
        }

        self.refresh_locked().await
    }

    /// Refresh unconditionally (used at startup and after a feed gap).
    pub async fn force_refresh(&self) -> RefreshOutcome {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Fetch and install a snapshot. Caller holds the refresh gate.
    async fn refresh_locked(&self) -> RefreshOutcome {
        let bitmap = match self.fetcher.fetch_bitmap().await {
            Ok(bitmap) => bitmap,
            Err(error) => {
                warn!(%error, "snapshot fetch failed; keeping current canvas");
                return RefreshOutcome::Failed;
            }
        };

        if let Err(error) = self.lock_canvas().replace_from_codes(&bitmap) {
            warn!(%error, "snapshot rejected; keeping current canvas");
            return RefreshOutcome::Failed;
        }

        *self.lock_last_refresh() = Some(Instant::now());
        self.resync_tx.send_modify(|generation| *generation += 1);
        info!("canvas resynced from snapshot");
        RefreshOutcome::Refreshed
    }

    fn lock_canvas(&self) -> std::sync::MutexGuard<'_, Canvas> {
        self.canvas.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_last_refresh(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_refresh.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::transport::TransportError;

    use super::*;

    struct CountingFetcher {
        bitmap: String,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl SnapshotFetcher for CountingFetcher {
        async fn fetch_bitmap(&self) -> Result<String, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.bitmap.clone())
        }
    }

    fn fetcher(bitmap: &str, delay: Duration) -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            bitmap: bitmap.to_string(),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    #[tokio::test]
    async fn force_refresh_replaces_and_signals() {
        let f = fetcher("1234", Duration::ZERO);
        let store = CanvasStore::new(2, 2, Arc::clone(&f) as Arc<dyn SnapshotFetcher>);
        let mut resyncs = store.subscribe_resyncs();

        assert_eq!(store.force_refresh().await, RefreshOutcome::Refreshed);
        assert_eq!(store.with_canvas(|c| c.to_code_string()), "1234");
        assert!(resyncs.has_changed().unwrap());
    }

    #[tokio::test]
    async fn concurrent_lazy_refreshes_collapse_into_one_fetch() {
        let f = fetcher("1111", Duration::from_millis(30));
        let store = Arc::new(CanvasStore::new(
            2,
            2,
            Arc::clone(&f) as Arc<dyn SnapshotFetcher>,
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.lazy_refresh(Duration::from_secs(60)).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == RefreshOutcome::Refreshed)
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == RefreshOutcome::Cached)
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn lazy_refresh_fetches_again_once_stale() {
        let f = fetcher("1111", Duration::ZERO);
        let store = CanvasStore::new(2, 2, Arc::clone(&f) as Arc<dyn SnapshotFetcher>);

        assert_eq!(
            store.lazy_refresh(Duration::from_secs(60)).await,
            RefreshOutcome::Refreshed
        );
        // Zero staleness: the cache is immediately stale again.
        assert_eq!(
            store.lazy_refresh(Duration::ZERO).await,
            RefreshOutcome::Refreshed
        );
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_the_canvas_and_stays_quiet() {
        struct FailingFetcher;

        #[async_trait]
        impl SnapshotFetcher for FailingFetcher {
            async fn fetch_bitmap(&self) -> Result<String, TransportError> {
                Err(TransportError::Closed)
            }
        }

        let store = CanvasStore::new(2, 2, Arc::new(FailingFetcher));
        let mut resyncs = store.subscribe_resyncs();

        assert_eq!(store.force_refresh().await, RefreshOutcome::Failed);
        assert_eq!(store.with_canvas(|c| c.to_code_string()), "0000");
        assert!(!resyncs.has_changed().unwrap());
    }

    #[tokio::test]
    async fn bad_snapshot_is_rejected_without_partial_write() {
        let f = fetcher("12Z4", Duration::ZERO);
        let store = CanvasStore::new(2, 2, f);
        assert_eq!(store.force_refresh().await, RefreshOutcome::Failed);
        assert_eq!(store.with_canvas(|c| c.to_code_string()), "0000");
    }

    #[tokio::test]
    async fn apply_batch_skips_out_of_bounds() {
        let f = fetcher("0000", Duration::ZERO);
        let store = CanvasStore::new(2, 2, f);
        let e = ColorCode::from_char('E').unwrap();

        let applied = store.apply_batch(&[
            PixelUpdate { x: 0, y: 0, color: e },
            PixelUpdate { x: 9, y: 9, color: e },
            PixelUpdate { x: 1, y: 1, color: e },
        ]);

        assert_eq!(applied, vec![(0, 0), (1, 1)]);
        assert_eq!(store.get(0, 0).unwrap(), e);
    }
}
