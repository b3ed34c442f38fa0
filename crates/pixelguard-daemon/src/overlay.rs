//! Clock overlay controller.
//!
//! A self-rescheduling loop: compute the strip for the current wall-clock
//! time, stamp the guard region with the overlay's own priority so the
//! strip outranks baseline artwork in every later scan, enqueue corrective
//! tasks for the cells that currently drift, then sleep until the next
//! stage boundary. Strip cells outside the configured canvas are skipped,
//! which makes small test canvases (and misconfigured ones) harmless.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pixelguard_core::clock::{self, OverlayFrame};
use pixelguard_core::guard::{GuardRegion, OVERLAY_PRIORITY, OVERLAY_TASK_PRIORITY};
use pixelguard_core::queue::ReconcileQueue;

use crate::store::CanvasStore;

/// Runs the overlay loop until shutdown.
pub struct OverlayController {
    store: Arc<CanvasStore>,
    guard: Arc<Mutex<GuardRegion>>,
    queue: Arc<ReconcileQueue>,
    shutdown: CancellationToken,
}

impl OverlayController {
    #[must_use]
    pub fn new(
        store: Arc<CanvasStore>,
        guard: Arc<Mutex<GuardRegion>>,
        queue: Arc<ReconcileQueue>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            guard,
            queue,
            shutdown,
        }
    }

    pub async fn run(self) {
        info!("clock overlay started");
        loop {
            let frame = clock::compute_overlay(chrono::Local::now().naive_local());
            let next_wake = frame.next_wake;
            let enqueued = apply_frame(&self.store, &self.guard, &self.queue, &frame);
            debug!(
                enqueued,
                next_wake_s = next_wake.as_secs(),
                "clock overlay frame applied"
            );

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(next_wake) => {}
            }
        }
        info!("clock overlay stopped");
    }
}

/// Stamp the frame into the guard region and enqueue tasks for the strip
/// cells that drift right now. Returns the number of tasks enqueued.
pub fn apply_frame(
    store: &CanvasStore,
    guard: &Arc<Mutex<GuardRegion>>,
    queue: &ReconcileQueue,
    frame: &OverlayFrame,
) -> usize {
    // Lock order everywhere: guard, then canvas.
    let tasks = {
        let mut guard = guard.lock().unwrap_or_else(|e| e.into_inner());
        store.with_canvas(|canvas| {
            let mut in_bounds = Vec::with_capacity(frame.patches.len());
            for &(x, y, color) in &frame.patches {
                if canvas.contains(x, y) {
                    guard.insert(x, y, color, Some(OVERLAY_PRIORITY));
                    in_bounds.push((x, y));
                }
            }
            guard.find_drift_among(in_bounds, canvas, OVERLAY_PRIORITY)
        })
    };

    let enqueued = tasks.len();
    for mut task in tasks {
        // The controller's own corrections jump ahead of everything,
        // including later scans of the strip entries it just stamped.
        task.priority = OVERLAY_TASK_PRIORITY;
        queue.enqueue(task);
    }
    enqueued
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use pixelguard_core::clock::{STRIP_LEFT, STRIP_TOP};

    use crate::transport::{SnapshotFetcher, TransportError};

    use super::*;

    struct FixedFetcher(String);

    #[async_trait]
    impl SnapshotFetcher for FixedFetcher {
        async fn fetch_bitmap(&self) -> Result<String, TransportError> {
            Ok(self.0.clone())
        }
    }

    fn frame_at(hh: u32, mm: u32) -> OverlayFrame {
        clock::compute_overlay(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(hh, mm, 0)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn stamps_guard_entries_and_enqueues_drifted_cells() {
        // Canvas wide enough to hold the whole strip, filled with '0':
        // every strip cell drifts (background is '1').
        let width = STRIP_LEFT + 64;
        let height = STRIP_TOP + 8;
        let store = Arc::new(CanvasStore::new(
            width,
            height,
            Arc::new(FixedFetcher(String::new())),
        ));
        let guard = Arc::new(Mutex::new(GuardRegion::new()));
        let queue = ReconcileQueue::new();

        let enqueued = apply_frame(&store, &guard, &queue, &frame_at(9, 5));
        assert_eq!(enqueued, 36);
        assert_eq!(queue.len(), 36);

        // Guard entries carry the overlay priority.
        let entry = guard.lock().unwrap().entry(STRIP_LEFT, STRIP_TOP).unwrap();
        assert_eq!(entry.priority, Some(OVERLAY_PRIORITY));

        // Enqueued tasks outrank both baseline and overlay guard scans.
        let task = queue.try_dequeue().unwrap();
        assert_eq!(task.priority, OVERLAY_TASK_PRIORITY);
    }

    #[tokio::test]
    async fn correct_cells_are_stamped_but_not_enqueued() {
        let width = STRIP_LEFT + 64;
        let height = STRIP_TOP + 8;
        let store = Arc::new(CanvasStore::new(width, height, Arc::new(FixedFetcher(String::new()))));
        let guard = Arc::new(Mutex::new(GuardRegion::new()));
        let queue = ReconcileQueue::new();

        let frame = frame_at(9, 5);
        // Pre-paint the canvas to match the frame exactly.
        let updates: Vec<_> = frame
            .patches
            .iter()
            .map(|&(x, y, color)| pixelguard_core::canvas::PixelUpdate { x, y, color })
            .collect();
        store.apply_batch(&updates);

        let enqueued = apply_frame(&store, &guard, &queue, &frame);
        assert_eq!(enqueued, 0);
        assert!(queue.is_empty());
        assert_eq!(guard.lock().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn strip_cells_outside_the_canvas_are_skipped() {
        // A canvas too small for any strip cell.
        let store = Arc::new(CanvasStore::new(8, 8, Arc::new(FixedFetcher(String::new()))));
        let guard = Arc::new(Mutex::new(GuardRegion::new()));
        let queue = ReconcileQueue::new();

        let enqueued = apply_frame(&store, &guard, &queue, &frame_at(9, 5));
        assert_eq!(enqueued, 0);
        assert!(guard.lock().unwrap().is_empty());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn restamping_overwrites_previous_frame_colors() {
        let width = STRIP_LEFT + 64;
        let height = STRIP_TOP + 8;
        let store = Arc::new(CanvasStore::new(width, height, Arc::new(FixedFetcher(String::new()))));
        let guard = Arc::new(Mutex::new(GuardRegion::new()));
        let queue = ReconcileQueue::new();

        apply_frame(&store, &guard, &queue, &frame_at(9, 5));
        let first = guard.lock().unwrap().entry(STRIP_LEFT + 27, STRIP_TOP).unwrap();

        apply_frame(&store, &guard, &queue, &frame_at(9, 25));
        let second = guard.lock().unwrap().entry(STRIP_LEFT + 27, STRIP_TOP).unwrap();

        // 09:05 lights cell 27; 09:25 does not (mask 0100 lights cell 28).
        assert_ne!(first.color, second.color);
        assert_eq!(guard.lock().unwrap().len(), 36);
    }
}
