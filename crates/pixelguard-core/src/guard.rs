//! The guard region: desired state and drift detection.
//!
//! A guard region maps coordinates to the color they should hold, plus an
//! optional explicit priority. Priorities are min-first: numerically lower
//! means more urgent. Baseline task-file entries carry no explicit
//! priority and inherit the scanner's default (0); the clock overlay
//! overwrites its strip with an explicit, strictly more urgent priority.
//!
//! Drift detection compares desired against observed. The full scan (after
//! a resync) and the incremental scan (after a feed batch) share
//! [`GuardRegion::drift_at`] so both produce identical verdicts from the
//! same information.

use std::collections::HashMap;

use crate::canvas::{Canvas, CanvasError};
use crate::palette::ColorCode;

/// Default priority for guard entries without an explicit one.
pub const BASELINE_PRIORITY: i32 = 0;

/// Explicit priority stamped on guard entries owned by the clock overlay.
///
/// Strictly more urgent than [`BASELINE_PRIORITY`]; the exact spacing is an
/// implementation choice, only the ordering is contractual.
pub const OVERLAY_PRIORITY: i32 = -1;

/// Priority for corrective tasks the overlay controller enqueues directly.
pub const OVERLAY_TASK_PRIORITY: i32 = OVERLAY_PRIORITY - 1;

/// Desired state for one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardEntry {
    pub color: ColorCode,
    /// Explicit priority, or `None` to use the scanner's default.
    pub priority: Option<i32>,
}

/// A unit of corrective work: redraw one coordinate to its desired color.
///
/// Delivery is at-least-once: the same coordinate may be enqueued any
/// number of times, and workers discard tasks whose pixel is already
/// correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectiveTask {
    pub priority: i32,
    pub x: u32,
    pub y: u32,
    pub color: ColorCode,
}

/// The set of guarded coordinates.
#[derive(Debug, Default, Clone)]
pub struct GuardRegion {
    entries: HashMap<(u32, u32), GuardEntry>,
}

impl GuardRegion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a region from ordered `(x, y, color)` triples, without
    /// explicit priorities. Duplicate coordinates collapse
    /// last-write-wins.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::OutOfBounds`] for any triple outside the
    /// given canvas dimensions; the region is only built from fully valid
    /// input.
    pub fn from_triples(
        triples: impl IntoIterator<Item = (u32, u32, ColorCode)>,
        width: u32,
        height: u32,
    ) -> Result<Self, CanvasError> {
        let mut region = Self::new();
        for (x, y, color) in triples {
            if x >= width || y >= height {
                return Err(CanvasError::OutOfBounds { x, y, width, height });
            }
            region.insert(x, y, color, None);
        }
        Ok(region)
    }

    /// Insert or overwrite a guard entry.
    pub fn insert(&mut self, x: u32, y: u32, color: ColorCode, priority: Option<i32>) {
        self.entries.insert((x, y), GuardEntry { color, priority });
    }

    /// The entry guarding a coordinate, if any.
    #[must_use]
    pub fn entry(&self, x: u32, y: u32) -> Option<GuardEntry> {
        self.entries.get(&(x, y)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Drift verdict for a single coordinate: a corrective task if the
    /// observed color differs from the desired one.
    ///
    /// Unguarded coordinates never drift. A guarded coordinate that falls
    /// outside the canvas is a programming invariant violation upstream
    /// (region construction validates bounds), so it is skipped rather
    /// than panicking the scan.
    #[must_use]
    pub fn drift_at(
        &self,
        x: u32,
        y: u32,
        canvas: &Canvas,
        default_priority: i32,
    ) -> Option<CorrectiveTask> {
        let entry = self.entry(x, y)?;
        let observed = canvas.get(x, y).ok()?;
        if observed == entry.color {
            None
        } else {
            Some(CorrectiveTask {
                priority: entry.priority.unwrap_or(default_priority),
                x,
                y,
                color: entry.color,
            })
        }
    }

    /// Full drift scan over every guarded coordinate.
    #[must_use]
    pub fn find_drift(&self, canvas: &Canvas, default_priority: i32) -> Vec<CorrectiveTask> {
        let mut tasks: Vec<CorrectiveTask> = self
            .entries
            .keys()
            .filter_map(|&(x, y)| self.drift_at(x, y, canvas, default_priority))
            .collect();
        // HashMap iteration order is arbitrary; sort for deterministic
        // enqueue order across runs.
        tasks.sort_by_key(|t| (t.priority, t.y, t.x));
        tasks
    }

    /// Incremental drift scan restricted to the given coordinates
    /// (typically the set touched by one feed batch).
    #[must_use]
    pub fn find_drift_among(
        &self,
        coords: impl IntoIterator<Item = (u32, u32)>,
        canvas: &Canvas,
        default_priority: i32,
    ) -> Vec<CorrectiveTask> {
        coords
            .into_iter()
            .filter_map(|(x, y)| self.drift_at(x, y, canvas, default_priority))
            .collect()
    }
}
