//! Domain logic for the canvas reconciliation engine.
//!
//! This crate is I/O-free: the palette, the canvas bitmap, the guard
//! region with its drift detector, the priority-ordered reconcile queue,
//! the change-feed wire framing, and the clock overlay computation. The
//! daemon crate wires these to transports, timers, and workers.

pub mod canvas;
pub mod clock;
pub mod feed;
pub mod guard;
pub mod palette;
pub mod queue;

pub use canvas::{Canvas, CanvasError, PixelUpdate};
pub use guard::{CorrectiveTask, GuardEntry, GuardRegion};
pub use palette::{ColorCode, PaletteError, Rgb};
pub use queue::ReconcileQueue;
