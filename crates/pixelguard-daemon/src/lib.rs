//! Canvas guard daemon: keeps a region of a shared pixel canvas matching
//! its desired artwork.
//!
//! The moving parts, wired together by the binary:
//!
//! - [`store::CanvasStore`] — the shared observed canvas, with
//!   single-flight snapshot refresh and a resync signal.
//! - [`ingest::FeedIngestor`] — the change-feed connection: subscribe,
//!   heartbeat, decode update batches, incremental drift checks, full
//!   resync after any gap.
//! - [`ingest::run_drift_monitor`] — full drift scans on every resync.
//! - [`worker::WorkerPool`] — one reconciliation worker per credential,
//!   server-paced, with per-credential auth health.
//! - [`overlay::OverlayController`] — the wall-clock strip renderer.
//!
//! Domain types (palette, canvas, guard region, queue, wire framing, clock
//! math) live in `pixelguard_core`.

pub mod config;
pub mod ingest;
pub mod input;
pub mod overlay;
pub mod store;
pub mod transport;
pub mod worker;

pub use config::GuardConfig;
pub use store::CanvasStore;
