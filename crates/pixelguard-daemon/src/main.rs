//! pixelguard-daemon - canvas guard daemon.
//!
//! Loads the desired artwork and draw credentials, resyncs the observed
//! canvas from a snapshot, then runs four cooperating loops until SIGINT
//! or SIGTERM: the change-feed ingestor, the drift monitor, the worker
//! pool, and (unless disabled) the clock overlay controller.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pixelguard_core::guard::GuardRegion;
use pixelguard_core::queue::ReconcileQueue;
use pixelguard_daemon::config::GuardConfig;
use pixelguard_daemon::ingest::{FeedIngestor, run_drift_monitor};
use pixelguard_daemon::overlay::OverlayController;
use pixelguard_daemon::store::CanvasStore;
use pixelguard_daemon::transport::{
    HttpDrawApi, HttpSnapshotFetcher, TcpFeedConnector,
};
use pixelguard_daemon::worker::{WorkerContext, WorkerPool};
use pixelguard_daemon::{input, transport};

/// pixelguard daemon - keeps guarded canvas regions matching their artwork
#[derive(Parser, Debug)]
#[command(name = "pixelguard-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pixelguard.toml")]
    config: PathBuf,

    /// Path to the JSON task file describing the artwork to guard
    #[arg(long)]
    tasks: PathBuf,

    /// Path to the credential file (one token per line)
    #[arg(long)]
    credentials: PathBuf,

    /// Log level filter (e.g. "info", "pixelguard_daemon=debug")
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = if args.config.exists() {
        GuardConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config from {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "config file not found, using defaults");
        GuardConfig::default()
    };

    let triples = input::load_tasks(&args.tasks)
        .with_context(|| format!("failed to load task file {}", args.tasks.display()))?;
    let guard = GuardRegion::from_triples(triples, config.canvas.width, config.canvas.height)
        .context("task file contains coordinates outside the configured canvas")?;
    info!(guarded = guard.len(), "guard region built");
    let guard = Arc::new(Mutex::new(guard));

    let credentials = input::load_credentials(&args.credentials).with_context(|| {
        format!("failed to load credential file {}", args.credentials.display())
    })?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("failed to build http client")?;

    let fetcher: Arc<dyn transport::SnapshotFetcher> = Arc::new(HttpSnapshotFetcher::new(
        http.clone(),
        config.canvas.snapshot_url.clone(),
    ));
    let store = Arc::new(CanvasStore::new(
        config.canvas.width,
        config.canvas.height,
        fetcher,
    ));
    let queue = Arc::new(ReconcileQueue::new());
    let shutdown = CancellationToken::new();

    // Populate the canvas before anything scans it; a failure here is
    // retried implicitly by the feed lifecycle, not fatal.
    store.force_refresh().await;

    let monitor = tokio::spawn(run_drift_monitor(
        Arc::clone(&store),
        Arc::clone(&guard),
        Arc::clone(&queue),
        shutdown.clone(),
    ));

    let ingestor = FeedIngestor::new(
        Arc::clone(&store),
        Arc::clone(&guard),
        Arc::clone(&queue),
        Arc::new(TcpFeedConnector::new(config.feed.endpoint.clone())),
        config.feed.heartbeat_interval,
        config.feed.reconnect_delay,
        shutdown.clone(),
    );
    let ingest = tokio::spawn(ingestor.run());

    let overlay = if config.overlay.enabled {
        let controller = OverlayController::new(
            Arc::clone(&store),
            Arc::clone(&guard),
            Arc::clone(&queue),
            shutdown.clone(),
        );
        Some(tokio::spawn(controller.run()))
    } else {
        info!("clock overlay disabled by configuration");
        None
    };

    let pool = WorkerPool::spawn(
        credentials,
        WorkerContext {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            draw: Arc::new(HttpDrawApi::new(http, config.draw.url.clone())),
            fallback_cooldown: config.draw.fallback_cooldown,
            staleness_threshold: config.canvas.staleness_threshold,
            auth_failure_threshold: config.draw.auth_failure_threshold,
            shutdown: shutdown.clone(),
        },
    );
    let mut active_workers = pool.active_workers();

    info!("pixelguard daemon running");
    tokio::select! {
        () = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
        }
        () = all_workers_retired(&mut active_workers) => {
            error!("all credentials retired; shutting down");
        }
    }

    shutdown.cancel();
    pool.join().await;
    let _ = ingest.await;
    let _ = monitor.await;
    if let Some(overlay) = overlay {
        let _ = overlay.await;
    }

    info!("pixelguard daemon stopped");
    Ok(())
}

/// Completes when the active worker count reaches zero.
async fn all_workers_retired(active: &mut tokio::sync::watch::Receiver<usize>) {
    loop {
        if *active.borrow_and_update() == 0 {
            return;
        }
        if active.changed().await.is_err() {
            // All senders dropped; treat as retired.
            return;
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            warn!(%error, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
