//! Presence gateway - entry/exit confidence scoring and occupancy tracking
//!
//! Module structure:
//! - `domain/` - Core types (EntryEvent, SubjectId, GeoPoint)
//! - `io/` - External interfaces (HTTP API, event log, Prometheus)
//! - `services/` - Business logic (Scorer, OccupancyTracker, Evaluator)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use presence_gateway::infra::{Config, Metrics};
use presence_gateway::io::{ApiState, JsonlEventLog};
use presence_gateway::services::{
    create_persist_worker, EntryEvaluator, OccupancyTracker, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// How long to wait for queued events to reach the log on shutdown
const PERSIST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Presence gateway - library entry/exit logging service
#[derive(Parser, Debug)]
#[command(name = "presence-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-request detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = %env!("GIT_HASH"), "presence-gateway starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        space = %config.space_id(),
        space_name = %config.space_name(),
        ssid = %config.expected_ssid(),
        inside_radius_m = %config.inside_radius_m(),
        outside_radius_m = %config.outside_radius_m(),
        auto_threshold = %config.auto_threshold(),
        borderline_floor = %config.borderline_floor(),
        http_port = %config.http_port(),
        admin_enabled = %config.admin_token().is_some(),
        event_log = %config.event_log_file(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let tracker = Arc::new(OccupancyTracker::new(config.space_id()));
    let event_log = Arc::new(JsonlEventLog::new(config.event_log_file()));

    // Load history before the worker starts appending to the same file
    let restored_events = if config.replay_on_start() {
        match event_log.load() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "event_log_replay_failed");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let retry = RetryPolicy {
        max_retries: config.persist_max_retries(),
        backoff: Duration::from_millis(config.persist_retry_backoff_ms()),
    };
    let (persist_tx, persist_worker) = create_persist_worker(
        event_log,
        metrics.clone(),
        config.persist_channel_capacity(),
        retry,
    );
    let persist_handle = tokio::spawn(persist_worker.run());

    let evaluator =
        Arc::new(EntryEvaluator::new(&config, tracker, metrics.clone(), Some(persist_tx)));
    if !restored_events.is_empty() {
        evaluator.restore(restored_events);
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let state = Arc::new(ApiState::new(&config, evaluator, metrics));
    let result = presence_gateway::io::start_http_server(&config, state, shutdown_rx).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "http_server_error");
    }

    // Connection tasks still holding the evaluator keep the channel open, so
    // the drain is bounded
    if tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, persist_handle).await.is_err() {
        warn!("persist_worker_drain_timeout");
    }

    info!("presence-gateway shutdown complete");
    result
}
