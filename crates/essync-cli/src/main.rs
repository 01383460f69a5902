//! essync - incremental search-cluster sync and retention daemon
//!
//! Copies documents newer than the target's high-water mark from a source
//! index into a target index, deletes target documents older than the
//! retention window, and serves health, exporter and metrics endpoints.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use essync_core::EsSyncConfig;
use essync_engine::{EsClient, RetentionLoop, SearchBackend, SyncLoop};
use essync_server::handoff::{self, Signals};
use essync_server::{AppState, ErrorLogMonitor, MetricsRecorder, PidFile, StatusServer};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long shutdown waits for the loops and the server to finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "essync")]
#[command(version = essync_core::VERSION)]
#[command(about = "Incremental search-cluster sync and retention daemon", long_about = None)]
struct Cli {
    /// Configuration file path
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config
    #[arg(long, env = "ESSYNC_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = EsSyncConfig::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let _log_guards = logging::init(&config.log_dir, &config.log_level)?;

    let config = Arc::new(config);
    info!("Starting essync {}", essync_core::VERSION);
    info!(
        "Replicating {} -> {} by {}",
        config.source_es.index_name, config.target_es.index_name, config.sort_field
    );

    let pid_file = match PidFile::create(&config.pid_file) {
        Ok(pid_file) => Some(pid_file),
        Err(e) => {
            error!("{}", e);
            None
        }
    };

    let metrics = Arc::new(MetricsRecorder::new()?);

    let source: Arc<dyn SearchBackend> = Arc::new(
        EsClient::new(&config.source_es).context("building the source cluster client")?,
    );
    let target: Arc<dyn SearchBackend> = Arc::new(
        EsClient::new(&config.target_es).context("building the target cluster client")?,
    );

    let listener = handoff::bind_or_inherit(config.http_port)
        .with_context(|| format!("binding the status server to port {}", config.http_port))?;

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let sync = SyncLoop::new(Arc::clone(&config), Arc::clone(&source), Arc::clone(&target));
    tasks.spawn({
        let shutdown = shutdown.clone();
        async move { sync.run(shutdown).await }
    });

    let retention = RetentionLoop::new(Arc::clone(&config), Arc::clone(&target));
    tasks.spawn({
        let shutdown = shutdown.clone();
        async move { retention.run(shutdown).await }
    });

    let monitor = ErrorLogMonitor::new(config.error_log_path());
    info!("Exporter counts recent lines of {}", monitor.path().display());
    let server = StatusServer::new(AppState {
        metrics,
        monitor: Arc::new(monitor),
    });
    let serving = listener.try_clone().context("duplicating the listener")?;
    tasks.spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = server.serve(serving, shutdown.clone()).await {
                error!("Status server failed: {}", e);
                shutdown.cancel();
            }
        }
    });

    let mut signals = Signals::new().context("installing signal handlers")?;
    let state = handoff::supervise(&listener, &mut signals, &shutdown).await;
    drop(listener);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Task failed during shutdown: {}", e);
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            "Tasks still running after {:?}, exiting anyway",
            DRAIN_TIMEOUT
        );
    }

    if state.removes_pid_file() {
        if let Some(pid_file) = pid_file {
            pid_file.remove();
        }
    }

    info!("essync stopped ({:?})", state);
    Ok(())
}
