//! Status server: health check, error-log exporter and Prometheus metrics

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;

use axum::{extract::State, middleware, routing::get, Router};
use chrono::Local;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{info, warn};

use crate::error::ServerResult;
use crate::exporter::ErrorLogMonitor;
use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};

pub const HEALTHY_BODY: &str = "I am very healthy";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<MetricsRecorder>,
    pub monitor: Arc<ErrorLogMonitor>,
}

pub struct StatusServer {
    state: AppState,
}

impl StatusServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/_healthy", get(healthy))
            .route("/exporter", get(exporter))
            .route("/metrics", get(metrics_handler).with_state(self.state.metrics.clone()))
            .layer(middleware::from_fn_with_state(
                self.state.metrics.clone(),
                metrics_middleware,
            ))
            .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener until `shutdown` is cancelled
    pub async fn serve(self, listener: StdTcpListener, shutdown: CancellationToken) -> ServerResult<()> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        info!("Status server listening on http://{}", listener.local_addr()?);

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Status server stopped");
        Ok(())
    }
}

async fn healthy() -> &'static str {
    HEALTHY_BODY
}

async fn exporter(State(state): State<AppState>) -> String {
    let monitor = Arc::clone(&state.monitor);
    match tokio::task::spawn_blocking(move || monitor.render(Local::now())).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Exporter check failed: {}", e);
            format!("{}{{}} 0\n", crate::exporter::METRIC_NAME)
        }
    }
}
