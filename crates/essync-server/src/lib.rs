//! Process-facing surface of essync: the status HTTP server, Prometheus
//! metrics, PID file and listener handoff

pub mod error;
pub mod exporter;
pub mod handoff;
pub mod metrics;
pub mod pidfile;
pub mod server;

pub use error::{ServerError, ServerResult};
pub use exporter::ErrorLogMonitor;
pub use handoff::{ListenerEvent, ListenerState, Signals};
pub use metrics::MetricsRecorder;
pub use pidfile::PidFile;
pub use server::{AppState, StatusServer};
