//! Server error types

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid inherited listener descriptor {value:?}")]
    InvalidListenFd { value: String },

    #[error("PID file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(String),

    #[error("Listener handoff failed: {0}")]
    Handoff(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
