//! Engine error types

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while talking to a search cluster
#[derive(Error, Debug)]
pub enum EngineError {
    /// The cluster could not be reached or the request timed out
    #[error("Transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The cluster answered with a non-success status
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid cluster configuration: {0}")]
    InvalidConfig(String),

    /// A cursor or retention field could not be read
    #[error("Field error: {0}")]
    Field(#[from] essync_core::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short label used for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Transport { .. } => "transport",
            EngineError::Status { .. } => "status",
            EngineError::Decode { .. } => "decode",
            EngineError::InvalidConfig(_) => "config",
            EngineError::Field(_) => "field",
            EngineError::Internal(_) => "internal",
        }
    }
}
