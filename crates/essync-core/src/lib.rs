//! essync Core Library
//!
//! Configuration, error and document types shared by the essync crates.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::EsSyncConfig;
pub use error::{Error, Result};

/// essync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default document type used by the `_create` endpoint
pub const DEFAULT_DOC_TYPE: &str = "_doc";

/// File name of the error log inside `log_dir`
pub const ERROR_LOG_FILE: &str = "essync_error.log";

/// File name of the info log inside `log_dir`
pub const INFO_LOG_FILE: &str = "essync_info.log";

/// File name of the debug log inside `log_dir`
pub const DEBUG_LOG_FILE: &str = "essync_debug.log";
