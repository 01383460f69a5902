//! essync engine - incremental replication and retention between two
//! search clusters
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   range gt cursor    ┌──────────────┐
//! │    source    │ ───────────────────▶ │   SyncLoop   │
//! │    index     │                      │              │
//! └──────────────┘                      │ - cursor     │
//!                                       │ - fan-out    │
//!                  match_all, size 1    │ - barrier    │
//! ┌──────────────┐ ◀─────────────────── └──────┬───────┘
//! │    target    │   _create per doc           │
//! │    index     │ ◀───────────────────────────┘
//! │              │
//! │              │   _delete_by_query   ┌──────────────┐
//! │              │ ◀─────────────────── │RetentionLoop │
//! └──────────────┘   range lt threshold └──────────────┘
//! ```
//!
//! Both loops talk to clusters through [`SearchBackend`]; [`EsClient`] is
//! the HTTP implementation.

mod client;
mod error;
mod query;
mod retention;
mod syncer;

#[cfg(test)]
mod testing;

pub use client::{CreateOutcome, DeleteSummary, EsClient, SearchBackend, SearchPage};
pub use error::{EngineError, EngineResult};
pub use query::{DeleteByQueryRequest, MatchAll, Query, RangeBounds, SearchRequest, Sort, SortOrder};
pub use retention::{RetentionLoop, RetentionReport};
pub use syncer::{fallback_cursor, ReplicationOutcome, SyncLoop, SyncReport, SyncStats};
