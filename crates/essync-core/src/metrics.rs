//! Metric names recorded by the sync and retention loops

// Sync loop
pub const SYNC_ITERATIONS_TOTAL: &str = "essync_sync_iterations_total";
pub const SYNC_BATCH_SIZE: &str = "essync_sync_batch_size";
pub const DOCUMENTS_CREATED_TOTAL: &str = "essync_documents_created_total";
pub const DOCUMENTS_CONFLICTED_TOTAL: &str = "essync_documents_conflicted_total";
pub const DOCUMENTS_FAILED_TOTAL: &str = "essync_documents_failed_total";

// Retention loop
pub const RETENTION_RUNS_TOTAL: &str = "essync_retention_runs_total";
pub const RETENTION_DELETED_TOTAL: &str = "essync_retention_deleted_total";
