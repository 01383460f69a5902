//! Incremental sync loop
//!
//! Each iteration:
//! - reads the target's high-water mark (newest sort-field value)
//! - fetches up to `sync_count` newer documents from the source
//! - creates each of them on the target in its own task, by source id
//! - re-attempts failed creates, up to [`CREATE_ATTEMPTS`] in total
//! - waits for every task before the next iteration starts
//!
//! Creates are idempotent, so overlap between batches is harmless: a
//! document already on the target is reported as a conflict, not a failure.
//! A document still failing after the last attempt is reported and left
//! behind once newer documents move the high-water mark past it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use essync_core::metrics::{
    DOCUMENTS_CONFLICTED_TOTAL, DOCUMENTS_CREATED_TOTAL, DOCUMENTS_FAILED_TOTAL, SYNC_BATCH_SIZE,
    SYNC_ITERATIONS_TOTAL,
};
use essync_core::types::{Document, FieldCodec, FieldValue};
use essync_core::EsSyncConfig;

use crate::client::{CreateOutcome, SearchBackend, SearchPage};
use crate::error::{EngineError, EngineResult};
use crate::query::{Query, SearchRequest, SortOrder};

/// Create attempts per document within one iteration
pub const CREATE_ATTEMPTS: usize = 3;

/// What happened to one document of a batch
#[derive(Debug)]
pub enum ReplicationOutcome {
    Created,
    /// The target already held a document with this id
    AlreadyPresent,
    Failed(EngineError),
}

/// Summary of one sync iteration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Lower bound (exclusive) used for the source query
    pub cursor: FieldValue,
    /// Newer documents the source holds in total
    pub pending: u64,
    /// Documents fetched in this batch
    pub fetched: usize,
    pub created: usize,
    pub already_present: usize,
    pub failed: usize,
}

impl SyncReport {
    fn new(cursor: FieldValue, page: &SearchPage) -> Self {
        Self {
            cursor,
            pending: page.total,
            fetched: page.len(),
            created: 0,
            already_present: 0,
            failed: 0,
        }
    }

    fn record(&mut self, outcome: &ReplicationOutcome) {
        match outcome {
            ReplicationOutcome::Created => self.created += 1,
            ReplicationOutcome::AlreadyPresent => self.already_present += 1,
            ReplicationOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Process-wide counters across iterations
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub iterations: u64,
    pub failed_iterations: u64,
    pub documents_created: u64,
    pub documents_already_present: u64,
    pub documents_failed: u64,
    pub last_cursor: Option<FieldValue>,
    pub last_run: Option<DateTime<Utc>>,
}

/// Cursor used when the target holds no documents yet
///
/// With retention enabled there is no point copying anything retention
/// would delete, so the cursor starts `retention_days` back from `now`.
/// Otherwise everything is copied.
pub fn fallback_cursor(
    codec: &FieldCodec,
    retention_days: Option<i64>,
    now: DateTime<Utc>,
) -> FieldValue {
    match retention_days {
        Some(days) => codec.days_before(now, days),
        None => codec.minimal(),
    }
}

/// Copies new documents from the source index to the target index
pub struct SyncLoop {
    config: Arc<EsSyncConfig>,
    source: Arc<dyn SearchBackend>,
    target: Arc<dyn SearchBackend>,
    codec: FieldCodec,
    stats: Arc<RwLock<SyncStats>>,
}

impl SyncLoop {
    pub fn new(
        config: Arc<EsSyncConfig>,
        source: Arc<dyn SearchBackend>,
        target: Arc<dyn SearchBackend>,
    ) -> Self {
        let codec = config.sort_codec();
        Self {
            config,
            source,
            target,
            codec,
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Newest sort-field value on the target, or the cold-start fallback
    ///
    /// The cluster's own sort key for the newest hit is preferred over the
    /// stored `_source` value. When neither can be decoded the fallback
    /// cursor is used and the error is logged.
    pub async fn derive_cursor(&self, now: DateTime<Utc>) -> EngineResult<FieldValue> {
        let sort_field = &self.config.sort_field;
        let request = SearchRequest::new(Query::match_all())
            .sort_by(sort_field.as_str(), SortOrder::Desc)
            .page(0, 1);

        let page = self
            .target
            .search(&self.config.target_es.index_name, &request)
            .await?;

        let Some(newest) = page.documents.first() else {
            let cursor = fallback_cursor(&self.codec, self.config.retention_days(), now);
            debug!("Target index is empty, starting from {}", cursor);
            return Ok(cursor);
        };

        let decoded = match page.sort_keys.first().and_then(Option::as_ref) {
            Some(key) => self.codec.decode_sort_key(sort_field, key),
            None => newest.field_value(sort_field, &self.codec),
        };

        match decoded {
            Ok(cursor) => Ok(cursor),
            Err(e) => {
                let cursor = fallback_cursor(&self.codec, self.config.retention_days(), now);
                error!(
                    "Cannot read high-water mark from target document {}: {}, starting from {}",
                    newest.id, e, cursor
                );
                Ok(cursor)
            }
        }
    }

    /// Source documents strictly newer than `cursor`, newest first
    pub async fn fetch_batch(&self, cursor: FieldValue) -> EngineResult<SearchPage> {
        let sort_field = &self.config.sort_field;
        let request = SearchRequest::new(Query::greater_than(sort_field.as_str(), cursor))
            .sort_by(sort_field.as_str(), SortOrder::Desc)
            .page(0, self.config.sync_count);

        self.source
            .search(&self.config.source_es.index_name, &request)
            .await
    }

    /// Create every document on the target concurrently and wait for all of
    /// them. Outcomes come back in completion order.
    pub async fn replicate(&self, documents: &[Arc<Document>]) -> Vec<(String, ReplicationOutcome)> {
        let index: Arc<str> = Arc::from(self.config.target_es.index_name.as_str());
        let mut tasks = JoinSet::new();

        for document in documents {
            let target = Arc::clone(&self.target);
            let index = Arc::clone(&index);
            let document = Arc::clone(document);
            tasks.spawn(async move {
                let outcome = match target.create(&index, &document).await {
                    Ok(CreateOutcome::Created) => ReplicationOutcome::Created,
                    Ok(CreateOutcome::AlreadyExists) => ReplicationOutcome::AlreadyPresent,
                    Err(e) => ReplicationOutcome::Failed(e),
                };
                (document.id.clone(), outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => outcomes.push(result),
                Err(e) => {
                    error!("Replication task aborted: {}", e);
                    outcomes.push((
                        String::new(),
                        ReplicationOutcome::Failed(EngineError::Internal(e.to_string())),
                    ));
                }
            }
        }
        outcomes
    }

    /// Run one iteration at the current time
    pub async fn run_once(&self) -> EngineResult<SyncReport> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> EngineResult<SyncReport> {
        metrics::counter!(SYNC_ITERATIONS_TOTAL).increment(1);

        let result = self.iterate(now).await;

        let mut stats = self.stats.write();
        stats.iterations += 1;
        stats.last_run = Some(now);
        match &result {
            Ok(report) => {
                stats.documents_created += report.created as u64;
                stats.documents_already_present += report.already_present as u64;
                stats.documents_failed += report.failed as u64;
                stats.last_cursor = Some(report.cursor);
            }
            Err(_) => stats.failed_iterations += 1,
        }

        result
    }

    async fn iterate(&self, now: DateTime<Utc>) -> EngineResult<SyncReport> {
        let cursor = self.derive_cursor(now).await?;
        let page = self.fetch_batch(cursor).await?;
        let mut report = SyncReport::new(cursor, &page);

        metrics::histogram!(SYNC_BATCH_SIZE).record(page.len() as f64);

        if page.is_empty() {
            return Ok(report);
        }

        debug!(
            "Replicating {} of {} documents newer than {}",
            report.fetched, report.pending, cursor
        );

        let mut pending: Vec<Arc<Document>> = page.documents.into_iter().map(Arc::new).collect();
        for attempt in 1..=CREATE_ATTEMPTS {
            let mut retry = Vec::new();

            for (id, outcome) in self.replicate(&pending).await {
                match &outcome {
                    ReplicationOutcome::Created => {
                        debug!("Created document {}", id);
                        metrics::counter!(DOCUMENTS_CREATED_TOTAL).increment(1);
                    }
                    ReplicationOutcome::AlreadyPresent => {
                        debug!("Document {} already present on target", id);
                        metrics::counter!(DOCUMENTS_CONFLICTED_TOTAL).increment(1);
                    }
                    ReplicationOutcome::Failed(e)
                        if attempt < CREATE_ATTEMPTS && !matches!(e, EngineError::Internal(_)) =>
                    {
                        warn!(
                            "Failed to replicate document {} (attempt {} of {}): {}",
                            id, attempt, CREATE_ATTEMPTS, e
                        );
                        retry.push(id);
                        continue;
                    }
                    ReplicationOutcome::Failed(e) => {
                        error!(
                            "Failed to replicate document {} (attempt {} of {}), giving up: {}",
                            id, attempt, CREATE_ATTEMPTS, e
                        );
                        metrics::counter!(DOCUMENTS_FAILED_TOTAL).increment(1);
                    }
                }
                report.record(&outcome);
            }

            if retry.is_empty() {
                break;
            }
            pending.retain(|d| retry.contains(&d.id));
        }

        Ok(report)
    }

    /// Iterate until `shutdown` is cancelled. Cancellation is observed
    /// between iterations and during the sleep; a batch in flight always
    /// completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        let interval = self.config.sync_interval();
        info!(
            "Sync loop started: {} -> {} every {:?}, batch size {}",
            self.config.source_es.index_name,
            self.config.target_es.index_name,
            interval,
            self.config.sync_count
        );

        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(report) if report.fetched > 0 => info!(
                    "Synced batch after {}: {} created, {} already present, {} failed, {} pending",
                    report.cursor,
                    report.created,
                    report.already_present,
                    report.failed,
                    report.pending
                ),
                Ok(report) => debug!("No documents newer than {}", report.cursor),
                Err(e) => error!("Sync iteration failed ({}): {}", e.kind(), e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let stats = self.stats();
        info!(
            "Sync loop stopped after {} iterations ({} failed), documents: \
             {} created, {} already present, {} failed",
            stats.iterations,
            stats.failed_iterations,
            stats.documents_created,
            stats.documents_already_present,
            stats.documents_failed
        );
    }
}

impl std::fmt::Debug for SyncLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoop")
            .field("source", &self.config.source_es.index_name)
            .field("target", &self.config.target_es.index_name)
            .field("sort_field", &self.config.sort_field)
            .field("stats", &self.stats())
            .finish()
    }
}
