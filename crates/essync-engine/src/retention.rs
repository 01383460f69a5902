//! Retention loop
//!
//! Periodically deletes target documents whose date field is older than
//! `log_keep_day` days. Disabled entirely when `log_keep_day <= 0`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use essync_core::metrics::{RETENTION_DELETED_TOTAL, RETENTION_RUNS_TOTAL};
use essync_core::types::{FieldCodec, FieldValue};
use essync_core::EsSyncConfig;

use crate::client::SearchBackend;
use crate::error::EngineResult;
use crate::query::{DeleteByQueryRequest, Query};

/// Result of one retention pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionReport {
    /// Documents with a date field strictly below this were deleted
    pub threshold: FieldValue,
    pub deleted: u64,
    pub version_conflicts: u64,
    pub failures: usize,
}

pub struct RetentionLoop {
    config: Arc<EsSyncConfig>,
    target: Arc<dyn SearchBackend>,
    codec: FieldCodec,
}

impl RetentionLoop {
    pub fn new(config: Arc<EsSyncConfig>, target: Arc<dyn SearchBackend>) -> Self {
        let codec = config.date_codec();
        Self {
            config,
            target,
            codec,
        }
    }

    /// Oldest date still retained at `now`, `None` when retention is off
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<FieldValue> {
        self.config
            .retention_days()
            .map(|days| self.codec.days_before(now, days))
    }

    /// Run one pass at `now`. Returns `None` without touching the target
    /// when retention is disabled.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> EngineResult<Option<RetentionReport>> {
        let Some(threshold) = self.threshold(now) else {
            return Ok(None);
        };

        metrics::counter!(RETENTION_RUNS_TOTAL).increment(1);

        let request =
            DeleteByQueryRequest::new(Query::less_than(self.config.date_field.as_str(), threshold));
        let summary = self
            .target
            .delete_by_query(&self.config.target_es.index_name, &request)
            .await?;

        metrics::counter!(RETENTION_DELETED_TOTAL).increment(summary.deleted);

        Ok(Some(RetentionReport {
            threshold,
            deleted: summary.deleted,
            version_conflicts: summary.version_conflicts,
            failures: summary.failures,
        }))
    }

    pub async fn run_once(&self) -> EngineResult<Option<RetentionReport>> {
        self.run_once_at(Utc::now()).await
    }

    /// Iterate until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.retention_enabled() {
            info!(
                "Retention disabled (log_keep_day = {}), nothing will be deleted",
                self.config.log_keep_day
            );
            return;
        }

        let interval = self.config.clear_interval();
        info!(
            "Retention loop started: keeping {} days of {} by {}, every {:?}",
            self.config.log_keep_day,
            self.config.target_es.index_name,
            self.config.date_field,
            interval
        );

        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(Some(report)) if report.deleted > 0 || report.failures > 0 => info!(
                    "Deleted {} documents older than {} ({} conflicts, {} failures)",
                    report.deleted, report.threshold, report.version_conflicts, report.failures
                ),
                Ok(Some(report)) => debug!("No documents older than {}", report.threshold),
                Ok(None) => break,
                Err(e) => error!("Retention iteration failed ({}): {}", e.kind(), e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Retention loop stopped");
    }
}

impl std::fmt::Debug for RetentionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionLoop")
            .field("target", &self.config.target_es.index_name)
            .field("date_field", &self.config.date_field)
            .field("log_keep_day", &self.config.log_keep_day)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use essync_core::types::{EpochUnit, FieldType};
    use serde_json::json;

    use crate::testing::{Call, MemoryIndex};

    const TARGET: &str = "interface_call_log_copy";

    fn config(log_keep_day: i64, date_field_type: &str) -> Arc<EsSyncConfig> {
        let yaml = format!(
            r#"
source_es:
  hosts: ["http://127.0.0.1:9200"]
  indexName: interface_call_log
target_es:
  hosts: ["http://127.0.0.1:9201"]
  indexName: {TARGET}
sort_field: callDate
date_field: callDate
date_field_type: {date_field_type}
clear_interval: 1
log_keep_day: {log_keep_day}
"#
        );
        Arc::new(EsSyncConfig::from_yaml(&yaml).unwrap())
    }

    fn now() -> DateTime<Utc> {
        "2024-03-08T12:00:00Z".parse().unwrap()
    }

    fn setup(config: Arc<EsSyncConfig>, codec: FieldCodec) -> (RetentionLoop, Arc<MemoryIndex>) {
        let target = Arc::new(MemoryIndex::new(codec));
        let retention = RetentionLoop::new(config, Arc::clone(&target) as Arc<dyn SearchBackend>);
        (retention, target)
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let (retention, target) = setup(
            config(7, "int64"),
            FieldCodec::new(FieldType::Int64, EpochUnit::Seconds),
        );
        let threshold = (now() - chrono::Duration::days(7)).timestamp();
        target.insert(TARGET, "at-threshold", json!({ "callDate": threshold }));
        target.insert(TARGET, "below", json!({ "callDate": threshold - 1 }));
        target.insert(TARGET, "recent", json!({ "callDate": threshold + 3600 }));

        let report = retention.run_once_at(now()).await.unwrap().unwrap();

        assert_eq!(report.threshold, FieldValue::Epoch(threshold));
        assert_eq!(report.deleted, 1);
        assert_eq!(target.ids(TARGET), vec!["at-threshold", "recent"]);
    }

    #[tokio::test]
    async fn test_timestamp_threshold() {
        let (retention, target) = setup(
            config(1, "date"),
            FieldCodec::new(FieldType::Timestamp, EpochUnit::Seconds),
        );
        target.insert(TARGET, "old", json!({ "callDate": "2024-03-07T11:59:59Z" }));
        target.insert(TARGET, "kept", json!({ "callDate": "2024-03-07T12:00:00Z" }));

        let report = retention.run_once_at(now()).await.unwrap().unwrap();
        assert_eq!(
            report.threshold,
            FieldValue::Timestamp("2024-03-07T12:00:00Z".parse().unwrap())
        );
        assert_eq!(target.ids(TARGET), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_disabled_never_deletes() {
        let (retention, target) = setup(
            config(0, "int64"),
            FieldCodec::new(FieldType::Int64, EpochUnit::Seconds),
        );
        target.insert(TARGET, "ancient", json!({ "callDate": 1 }));

        assert_eq!(retention.threshold(now()), None);
        assert_eq!(retention.run_once_at(now()).await.unwrap(), None);

        tokio::time::timeout(Duration::from_secs(1), retention.run(CancellationToken::new()))
            .await
            .unwrap();

        assert!(target.calls().is_empty());
        assert_eq!(target.ids(TARGET), vec!["ancient"]);
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        let (retention, target) = setup(
            config(7, "int64"),
            FieldCodec::new(FieldType::Int64, EpochUnit::Seconds),
        );
        target.fail_index(TARGET);
        assert!(retention.run_once_at(now()).await.is_err());

        let token = CancellationToken::new();
        let retention = Arc::new(retention);
        let handle = tokio::spawn({
            let retention = Arc::clone(&retention);
            let token = token.clone();
            async move { retention.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            target.calls(),
            vec![
                Call::DeleteByQuery(TARGET.to_string()),
                Call::DeleteByQuery(TARGET.to_string())
            ]
        );
    }
}
