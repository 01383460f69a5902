//! Configuration for essync
//!
//! Loaded once from YAML at startup and shared read-only afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EpochUnit, FieldCodec, FieldType};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsSyncConfig {
    pub source_es: EsClusterConfig,

    pub target_es: EsClusterConfig,

    /// Field used as the replication cursor
    pub sort_field: String,

    #[serde(default)]
    pub sort_field_type: FieldType,

    /// Field used for retention
    #[serde(default)]
    pub date_field: String,

    #[serde(default)]
    pub date_field_type: FieldType,

    /// Unit of `int64` fields
    #[serde(default)]
    pub epoch_unit: EpochUnit,

    /// Seconds between sync iterations
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Seconds between retention iterations
    #[serde(default = "default_clear_interval")]
    pub clear_interval: u64,

    /// Maximum documents per sync batch
    #[serde(default = "default_sync_count")]
    pub sync_count: usize,

    /// Retention window in days, `<= 0` disables retention
    #[serde(default)]
    pub log_keep_day: i64,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Connection parameters of one search cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsClusterConfig {
    pub hosts: Vec<String>,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(rename = "indexName")]
    pub index_name: String,

    #[serde(rename = "docType", default)]
    pub doc_type: String,

    #[serde(default)]
    pub http_config: HttpConfig,
}

impl EsClusterConfig {
    /// Basic-auth credentials, if a user is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() {
            None
        } else {
            Some((self.user.as_str(), self.password.as_str()))
        }
    }

    /// Document type for the create endpoint
    pub fn doc_type(&self) -> &str {
        if self.doc_type.is_empty() {
            crate::DEFAULT_DOC_TYPE
        } else {
            &self.doc_type
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!("{}.hosts is empty", name)));
        }
        if self.index_name.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("{}.indexName is empty", name)));
        }
        Ok(())
    }
}

/// HTTP connection pool settings. Durations are whole seconds, 0 keeps the
/// client default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "MaxIdleConns", default)]
    pub max_idle_conns: usize,

    #[serde(rename = "MaxIdleConnsPerHost", default)]
    pub max_idle_conns_per_host: usize,

    /// Cap on concurrent requests per host, 0 is unlimited
    #[serde(rename = "MaxConnsPerHost", default)]
    pub max_conns_per_host: usize,

    #[serde(rename = "IdleConnTimeout", default)]
    pub idle_conn_timeout: u64,

    #[serde(rename = "ResponseHeaderTimeout", default)]
    pub response_header_timeout: u64,

    #[serde(rename = "DialTimeout", default)]
    pub dial_timeout: u64,

    #[serde(rename = "DialKeepAlive", default)]
    pub dial_keep_alive: u64,
}

impl HttpConfig {
    pub fn idle_conn_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_conn_timeout)
    }

    pub fn response_header_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.response_header_timeout)
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.dial_timeout)
    }

    pub fn dial_keep_alive(&self) -> Option<Duration> {
        non_zero_secs(self.dial_keep_alive)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn default_sync_interval() -> u64 {
    10
}

fn default_clear_interval() -> u64 {
    3600
}

fn default_sync_count() -> usize {
    100
}

fn default_http_port() -> u16 {
    8080
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("essync.pid")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl EsSyncConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.source_es.validate("source_es")?;
        self.target_es.validate("target_es")?;

        if self.sort_field.trim().is_empty() {
            return Err(Error::InvalidConfig("sort_field is empty".into()));
        }
        if self.sync_count == 0 {
            return Err(Error::InvalidConfig("sync_count must be positive".into()));
        }
        if self.sync_interval == 0 {
            return Err(Error::InvalidConfig("sync_interval must be positive".into()));
        }
        if self.retention_enabled() {
            if self.date_field.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "date_field is required when log_keep_day > 0".into(),
                ));
            }
            if self.clear_interval == 0 {
                return Err(Error::InvalidConfig(
                    "clear_interval must be positive when log_keep_day > 0".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn retention_enabled(&self) -> bool {
        self.log_keep_day > 0
    }

    /// Retention window in days, `None` when retention is disabled
    pub fn retention_days(&self) -> Option<i64> {
        self.retention_enabled().then_some(self.log_keep_day)
    }

    pub fn sort_codec(&self) -> FieldCodec {
        FieldCodec::new(self.sort_field_type, self.epoch_unit)
    }

    pub fn date_codec(&self) -> FieldCodec {
        FieldCodec::new(self.date_field_type, self.epoch_unit)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }

    pub fn clear_interval(&self) -> Duration {
        Duration::from_secs(self.clear_interval)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.log_dir.join(crate::ERROR_LOG_FILE)
    }
}
