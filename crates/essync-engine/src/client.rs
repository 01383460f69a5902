//! Search cluster client
//!
//! HTTP adapter for the operations the engine needs from a cluster:
//! - `_search` with exact total hit counting
//! - `_create` (create-if-absent by document id)
//! - `_delete_by_query`
//!
//! Requests rotate across the configured hosts. A transport failure moves on
//! to the next host; a response with any status is final.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use essync_core::config::EsClusterConfig;
use essync_core::types::Document;

use crate::error::{EngineError, EngineResult};
use crate::query::{DeleteByQueryRequest, SearchRequest};

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Total matches reported by the cluster, not just this page
    pub total: u64,
    /// Matching documents in response order
    pub documents: Vec<Document>,
    /// First `sort` value of each hit, aligned with `documents`. `None`
    /// when the request was not sorted.
    pub sort_keys: Vec<Option<Value>>,
}

impl SearchPage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Document ids, aligned with `documents`
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|d| d.id.as_str())
    }
}

/// Result of a create-if-absent request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A document with the same id was already present (HTTP 409)
    AlreadyExists,
}

/// Counters reported by `_delete_by_query`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: u64,
    pub version_conflicts: u64,
    pub failures: usize,
}

/// Operations the sync and retention loops need from a cluster
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a search. A missing index yields an empty page.
    async fn search(&self, index: &str, request: &SearchRequest) -> EngineResult<SearchPage>;

    /// Create `document` under its own id unless that id already exists.
    async fn create(&self, index: &str, document: &Document) -> EngineResult<CreateOutcome>;

    /// Delete every document matching the request. A missing index deletes
    /// nothing.
    async fn delete_by_query(
        &self,
        index: &str,
        request: &DeleteByQueryRequest,
    ) -> EngineResult<DeleteSummary>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Hits,
}

#[derive(Deserialize, Default)]
struct Hits {
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total` is an object since 7.0 and a bare number before
#[derive(Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
    #[serde(default)]
    sort: Vec<Value>,
}

#[derive(Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
    #[serde(default)]
    version_conflicts: u64,
    #[serde(default)]
    failures: Vec<Value>,
}

/// HTTP client for one search cluster
pub struct EsClient {
    client: Client,
    hosts: Vec<Url>,
    next_host: AtomicUsize,
    credentials: Option<(String, String)>,
    doc_type: String,
    limiter: Option<Semaphore>,
}

impl EsClient {
    /// Build a client from the cluster section of the configuration
    pub fn new(config: &EsClusterConfig) -> EngineResult<Self> {
        let hosts = config
            .hosts
            .iter()
            .filter(|h| !h.trim().is_empty())
            .map(|h| parse_host(h))
            .collect::<EngineResult<Vec<_>>>()?;

        if hosts.is_empty() {
            return Err(EngineError::InvalidConfig("no hosts configured".to_string()));
        }

        let http = &config.http_config;
        let mut builder = ClientBuilder::new();

        if let Some(timeout) = http.idle_conn_timeout() {
            builder = builder.pool_idle_timeout(timeout);
        }
        if http.max_idle_conns_per_host > 0 {
            builder = builder.pool_max_idle_per_host(http.max_idle_conns_per_host);
        }
        if let Some(timeout) = http.dial_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(keep_alive) = http.dial_keep_alive() {
            builder = builder.tcp_keepalive(keep_alive);
        }
        if let Some(timeout) = http.response_header_timeout() {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let limiter = (http.max_conns_per_host > 0)
            .then(|| Semaphore::new(http.max_conns_per_host * hosts.len()));

        let credentials = config
            .credentials()
            .map(|(user, password)| (user.to_string(), password.to_string()));

        Ok(Self {
            client,
            hosts,
            next_host: AtomicUsize::new(0),
            credentials,
            doc_type: config.doc_type().to_string(),
            limiter,
        })
    }

    /// Configured hosts
    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    fn next_host(&self) -> &Url {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed);
        &self.hosts[i % self.hosts.len()]
    }

    fn create_path<'a>(&'a self, index: &'a str, id: &'a str) -> Vec<&'a str> {
        if self.doc_type == essync_core::DEFAULT_DOC_TYPE {
            vec![index, "_create", id]
        } else {
            vec![index, self.doc_type.as_str(), id, "_create"]
        }
    }

    /// Send a request, trying each host at most once on transport errors
    async fn send<B: Serialize + ?Sized + Sync>(
        &self,
        operation: &'static str,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> EngineResult<Response> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| EngineError::Internal(e.to_string()))?,
            ),
            None => None,
        };

        let mut last_error = None;

        for attempt in 0..self.hosts.len() {
            let url = endpoint(self.next_host(), segments)?;

            let mut request = self.client.request(method.clone(), url.clone()).query(query);
            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, Some(password));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    debug!("{} {} -> {}", method, url, response.status());
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        "{} request to {} failed (attempt {}): {}",
                        operation,
                        url,
                        attempt + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(source) => Err(EngineError::Transport { operation, source }),
            None => Err(EngineError::InvalidConfig("no hosts configured".to_string())),
        }
    }
}

#[async_trait]
impl SearchBackend for EsClient {
    async fn search(&self, index: &str, request: &SearchRequest) -> EngineResult<SearchPage> {
        const OP: &str = "search";

        let response = self
            .send(OP, Method::POST, &[index, "_search"], &[], Some(request))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Index {} not found, treating as empty", index);
            return Ok(SearchPage::empty());
        }

        let body = read_body(OP, response).await?;
        if !status.is_success() {
            return Err(EngineError::Status {
                operation: OP,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|source| EngineError::Decode { operation: OP, source })?;

        let (documents, sort_keys): (Vec<Document>, Vec<Option<Value>>) = parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let key = hit.sort.into_iter().next();
                (Document::new(hit.id, hit.source), key)
            })
            .unzip();

        let total = match parsed.hits.total {
            Some(TotalHits::Count(n)) | Some(TotalHits::Object { value: n }) => n,
            None => documents.len() as u64,
        };

        Ok(SearchPage {
            total,
            documents,
            sort_keys,
        })
    }

    async fn create(&self, index: &str, document: &Document) -> EngineResult<CreateOutcome> {
        const OP: &str = "create";

        let path = self.create_path(index, &document.id);
        let response = self
            .send(OP, Method::PUT, &path, &[], Some(&document.source))
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(CreateOutcome::Created),
            StatusCode::CONFLICT => Ok(CreateOutcome::AlreadyExists),
            status => Err(EngineError::Status {
                operation: OP,
                status: status.as_u16(),
                body: read_body(OP, response).await?,
            }),
        }
    }

    async fn delete_by_query(
        &self,
        index: &str,
        request: &DeleteByQueryRequest,
    ) -> EngineResult<DeleteSummary> {
        const OP: &str = "delete_by_query";

        let response = self
            .send(
                OP,
                Method::POST,
                &[index, "_delete_by_query"],
                &[("conflicts", "proceed")],
                Some(request),
            )
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Index {} not found, nothing to delete", index);
            return Ok(DeleteSummary::default());
        }

        let body = read_body(OP, response).await?;
        if !status.is_success() {
            return Err(EngineError::Status {
                operation: OP,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DeleteByQueryResponse = serde_json::from_str(&body)
            .map_err(|source| EngineError::Decode { operation: OP, source })?;

        Ok(DeleteSummary {
            deleted: parsed.deleted,
            version_conflicts: parsed.version_conflicts,
            failures: parsed.failures.len(),
        })
    }
}

impl std::fmt::Debug for EsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsClient")
            .field("hosts", &self.hosts)
            .field("doc_type", &self.doc_type)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

async fn read_body(operation: &'static str, response: Response) -> EngineResult<String> {
    response
        .text()
        .await
        .map_err(|source| EngineError::Transport { operation, source })
}

fn parse_host(host: &str) -> EngineResult<Url> {
    let host = host.trim();
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    Url::parse(&with_scheme)
        .map_err(|e| EngineError::InvalidConfig(format!("invalid host {}: {}", host, e)))
}

fn endpoint(base: &Url, segments: &[&str]) -> EngineResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| EngineError::InvalidConfig(format!("host {} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
