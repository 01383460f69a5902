//! In-memory search backend for loop tests

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use essync_core::types::{Document, FieldCodec, FieldValue};

use crate::client::{CreateOutcome, DeleteSummary, SearchBackend, SearchPage};
use crate::error::{EngineError, EngineResult};
use crate::query::{DeleteByQueryRequest, Query, SearchRequest, SortOrder};

/// Calls observed by a [`MemoryIndex`], in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Search(String),
    Create(String),
    DeleteByQuery(String),
}

/// Index contents keyed by index name, then document id. Field values are
/// read through one codec for every field.
pub struct MemoryIndex {
    codec: FieldCodec,
    indices: Mutex<HashMap<String, BTreeMap<String, Map<String, Value>>>>,
    calls: Mutex<Vec<Call>>,
    searches: Mutex<Vec<SearchRequest>>,
    failing_indices: Mutex<HashSet<String>>,
    failing_ids: Mutex<HashMap<String, usize>>,
    create_delay: Mutex<HashMap<String, Duration>>,
}

impl MemoryIndex {
    pub fn new(codec: FieldCodec) -> Self {
        Self {
            codec,
            indices: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
            failing_indices: Mutex::new(HashSet::new()),
            failing_ids: Mutex::new(HashMap::new()),
            create_delay: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, index: &str, id: &str, source: Value) {
        let source = match source {
            Value::Object(map) => map,
            other => panic!("document source must be an object, got {}", other),
        };
        self.indices
            .lock()
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), source);
    }

    pub fn ids(&self, index: &str) -> Vec<String> {
        self.indices
            .lock()
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.indices.lock().get(index)?.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn searches(&self) -> Vec<SearchRequest> {
        self.searches.lock().clone()
    }

    /// Every request against `index` answers with HTTP 500
    pub fn fail_index(&self, index: &str) {
        self.failing_indices.lock().insert(index.to_string());
    }

    pub fn heal_index(&self, index: &str) {
        self.failing_indices.lock().remove(index);
    }

    /// Creating `id` answers with HTTP 500
    pub fn fail_create(&self, id: &str) {
        self.fail_create_times(id, usize::MAX);
    }

    /// The next `times` creates of `id` answer with HTTP 500
    pub fn fail_create_times(&self, id: &str, times: usize) {
        self.failing_ids.lock().insert(id.to_string(), times);
    }

    pub fn heal_create(&self, id: &str) {
        self.failing_ids.lock().remove(id);
    }

    /// Delay the create of `id` before it lands
    pub fn delay_create(&self, id: &str, delay: Duration) {
        self.create_delay.lock().insert(id.to_string(), delay);
    }

    fn check_index(&self, operation: &'static str, index: &str) -> EngineResult<()> {
        if self.failing_indices.lock().contains(index) {
            return Err(EngineError::Status {
                operation,
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn matches(&self, query: &Query, document: &Document) -> bool {
        match query {
            Query::MatchAll(_) => true,
            Query::Range(fields) => fields.iter().all(|(field, bounds)| {
                document
                    .field_value(field, &self.codec)
                    .map(|v| bounds.contains(&v))
                    .unwrap_or(false)
            }),
        }
    }
}

#[async_trait]
impl SearchBackend for MemoryIndex {
    async fn search(&self, index: &str, request: &SearchRequest) -> EngineResult<SearchPage> {
        self.calls.lock().push(Call::Search(index.to_string()));
        self.searches.lock().push(request.clone());
        self.check_index("search", index)?;

        let matched: Vec<Document> = match self.indices.lock().get(index) {
            Some(docs) => docs
                .iter()
                .map(|(id, source)| Document::new(id.clone(), source.clone()))
                .filter(|d| self.matches(&request.query, d))
                .collect(),
            None => return Ok(SearchPage::empty()),
        };

        let sort = request.sort.first();
        let mut keyed: Vec<(Option<FieldValue>, Document)> = matched
            .into_iter()
            .map(|d| {
                let key = sort.and_then(|s| d.field_value(&s.field, &self.codec).ok());
                (key, d)
            })
            .collect();

        if let Some(sort) = sort {
            keyed.sort_by(|(a, _), (b, _)| {
                compare_missing_last(a.as_ref(), b.as_ref(), sort.order)
            });
        }

        let total = keyed.len() as u64;
        let (sort_keys, documents): (Vec<Option<Value>>, Vec<Document>) = keyed
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|(key, d)| (sort.map(|_| key.map(sort_value).unwrap_or(Value::Null)), d))
            .unzip();

        Ok(SearchPage {
            total,
            documents,
            sort_keys,
        })
    }

    async fn create(&self, index: &str, document: &Document) -> EngineResult<CreateOutcome> {
        let delay = self.create_delay.lock().get(&document.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().push(Call::Create(document.id.clone()));
        self.check_index("create", index)?;

        if let Some(remaining) = self.failing_ids.lock().get_mut(&document.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EngineError::Status {
                    operation: "create",
                    status: 500,
                    body: "injected failure".to_string(),
                });
            }
        }

        let mut indices = self.indices.lock();
        let docs = indices.entry(index.to_string()).or_default();
        if docs.contains_key(&document.id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        docs.insert(document.id.clone(), document.source.clone());
        Ok(CreateOutcome::Created)
    }

    async fn delete_by_query(
        &self,
        index: &str,
        request: &DeleteByQueryRequest,
    ) -> EngineResult<DeleteSummary> {
        self.calls.lock().push(Call::DeleteByQuery(index.to_string()));
        self.check_index("delete_by_query", index)?;

        let mut indices = self.indices.lock();
        let Some(docs) = indices.get_mut(index) else {
            return Ok(DeleteSummary::default());
        };

        let doomed: Vec<String> = docs
            .iter()
            .filter(|(id, source)| {
                self.matches(&request.query, &Document::new(id.as_str(), (*source).clone()))
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &doomed {
            docs.remove(id);
        }

        Ok(DeleteSummary {
            deleted: doomed.len() as u64,
            ..Default::default()
        })
    }
}

/// Order two sort keys, documents without a readable value last whichever
/// the direction
fn compare_missing_last(
    a: Option<&FieldValue>,
    b: Option<&FieldValue>,
    order: SortOrder,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ord = a.partial_cmp(b).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort key as the cluster reports it: the long itself, or epoch millis
fn sort_value(key: FieldValue) -> Value {
    match key {
        FieldValue::Epoch(v) => Value::from(v),
        FieldValue::Timestamp(t) => Value::from(t.timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essync_core::types::{EpochUnit, FieldType};
    use serde_json::json;

    #[tokio::test]
    async fn test_unreadable_sort_values_come_last() {
        let index = MemoryIndex::new(FieldCodec::new(FieldType::Int64, EpochUnit::Seconds));
        index.insert("logs", "broken", json!({ "callDate": "soon" }));
        index.insert("logs", "missing", json!({}));
        index.insert("logs", "old", json!({ "callDate": 1 }));
        index.insert("logs", "new", json!({ "callDate": 2 }));

        for (order, expected) in [
            (SortOrder::Desc, ["new", "old"]),
            (SortOrder::Asc, ["old", "new"]),
        ] {
            let request = SearchRequest::new(Query::match_all()).sort_by("callDate", order);
            let page = index.search("logs", &request).await.unwrap();
            let ids: Vec<&str> = page.ids().collect();
            assert_eq!(&ids[..2], &expected[..], "{:?}", order);
            assert_eq!(page.sort_keys[2], Some(Value::Null));
        }
    }
}
