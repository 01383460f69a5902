//! Typed query builder
//!
//! Serializes to the search DSL accepted by `_search` and
//! `_delete_by_query`:
//!
//! ```text
//! {
//!   "query": { "range": { "callDate": { "gt": 12 } } },
//!   "sort": [ { "callDate": { "order": "desc" } } ],
//!   "from": 0,
//!   "size": 100,
//!   "track_total_hits": true
//! }
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use essync_core::types::FieldValue;

/// Query clause
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll(MatchAll),
    Range(BTreeMap<String, RangeBounds>),
}

/// Body of a `match_all` clause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchAll {}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll(MatchAll {})
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), bounds);
        Query::Range(fields)
    }

    /// Documents whose `field` is strictly greater than `value`
    pub fn greater_than(field: impl Into<String>, value: FieldValue) -> Self {
        Self::range(
            field,
            RangeBounds {
                gt: Some(value),
                ..Default::default()
            },
        )
    }

    /// Documents whose `field` is strictly less than `value`
    pub fn less_than(field: impl Into<String>, value: FieldValue) -> Self {
        Self::range(
            field,
            RangeBounds {
                lt: Some(value),
                ..Default::default()
            },
        )
    }
}

/// Bounds of a `range` clause
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RangeBounds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<FieldValue>,
}

impl RangeBounds {
    /// Whether `value` satisfies every bound. Values of a different field
    /// type never match.
    pub fn contains(&self, value: &FieldValue) -> bool {
        let check = |bound: &Option<FieldValue>, accept: fn(Ordering) -> bool| {
            bound.map_or(true, |b| value.partial_cmp(&b).is_some_and(accept))
        };

        check(&self.gt, Ordering::is_gt)
            && check(&self.gte, Ordering::is_ge)
            && check(&self.lt, Ordering::is_lt)
            && check(&self.lte, Ordering::is_le)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort key, serialized as `{ "<field>": { "order": "<order>" } }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Serialize for Sort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Order {
            order: SortOrder,
        }

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &Order { order: self.order })?;
        map.end()
    }
}

/// Request body for `_search`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub query: Query,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Sort>,
    pub from: usize,
    pub size: usize,
    /// Count every match instead of stopping at the default cap
    pub track_total_hits: bool,
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            sort: Vec::new(),
            from: 0,
            size: 10,
            track_total_hits: true,
        }
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            order,
        });
        self
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

/// Request body for `_delete_by_query`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteByQueryRequest {
    pub query: Query,
}

impl DeleteByQueryRequest {
    pub fn new(query: Query) -> Self {
        Self { query }
    }
}
