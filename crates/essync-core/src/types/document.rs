//! Documents moved between clusters

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::field::{FieldCodec, FieldValue};
use crate::error::{Error, Result};

/// A document as held by an index: the cluster-assigned id and the
/// verbatim `_source` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, source: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    /// Raw value of a top-level field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.source.get(name)
    }

    /// Decode a field through the codec configured for it
    pub fn field_value(&self, name: &str, codec: &FieldCodec) -> Result<FieldValue> {
        let raw = self.field(name).ok_or_else(|| Error::MissingField {
            field: name.to_string(),
        })?;
        codec.decode(name, raw)
    }
}
