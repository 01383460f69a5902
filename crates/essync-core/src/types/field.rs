//! Cursor and retention field representations
//!
//! The sort field and the date field are declared in configuration as either
//! `int64` (an integer epoch) or anything else (a calendar timestamp). All
//! conversions between wall-clock time and the wire value of such a field go
//! through [`FieldCodec`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};

/// Declared representation of a cursor or retention field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    /// Integer epoch, configured as `"int64"`
    Int64,
    /// Calendar timestamp, any other configured value
    Timestamp,
}

impl Default for FieldType {
    fn default() -> Self {
        Self::Timestamp
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        if s == "int64" {
            Self::Int64
        } else {
            Self::Timestamp
        }
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        match t {
            FieldType::Int64 => "int64".to_string(),
            FieldType::Timestamp => "timestamp".to_string(),
        }
    }
}

/// Unit of integer epoch fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpochUnit {
    #[default]
    Seconds,
    Millis,
}

impl EpochUnit {
    fn from_datetime(self, at: DateTime<Utc>) -> i64 {
        match self {
            EpochUnit::Seconds => at.timestamp(),
            EpochUnit::Millis => at.timestamp_millis(),
        }
    }
}

/// A value of a cursor or retention field, in its wire representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Epoch(i64),
    Timestamp(DateTime<Utc>),
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Epoch(a), FieldValue::Epoch(b)) => Some(a.cmp(b)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Epoch(v) => serializer.serialize_i64(*v),
            FieldValue::Timestamp(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Epoch(v) => write!(f, "{}", v),
            FieldValue::Timestamp(t) => {
                write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// Converts between wall-clock time and field values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCodec {
    pub kind: FieldType,
    pub unit: EpochUnit,
}

impl FieldCodec {
    pub fn new(kind: FieldType, unit: EpochUnit) -> Self {
        Self { kind, unit }
    }

    /// Field value for the given instant
    pub fn encode(&self, at: DateTime<Utc>) -> FieldValue {
        match self.kind {
            FieldType::Int64 => FieldValue::Epoch(self.unit.from_datetime(at)),
            FieldType::Timestamp => FieldValue::Timestamp(at),
        }
    }

    /// The smallest value the engine ever compares against (the Unix epoch)
    pub fn minimal(&self) -> FieldValue {
        self.encode(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Field value for `now` minus `days` whole days
    pub fn days_before(&self, now: DateTime<Utc>, days: i64) -> FieldValue {
        self.encode(now - Duration::days(days))
    }

    /// Decode a raw JSON value read from a document
    pub fn decode(&self, field: &str, raw: &Value) -> Result<FieldValue> {
        match self.kind {
            FieldType::Int64 => decode_epoch(raw).map(FieldValue::Epoch),
            FieldType::Timestamp => decode_timestamp(raw).map(FieldValue::Timestamp),
        }
        .ok_or_else(|| self.invalid(field, raw))
    }

    /// Decode a value from the `sort` array of a search hit
    ///
    /// The cluster reports sort keys in its own normalized form: the stored
    /// long for integer fields (truncated when the document held a float)
    /// and epoch milliseconds for date fields.
    pub fn decode_sort_key(&self, field: &str, raw: &Value) -> Result<FieldValue> {
        let Value::Number(n) = raw else {
            return self.decode(field, raw);
        };
        let key = n.as_i64().or_else(|| n.as_f64().and_then(whole_f64));
        match self.kind {
            FieldType::Int64 => key.map(FieldValue::Epoch),
            FieldType::Timestamp => key
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(FieldValue::Timestamp),
        }
        .ok_or_else(|| self.invalid(field, raw))
    }

    fn invalid(&self, field: &str, raw: &Value) -> Error {
        Error::InvalidFieldValue {
            field: field.to_string(),
            value: raw.to_string(),
            expected: match self.kind {
                FieldType::Int64 => "an integer epoch",
                FieldType::Timestamp => "a date or epoch milliseconds",
            },
        }
    }
}

// Whole floats such as `1630688809.0` are accepted, fractional ones are not.
fn decode_epoch(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|v| i64::try_from(v).ok()))
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).and_then(whole_f64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn whole_f64(f: f64) -> Option<i64> {
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f.trunc() as i64)
}

// Numbers in a date field are epoch milliseconds, as in the default
// Elasticsearch date format.
fn decode_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_date(s.trim()),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}
