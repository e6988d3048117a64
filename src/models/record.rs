//! Record model for rows of a schema-less table store.
//!
//! A [`Record`] is a flat mapping from property name to a dynamically-typed
//! [`FieldValue`]. Every value classifies into exactly one [`ValueKind`],
//! which is what schema inference and validation compare.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A single table row, keyed by property name.
pub type Record = BTreeMap<String, FieldValue>;

/// The kind tag of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Binary,
    Null,
    Unknown,
}

impl ValueKind {
    /// The lower-case tag used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Date => "date",
            ValueKind::Binary => "binary",
            ValueKind::Null => "null",
            ValueKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically-typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
    /// Nested arrays or objects; the table store never produces these itself.
    Other(Value),
}

impl FieldValue {
    /// Classify this value.
    ///
    /// Booleans are matched before numbers, and a float with no fractional
    /// part counts as an integer.
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Null => ValueKind::Null,
            FieldValue::String(_) => ValueKind::String,
            FieldValue::Boolean(_) => ValueKind::Boolean,
            FieldValue::Integer(_) => ValueKind::Integer,
            FieldValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 {
                    ValueKind::Integer
                } else {
                    ValueKind::Number
                }
            }
            FieldValue::DateTime(_) => ValueKind::Date,
            FieldValue::Binary(_) => ValueKind::Binary,
            FieldValue::Other(_) => ValueKind::Unknown,
        }
    }

    /// Convert a plain JSON value (no type annotations).
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            other => FieldValue::Other(other.clone()),
        }
    }

    /// Render as plain JSON. Dates become RFC 3339 strings and binary
    /// payloads become base64 strings.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::DateTime(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            FieldValue::Binary(bytes) => Value::String(BASE64.encode(bytes)),
            FieldValue::Other(v) => v.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FieldValue::DateTime(dt)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(FieldValue::from_json(&value))
    }
}

/// Build a record from a JSON object. Returns `None` for any other JSON shape.
pub fn record_from_json(value: &Value) -> Option<Record> {
    value.as_object().map(|obj| {
        obj.iter()
            .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
            .collect()
    })
}

/// Render a record as a JSON object.
pub fn record_to_json(record: &Record) -> Value {
    let map: Map<String, Value> = record
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Value::Object(map)
}
