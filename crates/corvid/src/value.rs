//! The tagged value type stored inside documents.

use std::{cmp::Ordering, fmt};

use chrono::{DateTime, SecondsFormat, TimeZone as _, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::{comparison::compare_values, constants::DATE_KEY, Document};

/// A document value.
///
/// Values are schemaless: any field may hold any kind. Equality and ordering are
/// defined by [`compare_values`], so `Value::Int(1) == Value::Float(1.0)` and values of
/// different kinds order by a fixed kind rank.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Explicit null (distinct from an absent field)
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// UTC timestamp with millisecond precision
    Timestamp(DateTime<Utc>),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Nested document
    Document(Document),
}

/// The runtime kind of a [`Value`], used by `$type` and in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `null`
    Null,
    /// `bool`
    Bool,
    /// `int`
    Int,
    /// `double`
    Float,
    /// `string`
    String,
    /// `date`
    Timestamp,
    /// `array`
    Array,
    /// `object`
    Document,
}

impl ValueKind {
    /// Returns the canonical type name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "double",
            Self::String => "string",
            Self::Timestamp => "date",
            Self::Array => "array",
            Self::Document => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl Value {
    /// Returns the runtime kind of this value.
    pub const fn kind(&self) -> ValueKind {
        match *self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Array(_) => ValueKind::Array,
            Self::Document(_) => ValueKind::Document,
        }
    }

    pub const fn is_null(&self) -> bool { matches!(*self, Self::Null) }

    pub const fn is_number(&self) -> bool { matches!(*self, Self::Int(_) | Self::Float(_)) }

    pub const fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int(n) => Some(n as f64),
            Self::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is an integer or an integral float.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(n) => Some(n),
            Self::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Some(f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Self::String(ref s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_array(&self) -> Option<&Vec<Self>> {
        match *self {
            Self::Array(ref items) => Some(items),
            _ => None,
        }
    }

    pub const fn as_document(&self) -> Option<&Document> {
        match *self {
            Self::Document(ref doc) => Some(doc),
            _ => None,
        }
    }

    /// Interprets the value the way `$exists` and projections do: booleans as themselves,
    /// numbers as non-zero.
    pub fn as_flag(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            Self::Int(n) => Some(n != 0),
            Self::Float(f) => Some(f != 0.0),
            _ => None,
        }
    }

    /// Converts from a `serde_json::Value`.
    ///
    /// Objects of the form `{"$date": "<RFC 3339>"}` or `{"$date": <epoch millis>}` become
    /// timestamps. Integers outside the `i64` range become floats.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => {
                n.as_i64()
                    .map(Self::Int)
                    .or_else(|| n.as_f64().map(Self::Float))
                    .unwrap_or(Self::Null)
            },
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(map) => {
                if map.len() == 1 &&
                    let Some(raw) = map.get(DATE_KEY) &&
                    let Some(ts) = parse_timestamp(raw)
                {
                    return Self::Timestamp(ts);
                }
                Self::Document(
                    map.into_iter()
                        .map(|(k, v)| (k, Self::from_json(v)))
                        .collect(),
                )
            },
        }
    }

    /// Converts to a `serde_json::Value`. Non-finite floats become `null`.
    pub fn to_json(&self) -> JsonValue {
        match *self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(b),
            Self::Int(n) => JsonValue::Number(n.into()),
            Self::Float(f) => {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            },
            Self::String(ref s) => JsonValue::String(s.clone()),
            Self::Timestamp(ts) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    DATE_KEY.to_owned(),
                    JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                JsonValue::Object(map)
            },
            Self::Array(ref items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Document(ref doc) => doc.to_json(),
        }
    }
}

fn parse_timestamp(raw: &JsonValue) -> Option<DateTime<Utc>> {
    match *raw {
        JsonValue::String(ref s) => {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|| {
                    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|dt| Utc.from_utc_datetime(&dt))
                })
        },
        JsonValue::Number(ref n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { compare_values(self, other) == Ordering::Equal }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering { compare_values(self, other) }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_json()) }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Self::from_json)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self { Self::from_json(json) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self { Self::Int(i64::from(n)) }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Self::Int(n) }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self { Self::Float(f) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::String(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::String(s) }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self { Self::Timestamp(ts) }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self { Self::Document(doc) }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self { Self::Array(items.into_iter().map(Into::into).collect()) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::from_json(json!(null)), Value::Null);
        assert_eq!(Value::from_json(json!(true)), Value::Bool(true));
        assert!(matches!(Value::from_json(json!(42)), Value::Int(42)));
        assert!(matches!(Value::from_json(json!(3.5)), Value::Float(f) if f == 3.5));
        assert!(matches!(Value::from_json(json!(u64::MAX)), Value::Float(_)));
        assert_eq!(Value::from_json(json!("x")), Value::from("x"));
    }

    #[test]
    fn test_dates_parse_and_serialize() {
        let ts = Value::from_json(json!({"$date": "2022-08-15T00:00:00Z"}));
        assert_eq!(ts.kind(), ValueKind::Timestamp);
        assert_eq!(ts.to_json(), json!({"$date": "2022-08-15T00:00:00.000Z"}));

        let plain_day = Value::from_json(json!({"$date": "2022-08-15"}));
        assert_eq!(plain_day, ts);

        let millis = Value::from_json(json!({"$date": 1_660_521_600_000_i64}));
        assert_eq!(millis, ts);

        // Not a date: more than one key, or an unparseable payload
        let doc = Value::from_json(json!({"$date": "soon", "x": 1}));
        assert_eq!(doc.kind(), ValueKind::Document);
        let doc = Value::from_json(json!({"$date": "soon"}));
        assert_eq!(doc.kind(), ValueKind::Document);
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::from("1"));
        assert_eq!(Value::Float(2.0).as_i64(), Some(2));
        assert_eq!(Value::Float(2.5).as_i64(), None);
    }

    #[test]
    fn test_flags() {
        assert_eq!(Value::Int(0).as_flag(), Some(false));
        assert_eq!(Value::Int(1).as_flag(), Some(true));
        assert_eq!(Value::Bool(true).as_flag(), Some(true));
        assert_eq!(Value::from("yes").as_flag(), None);
    }

    #[test]
    fn test_serde_uses_json_form() {
        let value = Value::from(vec![Value::Int(1), Value::from("a")]);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, "[1,\"a\"]");
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
