use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::{comparison::compare_documents, constants::{ID_FIELD, MAX_ARRAY_PAD}, CorvidError, FieldPath, Result, Value};

/// Outcome of resolving a [`FieldPath`] against a document.
///
/// `Absent` (the path does not exist) is distinct from `Present(&Value::Null)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    /// The path exists and holds this value.
    Present(&'a Value),
    /// Some segment of the path is missing.
    Absent,
}

impl<'a> Resolved<'a> {
    /// Returns the value if present.
    pub const fn value(self) -> Option<&'a Value> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// Returns true if the path resolved to a value (including null).
    pub const fn is_present(self) -> bool { matches!(self, Self::Present(_)) }
}

/// A schemaless record: an ordered mapping from field names to [`Value`]s.
///
/// Field order is preserved as inserted; replacing an existing field keeps its position.
/// Documents are plain values: the store shares immutable versions behind `Arc` and
/// swaps in new versions on update, so a `Document` held by a caller never changes
/// underneath it.
///
/// # Example
///
/// ```rust
/// use corvid_db::{Document, FieldPath, Value};
/// use serde_json::json;
///
/// let doc = Document::from_json(json!({
///     "name": "Alice Johnson",
///     "address": {"city": "Boston"}
/// }))
/// .unwrap();
///
/// let city = FieldPath::parse("address.city").unwrap();
/// assert_eq!(doc.resolve(&city).value(), Some(&Value::from("Boston")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// Fields in insertion order.
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    pub const fn new() -> Self {
        Self {
            fields: Vec::new(),
        }
    }

    /// Converts a JSON object into a document.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` if `json` is not an object.
    pub fn from_json(json: JsonValue) -> Result<Self> {
        match Value::from_json(json) {
            Value::Document(doc) => Ok(doc),
            other => {
                Err(CorvidError::invalid(
                    "document",
                    format!("expected an object, found {}", other.kind()),
                ))
            },
        }
    }

    /// Converts the document to a JSON object.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize { self.fields.len() }

    pub fn is_empty(&self) -> bool { self.fields.is_empty() }

    /// Returns the value of a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool { self.get(key).is_some() }

    /// Sets a top-level field, returning the previous value. An existing field keeps its
    /// position; a new field is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.fields.push((key, value));
        None
    }

    /// Sets `_id` as the first field, replacing any existing `_id`.
    pub(crate) fn set_id_first(&mut self, id: Value) {
        self.remove(ID_FIELD);
        self.fields.insert(0, (ID_FIELD.to_owned(), id));
    }

    /// Removes a top-level field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(position).1)
    }

    /// Iterates over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> { self.fields.iter().map(|(k, v)| (k.as_str(), v)) }

    /// Iterates over field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.fields.iter().map(|(k, _)| k.as_str()) }

    /// Returns the `_id` value, if set.
    pub fn id(&self) -> Option<&Value> { self.get(ID_FIELD) }

    /// Resolves a dotted path. Numeric segments index into arrays.
    pub fn resolve(&self, path: &FieldPath) -> Resolved<'_> {
        let Some((head, rest)) = path.segments().split_first()
        else {
            return Resolved::Absent;
        };
        let Some(mut current) = self.get(head)
        else {
            return Resolved::Absent;
        };
        for segment in rest {
            let next = match *current {
                Value::Document(ref doc) => doc.get(segment),
                Value::Array(ref items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Resolved::Absent,
            }
        }
        Resolved::Present(current)
    }

    /// Writes `value` at `path`, creating missing intermediate segments as empty documents.
    ///
    /// A numeric segment addressing an array sets that element, padding with nulls.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::TypeMismatch` (attributed to `operation`) when an intermediate
    /// segment holds a scalar, or when a non-numeric segment addresses an array.
    pub fn set_path(&mut self, path: &FieldPath, value: Value, operation: &str) -> Result<()> {
        set_in_document(self, path.segments(), value, path, operation)
    }

    /// Removes the value at `path`, returning it. Array elements are replaced by null so that
    /// positions of later elements do not shift.
    pub fn remove_path(&mut self, path: &FieldPath) -> Option<Value> {
        let (last, parents) = path.segments().split_last()?;
        let Some((first, rest)) = parents.split_first()
        else {
            return self.remove(last);
        };
        let mut container = self.get_mut(first)?;
        for segment in rest {
            container = match *container {
                Value::Document(ref mut doc) => doc.get_mut(segment)?,
                Value::Array(ref mut items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match *container {
            Value::Document(ref mut doc) => doc.remove(last),
            Value::Array(ref mut items) => {
                items
                    .get_mut(last.parse::<usize>().ok()?)
                    .map(std::mem::take)
            },
            _ => None,
        }
    }

    /// Returns the value of `key`, inserting an empty nested document first if it is missing.
    fn entry_or_document(&mut self, key: &str) -> &mut Value {
        let position = match self.fields.iter().position(|(k, _)| k == key) {
            Some(position) => position,
            None => {
                self.fields
                    .push((key.to_owned(), Value::Document(Self::new())));
                self.fields.len() - 1
            },
        };
        &mut self.fields[position].1
    }
}

fn mismatch(path: &FieldPath, operation: &str, expected: &str, found: &Value) -> CorvidError {
    CorvidError::TypeMismatch {
        operation: operation.to_owned(),
        field:     path.to_string(),
        expected:  expected.to_owned(),
        found:     found.kind().to_string(),
    }
}

fn set_in_document(
    doc: &mut Document,
    segments: &[String],
    value: Value,
    path: &FieldPath,
    operation: &str,
) -> Result<()> {
    let Some((head, rest)) = segments.split_first()
    else {
        return Ok(());
    };
    if rest.is_empty() {
        doc.insert(head.clone(), value);
        return Ok(());
    }
    set_in_value(doc.entry_or_document(head), rest, value, path, operation)
}

fn set_in_value(target: &mut Value, segments: &[String], value: Value, path: &FieldPath, operation: &str) -> Result<()> {
    match *target {
        Value::Document(ref mut doc) => set_in_document(doc, segments, value, path, operation),
        Value::Array(ref mut items) => {
            let Some((head, rest)) = segments.split_first()
            else {
                return Ok(());
            };
            let Ok(index) = head.parse::<usize>()
            else {
                return Err(CorvidError::TypeMismatch {
                    operation: operation.to_owned(),
                    field:     path.to_string(),
                    expected:  "document".to_owned(),
                    found:     "array".to_owned(),
                });
            };
            let len = items.len();
            if len <= index {
                let new_len = index
                    .checked_add(1)
                    .filter(|&new_len| new_len - len <= MAX_ARRAY_PAD)
                    .ok_or_else(|| {
                        CorvidError::InvalidPath {
                            path:   path.to_string(),
                            reason: format!(
                                "index {} is more than {} past the end of the array",
                                index, MAX_ARRAY_PAD
                            ),
                        }
                    })?;
                items.resize(new_len, Value::Null);
            }
            if rest.is_empty() {
                items[index] = value;
                return Ok(());
            }
            if items[index].is_null() {
                items[index] = Value::Document(Document::new());
            }
            set_in_value(&mut items[index], rest, value, path, operation)
        },
        ref other => Err(mismatch(path, operation, "document", other)),
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool { compare_documents(self, other) == Ordering::Equal }
}

impl Eq for Document {}

impl AsRef<Self> for Document {
    fn as_ref(&self) -> &Self { self }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Self::new();
        for (key, value) in iter {
            doc.insert(key, value);
        }
        doc
    }
}

impl TryFrom<JsonValue> for Document {
    type Error = CorvidError;

    fn try_from(json: JsonValue) -> Result<Self> { Self::from_json(json) }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Self::from_json(json).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(p: &str) -> FieldPath { FieldPath::parse(p).unwrap() }

    fn student() -> Document {
        Document::from_json(json!({
            "student_id": 1001,
            "name": "Alice Johnson",
            "nickname": null,
            "courses": ["CS101", "MATH201"],
            "address": {"city": "Boston", "zipcode": "02101"}
        }))
        .unwrap()
    }

    #[test]
    fn test_field_order_is_preserved() {
        let doc = student();
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, ["student_id", "name", "nickname", "courses", "address"]);

        let mut doc = doc;
        doc.insert("name", "Alice J.");
        assert_eq!(doc.keys().nth(1), Some("name"));
        doc.insert("gpa", 3.8);
        assert_eq!(doc.keys().last(), Some("gpa"));
    }

    #[test]
    fn test_resolve_distinguishes_absent_from_null() {
        let doc = student();
        assert_eq!(doc.resolve(&path("nickname")), Resolved::Present(&Value::Null));
        assert_eq!(doc.resolve(&path("email")), Resolved::Absent);
        assert_eq!(doc.resolve(&path("address.state")), Resolved::Absent);
        assert_eq!(doc.resolve(&path("name.first")), Resolved::Absent);
        assert_eq!(
            doc.resolve(&path("address.city")).value(),
            Some(&Value::from("Boston"))
        );
        assert_eq!(
            doc.resolve(&path("courses.1")).value(),
            Some(&Value::from("MATH201"))
        );
        assert_eq!(doc.resolve(&path("courses.9")), Resolved::Absent);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut doc = Document::new();
        doc.set_path(&path("address.geo.lat"), Value::Float(42.36), "$set")
            .unwrap();
        assert_eq!(doc.to_json(), json!({"address": {"geo": {"lat": 42.36}}}));

        doc.set_path(&path("tags.2"), Value::from("x"), "$set").unwrap();
        assert_eq!(doc.to_json()["tags"], json!({"2": "x"}));
    }

    #[test]
    fn test_set_path_into_arrays_pads_with_null() {
        let mut doc = student();
        doc.set_path(&path("courses.3"), Value::from("PHYS101"), "$set")
            .unwrap();
        assert_eq!(
            doc.to_json()["courses"],
            json!(["CS101", "MATH201", null, "PHYS101"])
        );
    }

    #[test]
    fn test_set_path_rejects_far_array_index() {
        for index in ["18446744073709551615", "1000000000"] {
            let mut doc = student();
            let result = doc.set_path(&path(&format!("courses.{}", index)), Value::Int(1), "$set");
            assert!(
                matches!(result, Err(CorvidError::InvalidPath { .. })),
                "index {} gave {:?}",
                index,
                result
            );
            assert_eq!(doc, student());
        }
    }

    #[test]
    fn test_set_path_through_scalar_is_type_mismatch() {
        let mut doc = student();
        let err = doc
            .set_path(&path("name.first"), Value::from("A"), "$set")
            .unwrap_err();
        match err {
            CorvidError::TypeMismatch {
                field,
                found,
                ..
            } => {
                assert_eq!(field, "name.first");
                assert_eq!(found, "string");
            },
            other => panic!("unexpected error {:?}", other),
        }

        let err = doc
            .set_path(&path("courses.first"), Value::from("A"), "$set")
            .unwrap_err();
        assert!(matches!(err, CorvidError::TypeMismatch { .. }));
    }

    #[test]
    fn test_remove_path() {
        let mut doc = student();
        assert_eq!(
            doc.remove_path(&path("address.zipcode")),
            Some(Value::from("02101"))
        );
        assert_eq!(doc.remove_path(&path("address.zipcode")), None);
        assert_eq!(doc.remove_path(&path("courses.0")), Some(Value::from("CS101")));
        assert_eq!(doc.to_json()["courses"], json!([null, "MATH201"]));
        assert_eq!(doc.remove_path(&path("name")), Some(Value::from("Alice Johnson")));
        assert!(!doc.contains_key("name"));
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(Document::from_json(json!([1, 2])).is_err());
        assert!(Document::try_from(json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_equality_is_order_sensitive() {
        let a = Document::from_json(json!({"a": 1, "b": 2})).unwrap();
        let b = Document::from_json(json!({"b": 2, "a": 1})).unwrap();
        let c = Document::from_json(json!({"a": 1.0, "b": 2})).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
