//! Comparison utilities for sorting, equality and range predicates over [`Value`]s.

use std::cmp::Ordering;

use crate::{Document, Value};

/// Rank of each value kind in the total order used for sorting and index keys.
const fn type_order(v: &Value) -> u8 {
    match *v {
        Value::Null => 0,
        Value::Int(_) | Value::Float(_) => 1,
        Value::String(_) => 2,
        Value::Document(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
        Value::Timestamp(_) => 6,
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (&Value::Int(x), &Value::Int(y)) => x.cmp(&y),
        _ => {
            let fa = a.as_f64().unwrap_or(0.0);
            let fb = b.as_f64().unwrap_or(0.0);
            fa.partial_cmp(&fb).unwrap_or_else(|| fa.total_cmp(&fb))
        },
    }
}

/// Compares two values under the engine's total order.
///
/// Kinds order as null < numbers < strings < documents < arrays < booleans < timestamps.
/// Integers and floats compare numerically, documents field by field (name, then value),
/// arrays element by element.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let type_a = type_order(a);
    let type_b = type_order(b);

    if type_a != type_b {
        return type_a.cmp(&type_b);
    }

    match (a, b) {
        (&Value::Bool(ba), &Value::Bool(bb)) => ba.cmp(&bb),
        (&Value::String(ref sa), &Value::String(ref sb)) => sa.cmp(sb),
        (&Value::Timestamp(ta), &Value::Timestamp(tb)) => ta.cmp(&tb),
        (&Value::Array(ref aa), &Value::Array(ref ab)) => aa.iter().cmp(ab.iter()),
        (&Value::Document(ref da), &Value::Document(ref db)) => compare_documents(da, db),
        (&Value::Int(_) | &Value::Float(_), _) => compare_numbers(a, b),
        _ => Ordering::Equal,
    }
}

/// Compares two documents field by field, in field order.
pub fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ordering = ka.cmp(kb).then_with(|| compare_values(va, vb));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

/// Compares two optional values for sorting purposes. Absent sorts before every value.
pub fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(va), Some(vb)) => compare_values(va, vb),
    }
}

/// Compares two values for range predicates (`$gt`, `$lte`, ...).
///
/// Only values of the same comparable kind (numbers, strings, timestamps, booleans) have an
/// ordering; anything else returns `None`, which predicates treat as "does not match".
pub fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (&Value::Int(_) | &Value::Float(_), &Value::Int(_) | &Value::Float(_)) => {
            match (a, b) {
                (&Value::Int(x), &Value::Int(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            }
        },
        (&Value::String(ref sa), &Value::String(ref sb)) => Some(sa.cmp(sb)),
        (&Value::Timestamp(ta), &Value::Timestamp(tb)) => Some(ta.cmp(&tb)),
        (&Value::Bool(ba), &Value::Bool(bb)) => Some(ba.cmp(&bb)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use serde_json::json;

    use super::*;

    fn v(json: serde_json::Value) -> Value { Value::from_json(json) }

    #[test]
    fn test_compare_values_type_order() {
        let ordered = [
            v(json!(null)),
            v(json!(1)),
            v(json!("a")),
            v(json!({"a": 1})),
            v(json!([1])),
            v(json!(false)),
            Value::Timestamp(Utc.timestamp_millis_opt(0).unwrap()),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                compare_values(&pair[0], &pair[1]),
                Ordering::Less,
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_compare_values_number() {
        assert_eq!(compare_values(&v(json!(1)), &v(json!(1.0))), Ordering::Equal);
        assert_eq!(compare_values(&v(json!(1)), &v(json!(2))), Ordering::Less);
        assert_eq!(compare_values(&v(json!(1.5)), &v(json!(1))), Ordering::Greater);
        assert_eq!(
            compare_values(&Value::Int(i64::MAX), &Value::Int(i64::MAX - 1)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_values_array() {
        assert_eq!(compare_values(&v(json!([1])), &v(json!([1]))), Ordering::Equal);
        assert_eq!(compare_values(&v(json!([1])), &v(json!([1, 2]))), Ordering::Less);
        assert_eq!(compare_values(&v(json!([2])), &v(json!([1, 2]))), Ordering::Greater);
    }

    #[test]
    fn test_compare_values_document() {
        assert_eq!(
            compare_values(&v(json!({"a": 1})), &v(json!({"a": 1}))),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&v(json!({"a": 1})), &v(json!({"a": 1, "b": 2}))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&v(json!({"a": 2})), &v(json!({"b": 1}))),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_optional() {
        assert_eq!(compare_optional(None, None), Ordering::Equal);
        assert_eq!(compare_optional(None, Some(&v(json!(null)))), Ordering::Less);
        assert_eq!(compare_optional(Some(&v(json!(1))), None), Ordering::Greater);
        assert_eq!(
            compare_optional(Some(&v(json!(1))), Some(&v(json!(2)))),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_same_kind() {
        assert_eq!(
            compare_same_kind(&v(json!(3.9)), &v(json!(3.5))),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_same_kind(&v(json!("Boston")), &v(json!("Cambridge"))),
            Some(Ordering::Less)
        );
        assert_eq!(compare_same_kind(&v(json!("3.9")), &v(json!(3.5))), None);
        assert_eq!(compare_same_kind(&v(json!(null)), &v(json!(null))), None);
        assert_eq!(compare_same_kind(&v(json!([4])), &v(json!(3))), None);
    }
}
