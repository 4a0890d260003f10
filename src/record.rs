//! Record representation, index keys, and value ordering.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// An open-ended record: field name to JSON value. Exactly one field (the
/// collection's id field) identifies it; the rest is schema-described but
/// not enforced by the cache.
pub type Record = Map<String, Value>;

/// Extract the record's id as a non-empty string, if present.
pub fn record_id<'a>(record: &'a Record, id_field: &str) -> Option<&'a str> {
  match record.get(id_field) {
    Some(Value::String(id)) if !id.is_empty() => Some(id),
    _ => None,
  }
}

/// Key under which a record is filed in a secondary index bucket.
///
/// Missing and null field values share the `Null` sentinel bucket.
/// Non-integer numbers and composite values are keyed by their canonical
/// JSON text, which keeps the key hashable and totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
  Null,
  Bool(bool),
  Int(i64),
  Num(String),
  Str(String),
  Json(String),
}

impl IndexKey {
  pub fn from_value(value: Option<&Value>) -> Self {
    match value {
      None | Some(Value::Null) => IndexKey::Null,
      Some(Value::Bool(b)) => IndexKey::Bool(*b),
      Some(Value::Number(n)) => match n.as_i64() {
        Some(i) => IndexKey::Int(i),
        None => IndexKey::Num(n.to_string()),
      },
      Some(Value::String(s)) => IndexKey::Str(s.clone()),
      Some(composite) => IndexKey::Json(composite.to_string()),
    }
  }
}

/// Ordering used by the comparison operators. Numbers compare
/// numerically across integer and float representations, strings
/// lexicographically; anything else is unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
      (Some(i), Some(j)) => Some(i.cmp(&j)),
      _ => x.as_f64().zip(y.as_f64()).and_then(|(p, q)| p.partial_cmp(&q)),
    },
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => None,
  }
}

/// Equality with numeric awareness: `1` equals `1.0`, everything else
/// falls back to structural equality.
pub fn values_equal(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
    _ => a == b,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(value: Value) -> Record {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected an object"),
    }
  }

  #[test]
  fn record_id_requires_non_empty_string() {
    let r = record(json!({ "id": "a", "n": 1 }));
    assert_eq!(record_id(&r, "id"), Some("a"));

    let r = record(json!({ "id": "" }));
    assert_eq!(record_id(&r, "id"), None);

    let r = record(json!({ "id": 42 }));
    assert_eq!(record_id(&r, "id"), None);

    let r = record(json!({ "name": "x" }));
    assert_eq!(record_id(&r, "id"), None);
  }

  #[test]
  fn index_key_classifies_values() {
    assert_eq!(IndexKey::from_value(None), IndexKey::Null);
    assert_eq!(IndexKey::from_value(Some(&json!(null))), IndexKey::Null);
    assert_eq!(IndexKey::from_value(Some(&json!(true))), IndexKey::Bool(true));
    assert_eq!(IndexKey::from_value(Some(&json!(7))), IndexKey::Int(7));
    assert_eq!(
      IndexKey::from_value(Some(&json!("A"))),
      IndexKey::Str("A".into())
    );
    // A string does not collide with a composite of the same text
    assert_ne!(
      IndexKey::from_value(Some(&json!("[1]"))),
      IndexKey::from_value(Some(&json!([1])))
    );
  }

  #[test]
  fn numeric_comparison_crosses_representations() {
    assert_eq!(
      compare_values(&json!(2), &json!(1.5)),
      Some(Ordering::Greater)
    );
    assert!(values_equal(&json!(1), &json!(1.0)));
    assert_eq!(compare_values(&json!("b"), &json!("a")), Some(Ordering::Greater));
    assert_eq!(compare_values(&json!(1), &json!("1")), None);
  }
}
