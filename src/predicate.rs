//! Declarative filter compilation.
//!
//! A filter is either a plain field-to-value mapping, read the way
//! document stores read query documents, or an already-built predicate
//! closure that passes through unchanged.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{CacheError, Result};
use crate::record::{compare_values, values_equal, Record};

const OP_GREATER_THAN: &str = "$gt";
const OP_GREATER_THAN_OR_EQUAL: &str = "$gte";
const OP_LESS_THAN: &str = "$lt";
const OP_LESS_THAN_OR_EQUAL: &str = "$lte";
const OP_IN: &str = "$in";
const OP_NOT_IN: &str = "$nin";

/// A compiled boolean test over a record.
pub type PredicateFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Filter argument accepted by the cache's read operations.
#[derive(Clone)]
pub enum Filter {
  /// Declarative field-to-value mapping
  Where(Map<String, Value>),
  /// Prebuilt predicate, used as-is
  Predicate(PredicateFn),
}

impl Filter {
  /// A filter that matches every record.
  pub fn empty() -> Self {
    Filter::Where(Map::new())
  }

  /// Wrap an arbitrary predicate closure.
  pub fn from_fn<F>(f: F) -> Self
  where
    F: Fn(&Record) -> bool + Send + Sync + 'static,
  {
    Filter::Predicate(Arc::new(f))
  }
}

impl Default for Filter {
  fn default() -> Self {
    Filter::empty()
  }
}

impl From<Map<String, Value>> for Filter {
  fn from(map: Map<String, Value>) -> Self {
    Filter::Where(map)
  }
}

impl fmt::Debug for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Filter::Where(map) => f.debug_tuple("Where").field(map).finish(),
      Filter::Predicate(_) => f.write_str("Predicate(..)"),
    }
  }
}

/// Compile a filter into a boolean test.
///
/// Fails eagerly: a malformed filter errors here, not per record.
pub fn compile(filter: &Filter) -> Result<PredicateFn> {
  let clauses = match filter {
    Filter::Predicate(f) => return Ok(f.clone()),
    Filter::Where(map) => map,
  };
  if clauses.is_empty() {
    return Ok(Arc::new(|_| true));
  }
  let mut tests = Vec::with_capacity(clauses.len());
  for (field, value) in clauses {
    tests.push(field_matcher(field, value)?);
  }
  Ok(conjunction(tests))
}

fn conjunction(tests: Vec<PredicateFn>) -> PredicateFn {
  Arc::new(move |record| tests.iter().all(|test| test(record)))
}

fn field_matcher(field: &str, value: &Value) -> Result<PredicateFn> {
  match value {
    // Bare arrays as equality values have no defined meaning
    Value::Array(_) => Err(CacheError::UnsupportedPredicate {
      field: field.to_string(),
    }),
    Value::Object(operators) => {
      let mut tests = Vec::with_capacity(operators.len());
      for (operator, operand) in operators {
        tests.push(operator_matcher(field, operator, operand)?);
      }
      Ok(conjunction(tests))
    }
    scalar => {
      let field = field.to_string();
      let expected = scalar.clone();
      Ok(Arc::new(move |record| {
        record
          .get(&field)
          .map(|value| values_equal(value, &expected))
          .unwrap_or(false)
      }))
    }
  }
}

fn operator_matcher(field: &str, operator: &str, operand: &Value) -> Result<PredicateFn> {
  let field_name = field.to_string();
  match operator {
    OP_IN | OP_NOT_IN => {
      let Value::Array(items) = operand else {
        return Err(CacheError::UnsupportedPredicate {
          field: field.to_string(),
        });
      };
      let items = items.clone();
      let exclude = operator == OP_NOT_IN;
      Ok(Arc::new(move |record| {
        let hit = record
          .get(&field_name)
          .map(|value| items.iter().any(|item| values_equal(item, value)))
          .unwrap_or(false);
        hit != exclude
      }))
    }
    OP_GREATER_THAN | OP_GREATER_THAN_OR_EQUAL | OP_LESS_THAN | OP_LESS_THAN_OR_EQUAL => {
      let accept: fn(Ordering) -> bool = match operator {
        OP_GREATER_THAN => |ord| ord == Ordering::Greater,
        OP_GREATER_THAN_OR_EQUAL => |ord| ord != Ordering::Less,
        OP_LESS_THAN => |ord| ord == Ordering::Less,
        _ => |ord| ord != Ordering::Greater,
      };
      let operand = operand.clone();
      Ok(Arc::new(move |record| {
        record
          .get(&field_name)
          .and_then(|value| compare_values(value, &operand))
          .map(accept)
          .unwrap_or(false)
      }))
    }
    _ => Err(CacheError::UnknownOperator {
      field: field.to_string(),
      operator: operator.to_string(),
    }),
  }
}
