//! Fetch-cursor bookkeeping for incremental synchronization.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::offset::Offset;

/// Per-filter cursor table: normalized filter key to the last offset
/// received from the source for that filter. In-memory only, discarded
/// with the cache.
#[derive(Debug, Clone, Default)]
pub struct FetchCursors {
  cursors: HashMap<String, Offset>,
}

impl FetchCursors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<Offset> {
    self.cursors.get(key).copied()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.cursors.contains_key(key)
  }

  /// Record `offset` for `key`. A cursor never moves backward: a stale
  /// or out-of-order offset is ignored. Returns whether the stored
  /// cursor changed.
  pub fn advance(&mut self, key: &str, offset: Offset) -> bool {
    match self.cursors.get(key) {
      Some(current) if *current >= offset => false,
      _ => {
        self.cursors.insert(key.to_string(), offset);
        true
      }
    }
  }

  pub fn clear(&mut self) {
    self.cursors.clear();
  }

  pub fn len(&self) -> usize {
    self.cursors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cursors.is_empty()
  }
}

/// Normalized cache key for a declarative filter.
///
/// serde_json maps are BTreeMap-backed, so serialization is already
/// canonical at every nesting level; the sha256 keeps keys fixed-length
/// regardless of filter size.
pub fn filter_key(filter: &Map<String, Value>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(Value::Object(filter.clone()).to_string().as_bytes());
  hex::encode(hasher.finalize())
}
