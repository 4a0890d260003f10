//! Primary and secondary index bookkeeping.
//!
//! The store owns a primary map (id to record) and one secondary index
//! per foreign-key-shaped schema field (field value to set of ids).
//! Lookups resolve through the primary map, so a bucket entry can never
//! serve a record other than the most recently cached one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CacheError, Result};
use crate::predicate::{compile, Filter};
use crate::record::{record_id, IndexKey, Record};

type Bucket = BTreeSet<String>;

/// In-memory index store for one collection.
#[derive(Debug, Clone)]
pub struct IndexStore {
  id_field: String,
  to_one_fields: Vec<String>,
  primary: BTreeMap<String, Record>,
  by_one: HashMap<String, BTreeMap<IndexKey, Bucket>>,
  /// Side table of every defined index name, for diagnostics
  indices: BTreeSet<String>,
}

impl IndexStore {
  /// Create an empty store indexing `to_one_fields` as secondary indices.
  pub fn new(id_field: impl Into<String>, to_one_fields: Vec<String>) -> Self {
    let mut store = Self {
      id_field: id_field.into(),
      to_one_fields,
      primary: BTreeMap::new(),
      by_one: HashMap::new(),
      indices: BTreeSet::new(),
    };
    store.clear();
    store
  }

  /// Register a named index in the side table.
  pub fn define_index(&mut self, keys: &[&str]) {
    self.indices.insert(keys.join("|"));
  }

  /// Names of every defined index.
  pub fn defined_indices(&self) -> impl Iterator<Item = &str> {
    self.indices.iter().map(String::as_str)
  }

  pub fn id_field(&self) -> &str {
    &self.id_field
  }

  pub fn len(&self) -> usize {
    self.primary.len()
  }

  pub fn is_empty(&self) -> bool {
    self.primary.is_empty()
  }

  /// Store a record, replacing any previous record with the same id and
  /// moving its secondary index entries in the same call.
  pub fn add_to_cache(&mut self, record: Record) -> Result<()> {
    let id = record_id(&record, &self.id_field)
      .ok_or(CacheError::MissingId)?
      .to_string();
    let previous = self.primary.insert(id.clone(), record);
    // The new record is read back out of the primary map so the borrow
    // of `previous` and the bucket mutations cannot interleave with it.
    let record = &self.primary[&id];
    for (field, index) in &mut self.by_one {
      let new_key = IndexKey::from_value(record.get(field));
      if let Some(previous) = &previous {
        let old_key = IndexKey::from_value(previous.get(field));
        if old_key != new_key {
          remove_from_bucket(index, &old_key, &id);
        }
      }
      index.entry(new_key).or_default().insert(id.clone());
    }
    Ok(())
  }

  /// Store records in array order. Not atomic: a failure partway
  /// through leaves earlier records cached.
  pub fn add_many_to_cache(&mut self, records: Vec<Record>) -> Result<()> {
    for record in records {
      self.add_to_cache(record)?;
    }
    Ok(())
  }

  /// The cached record for `id`. Empty or unknown ids are "not found",
  /// never an error.
  pub fn get_by_id(&self, id: &str) -> Option<&Record> {
    if id.is_empty() {
      return None;
    }
    self.primary.get(id)
  }

  /// All cached records whose `field` equals `value`, via direct bucket
  /// lookup. Errors if `field` was never registered as an index.
  pub fn get_many_by_index(&self, field: &str, value: &serde_json::Value) -> Result<Vec<Record>> {
    let index = self
      .by_one
      .get(field)
      .ok_or_else(|| CacheError::IndexNotDefined {
        field: field.to_string(),
      })?;
    let key = IndexKey::from_value(Some(value));
    let records = match index.get(&key) {
      Some(bucket) => bucket
        .iter()
        .filter_map(|id| self.primary.get(id))
        .cloned()
        .collect(),
      None => Vec::new(),
    };
    Ok(records)
  }

  /// Remove `id` from the primary map and every secondary bucket it was
  /// filed under. Unknown ids are a no-op.
  pub fn eject(&mut self, id: &str) {
    let Some(record) = self.primary.remove(id) else {
      return;
    };
    for (field, index) in &mut self.by_one {
      let key = IndexKey::from_value(record.get(field));
      remove_from_bucket(index, &key, id);
    }
  }

  /// Every cached record matching `filter`, in primary-index order.
  pub fn filter(&self, filter: &Filter) -> Result<Vec<Record>> {
    let matches = compile(filter)?;
    Ok(
      self
        .primary
        .values()
        .filter(|record| matches(record))
        .cloned()
        .collect(),
    )
  }

  /// Discard all records and rebuild the secondary-index skeleton from
  /// the current schema fields.
  pub fn clear(&mut self) {
    self.primary = BTreeMap::new();
    self.by_one = HashMap::new();
    self.indices = BTreeSet::new();
    let id_field = self.id_field.clone();
    self.define_index(&[&id_field]);
    for field in self.to_one_fields.clone() {
      self.define_index(&[&field]);
      self.by_one.insert(field, BTreeMap::new());
    }
  }

  #[cfg(test)]
  fn bucket_ids(&self, field: &str, key: &IndexKey) -> Vec<String> {
    self
      .by_one
      .get(field)
      .and_then(|index| index.get(key))
      .map(|bucket| bucket.iter().cloned().collect())
      .unwrap_or_default()
  }
}

/// Drop `id` from the bucket under `key`; the last id removes the
/// bucket itself so scans never see empty tombstones.
fn remove_from_bucket(index: &mut BTreeMap<IndexKey, Bucket>, key: &IndexKey, id: &str) {
  if let Some(bucket) = index.get_mut(key) {
    bucket.remove(id);
    if bucket.is_empty() {
      index.remove(key);
    }
  }
}
