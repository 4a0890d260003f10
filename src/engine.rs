//! The cache engine: index store, predicate matcher, and fetch-cursor
//! table combined over a remote client.
//!
//! Reads (`get_by_id`, `get_many_by_index`, `filter`) never touch the
//! network. Writes reach the cache either through the mutation helpers
//! (`create`, `update`, `destroy`) or through an explicit
//! [`CacheEngine::observe`] call made by whoever talked to the remote.
//! Incremental sync (`cached_fetch`, `fetch_once`) merges every fetched
//! page into the cache before requesting the next one, so partial
//! progress stays visible even when a later page fails.
//!
//! Locks are held only for the duration of a single synchronous cache
//! operation, never across an await point.

use futures::future;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::config::CollectionConfig;
use crate::error::{CacheError, Result};
use crate::index::IndexStore;
use crate::offset::Offset;
use crate::predicate::Filter;
use crate::record::{record_id, Record};
use crate::remote::{FindOptions, RemoteClient};
use crate::sync::{filter_key, FetchCursors};

const DEFAULT_CHUNK_SIZE: usize = 100;

/// A remote result reported to the cache.
#[derive(Debug, Clone)]
pub enum Observation {
  /// A record was created or updated remotely
  Upsert(Record),
  /// A batch of records was fetched or merged remotely
  UpsertMany(Vec<Record>),
  /// The record with this id was deleted remotely
  Delete(String),
}

/// Options for the incremental fetch operations.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
  /// Explicit starting offset, overriding the stored cursor
  pub offset: Option<Offset>,
  /// Page-size threshold: a short page ends the loop
  pub page_size: Option<usize>,
  /// Sort expression, passed through to the remote
  pub sort: Option<String>,
}

/// Options for [`CacheEngine::find_by_many`].
#[derive(Debug, Clone)]
pub struct FindByManyOptions {
  /// Skip ids already present in the primary index
  pub cached: bool,
  /// Ids per remote `$in` request
  pub chunk_size: usize,
  /// Field to match ids against; defaults to the collection's id field
  pub field: Option<String>,
}

impl Default for FindByManyOptions {
  fn default() -> Self {
    Self {
      cached: false,
      chunk_size: DEFAULT_CHUNK_SIZE,
      field: None,
    }
  }
}

/// Indexed cache over one remote collection.
///
/// Wraps a [`RemoteClient`] by composition; one engine per collection,
/// configured once with an explicit [`CollectionConfig`].
pub struct CacheEngine<R> {
  remote: Arc<R>,
  config: CollectionConfig,
  store: Arc<Mutex<IndexStore>>,
  cursors: Arc<Mutex<FetchCursors>>,
}

impl<R> Clone for CacheEngine<R> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      config: self.config.clone(),
      store: Arc::clone(&self.store),
      cursors: Arc::clone(&self.cursors),
    }
  }
}

impl<R: RemoteClient> CacheEngine<R> {
  pub fn new(config: CollectionConfig, remote: R) -> Self {
    let store = IndexStore::new(config.id_field.clone(), config.schema.to_one_fields());
    Self {
      remote: Arc::new(remote),
      config,
      store: Arc::new(Mutex::new(store)),
      cursors: Arc::new(Mutex::new(FetchCursors::new())),
    }
  }

  pub fn collection(&self) -> &str {
    &self.config.collection
  }

  pub fn config(&self) -> &CollectionConfig {
    &self.config
  }

  // A poisoned lock only means some caller panicked mid-read; cache
  // mutations are single-call and leave the maps consistent.
  fn store(&self) -> MutexGuard<'_, IndexStore> {
    self.store.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn cursors(&self) -> MutexGuard<'_, FetchCursors> {
    self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // ==========================================================================
  // Reads: cache only, never the network
  // ==========================================================================

  /// The cached record for `id`, if any.
  pub fn get_by_id(&self, id: &str) -> Option<Record> {
    self.store().get_by_id(id).cloned()
  }

  /// All cached records whose indexed `field` equals `value`.
  pub fn get_many_by_index(&self, field: &str, value: &Value) -> Result<Vec<Record>> {
    self.store().get_many_by_index(field, value)
  }

  /// Every cached record matching `filter`, in primary-index order.
  pub fn filter(&self, filter: &Filter) -> Result<Vec<Record>> {
    self.store().filter(filter)
  }

  /// Number of cached records.
  pub fn cached_len(&self) -> usize {
    self.store().len()
  }

  // ==========================================================================
  // Mutation
  // ==========================================================================

  /// Report a remote result to the cache. This is the explicit channel
  /// that keeps locally observed writes consistent with the mirror.
  pub fn observe(&self, observation: Observation) -> Result<()> {
    match observation {
      Observation::Upsert(record) => self.store().add_to_cache(record),
      Observation::UpsertMany(records) => self.store().add_many_to_cache(records),
      Observation::Delete(id) => {
        self.store().eject(&id);
        Ok(())
      }
    }
  }

  /// Remove a record from the cache without touching the remote.
  pub fn eject(&self, id: &str) {
    self.store().eject(id);
  }

  /// Discard all cached records, secondary buckets, and fetch cursors;
  /// the secondary-index skeleton is rebuilt from the schema.
  pub fn clear_cache(&self) {
    self.store().clear();
    self.cursors().clear();
  }

  /// Create a record remotely and cache the stored result. Decorators
  /// run first, filling generated fields the caller left out.
  pub async fn create(&self, mut record: Record) -> Result<Record> {
    for decorate in &self.config.decorators {
      decorate(&mut record);
    }
    let created = self
      .remote
      .create(record)
      .await
      .map_err(CacheError::fetch)?;
    self.observe(Observation::Upsert(created.clone()))?;
    Ok(created)
  }

  /// Update a record remotely and cache the stored result.
  pub async fn update(&self, record: Record) -> Result<Record> {
    record_id(&record, &self.config.id_field).ok_or(CacheError::MissingId)?;
    let updated = self
      .remote
      .update(record)
      .await
      .map_err(CacheError::fetch)?;
    self.observe(Observation::Upsert(updated.clone()))?;
    Ok(updated)
  }

  /// Delete a record remotely and eject it from the cache.
  pub async fn destroy(&self, id: &str) -> Result<()> {
    if id.is_empty() {
      return Err(CacheError::MissingId);
    }
    self.remote.destroy(id).await.map_err(CacheError::fetch)?;
    self.observe(Observation::Delete(id.to_string()))
  }

  // ==========================================================================
  // Sync
  // ==========================================================================

  /// The first remote record matching `filter`, cached on arrival.
  pub async fn find_one(&self, filter: &Map<String, Value>) -> Result<Option<Record>> {
    let options = FindOptions {
      page_size: Some(1),
      ..FindOptions::default()
    };
    let page = self
      .remote
      .find(filter, &options)
      .await
      .map_err(CacheError::fetch)?;
    let first = page.records.into_iter().next();
    if let Some(record) = &first {
      self.observe(Observation::Upsert(record.clone()))?;
    }
    Ok(first)
  }

  /// Fetch every page from the stored cursor (or the beginning) and
  /// record the final offset as the new cursor for this filter.
  ///
  /// A failed page aborts the loop: already-merged pages stay cached,
  /// the cursor stays at its last recorded offset, and the failure
  /// propagates.
  pub async fn cached_fetch(
    &self,
    filter: &Map<String, Value>,
    options: &FetchOptions,
  ) -> Result<Vec<Record>> {
    let key = filter_key(filter);
    let stored = self.cursors().get(&key);
    let start = options.offset.or(stored).unwrap_or_default();
    let (records, last) = self.fetch_loop(filter, start, options).await?;
    if self.cursors().advance(&key, last) {
      debug!(collection = %self.config.collection, %last, "cursor advanced");
    }
    Ok(records)
  }

  /// Like [`CacheEngine::cached_fetch`], but at most once per distinct
  /// filter: if a cursor already exists for it, returns an empty page
  /// set without issuing a request.
  pub async fn fetch_once(
    &self,
    filter: &Map<String, Value>,
    options: &FetchOptions,
  ) -> Result<Vec<Record>> {
    let key = filter_key(filter);
    if self.cursors().contains(&key) {
      return Ok(Vec::new());
    }
    self.cached_fetch(filter, options).await
  }

  /// Fetch every page from `options.offset` (or the beginning) without
  /// consulting or recording cursors. Returns the accumulated records
  /// and the last offset the source reported.
  pub async fn fetch_paged(
    &self,
    filter: &Map<String, Value>,
    options: &FetchOptions,
  ) -> Result<(Vec<Record>, Offset)> {
    let start = options.offset.unwrap_or_default();
    self.fetch_loop(filter, start, options).await
  }

  async fn fetch_loop(
    &self,
    filter: &Map<String, Value>,
    start: Offset,
    options: &FetchOptions,
  ) -> Result<(Vec<Record>, Offset)> {
    let mut offset = start;
    let mut records = Vec::new();
    loop {
      let find = FindOptions {
        offset: Some(offset),
        page_size: options.page_size,
        sort: options.sort.clone(),
      };
      let page = self
        .remote
        .find(filter, &find)
        .await
        .map_err(CacheError::fetch)?;
      let count = page.records.len();
      debug!(collection = %self.config.collection, %offset, count, "page fetched");

      // Merge before the next request so partial progress is visible
      if count > 0 {
        self.observe(Observation::UpsertMany(page.records.clone()))?;
        records.extend(page.records);
      }

      let advanced = matches!(page.offset, Some(next) if next > offset);
      if let Some(next) = page.offset {
        if next > offset {
          offset = next;
        }
      }
      let reached_page_size = options.page_size.map_or(true, |size| count >= size);
      if count == 0 || !advanced || !reached_page_size {
        return Ok((records, offset));
      }
    }
  }

  /// Batched lookup by id: deduplicates `ids`, optionally subtracts the
  /// ones already cached, fetches the rest in fixed-size `$in` chunks,
  /// and returns the concatenated results.
  pub async fn find_by_many(
    &self,
    ids: &[String],
    options: &FindByManyOptions,
  ) -> Result<Vec<Record>> {
    let mut seen = HashSet::new();
    let mut unique: Vec<&str> = ids
      .iter()
      .map(String::as_str)
      .filter(|id| !id.is_empty() && seen.insert(*id))
      .collect();
    if options.cached {
      let store = self.store();
      unique.retain(|id| store.get_by_id(id).is_none());
    }
    if unique.is_empty() {
      return Ok(Vec::new());
    }

    let field = options
      .field
      .clone()
      .unwrap_or_else(|| self.config.id_field.clone());
    let chunk_size = options.chunk_size.max(1);

    let requests = unique.chunks(chunk_size).map(|chunk| {
      let mut clause = Map::new();
      clause.insert(
        "$in".to_string(),
        Value::Array(chunk.iter().map(|id| Value::String((*id).to_string())).collect()),
      );
      let mut filter = Map::new();
      filter.insert(field.clone(), Value::Object(clause));
      async move {
        self
          .remote
          .find(&filter, &FindOptions::default())
          .await
          .map(|page| page.records)
      }
    });

    let chunks = future::try_join_all(requests)
      .await
      .map_err(CacheError::fetch)?;
    let records: Vec<Record> = chunks.into_iter().flatten().collect();
    self.observe(Observation::UpsertMany(records.clone()))?;
    Ok(records)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{generated_id, Schema};
  use crate::remote::{FindPage, RemoteResult};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn record(value: Value) -> Record {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected an object"),
    }
  }

  fn object(value: Value) -> Map<String, Value> {
    record(value)
  }

  /// Scripted remote: serves `records` one per page with `count-0`
  /// offsets, resolves `$in` filters against them, and counts calls.
  struct MockRemote {
    records: Vec<Record>,
    page_size: usize,
    find_calls: AtomicUsize,
    fail_after: Option<usize>,
  }

  impl MockRemote {
    fn new(records: Vec<Record>) -> Self {
      Self {
        records,
        page_size: 1,
        find_calls: AtomicUsize::new(0),
        fail_after: None,
      }
    }

    fn find_calls(&self) -> usize {
      self.find_calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl RemoteClient for MockRemote {
    async fn find(
      &self,
      filter: &Map<String, Value>,
      options: &FindOptions,
    ) -> RemoteResult<FindPage> {
      let call = self.find_calls.fetch_add(1, Ordering::SeqCst);
      if let Some(limit) = self.fail_after {
        if call >= limit {
          return Err("remote unavailable".into());
        }
      }

      // Chunked id lookup
      if let Some(Value::Object(clause)) = filter.get("id") {
        if let Some(Value::Array(ids)) = clause.get("$in") {
          let records = self
            .records
            .iter()
            .filter(|r| ids.contains(r.get("id").unwrap_or(&Value::Null)))
            .cloned()
            .collect();
          return Ok(FindPage {
            records,
            offset: None,
          });
        }
      }

      // Paged scan from the requested offset
      let from = match options.offset {
        Some(Offset::At { count, .. }) => count as usize,
        _ => 0,
      };
      let page: Vec<Record> = self
        .records
        .iter()
        .skip(from)
        .take(self.page_size)
        .cloned()
        .collect();
      let next = from + page.len();
      Ok(FindPage {
        records: page,
        offset: Some(Offset::at(next as u64, 0)),
      })
    }

    async fn create(&self, record: Record) -> RemoteResult<Record> {
      Ok(record)
    }

    async fn update(&self, record: Record) -> RemoteResult<Record> {
      Ok(record)
    }

    async fn destroy(&self, _id: &str) -> RemoteResult<()> {
      Ok(())
    }
  }

  fn persons() -> Vec<Record> {
    vec![
      record(json!({ "id": "a", "name": "John", "fatherId": "f1" })),
      record(json!({ "id": "b", "name": "Jane", "fatherId": "f1" })),
      record(json!({ "id": "c", "name": "Jim", "fatherId": "f2" })),
    ]
  }

  fn engine(remote: MockRemote) -> CacheEngine<MockRemote> {
    let schema = Schema::new(["name", "fatherId"]);
    CacheEngine::new(CollectionConfig::new("Person", schema), remote)
  }

  #[tokio::test]
  async fn paged_fetch_merges_every_page() {
    let engine = engine(MockRemote::new(persons()));
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };

    let fetched = engine.cached_fetch(&Map::new(), &options).await.unwrap();
    assert_eq!(fetched.len(), 3);
    assert_eq!(engine.cached_len(), 3);
    assert!(engine.get_by_id("b").is_some());

    // 3 full pages plus the short page that ends the loop
    assert_eq!(engine.remote.find_calls(), 4);

    let by_father = engine.get_many_by_index("fatherId", &json!("f1")).unwrap();
    assert_eq!(by_father.len(), 2);
  }

  #[tokio::test]
  async fn fetch_once_skips_after_the_first_fetch() {
    let engine = engine(MockRemote::new(persons()));
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };

    let first = engine.fetch_once(&Map::new(), &options).await.unwrap();
    assert_eq!(first.len(), 3);
    let calls = engine.remote.find_calls();

    let second = engine.fetch_once(&Map::new(), &options).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(engine.remote.find_calls(), calls, "no further requests");
  }

  #[tokio::test]
  async fn cached_fetch_resumes_from_the_cursor() {
    let engine = engine(MockRemote::new(persons()));
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };

    engine.cached_fetch(&Map::new(), &options).await.unwrap();
    // Cursor sits at the end of the stream; the resume fetch sees one
    // empty page and returns nothing new.
    let resumed = engine.cached_fetch(&Map::new(), &options).await.unwrap();
    assert!(resumed.is_empty());
  }

  #[tokio::test]
  async fn final_offset_is_strictly_after_start() {
    let engine = engine(MockRemote::new(persons()));
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };
    let (records, last) = engine.fetch_paged(&Map::new(), &options).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(last > Offset::Start);
    assert_eq!(last, Offset::at(3, 0));
  }

  #[tokio::test]
  async fn failed_page_keeps_merged_records_and_cursor() {
    let mut remote = MockRemote::new(persons());
    remote.fail_after = Some(2);
    let engine = engine(remote);
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };

    let err = engine.cached_fetch(&Map::new(), &options).await.unwrap_err();
    assert!(matches!(err, CacheError::Fetch(_)));
    // Two pages merged before the failure
    assert_eq!(engine.cached_len(), 2);
    // Cursor never recorded, so a retry starts from the beginning
    assert!(engine.cursors().is_empty());
  }

  #[tokio::test]
  async fn find_by_many_skips_cached_ids() {
    let engine = engine(MockRemote::new(persons()));
    engine
      .observe(Observation::Upsert(record(json!({ "id": "a", "name": "John" }))))
      .unwrap();

    let ids = vec!["a".to_string(), "a".to_string(), "c".to_string()];
    let options = FindByManyOptions {
      cached: true,
      ..FindByManyOptions::default()
    };
    let found = engine.find_by_many(&ids, &options).await.unwrap();

    // One remote lookup for the one uncached id
    assert_eq!(engine.remote.find_calls(), 1);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(&json!("c")));
    // The fetched record landed in the cache
    assert!(engine.get_by_id("c").is_some());
  }

  #[tokio::test]
  async fn find_by_many_with_unknown_id_returns_empty() {
    let engine = engine(MockRemote::new(persons()));
    engine
      .observe(Observation::Upsert(record(json!({ "id": "a" }))))
      .unwrap();
    let ids = vec!["a".to_string(), "a".to_string(), "missing".to_string()];
    let options = FindByManyOptions {
      cached: true,
      ..FindByManyOptions::default()
    };
    let found = engine.find_by_many(&ids, &options).await.unwrap();
    assert_eq!(engine.remote.find_calls(), 1);
    assert!(found.is_empty());
  }

  #[tokio::test]
  async fn find_by_many_without_ids_stays_local() {
    let engine = engine(MockRemote::new(persons()));
    let found = engine
      .find_by_many(&[], &FindByManyOptions::default())
      .await
      .unwrap();
    assert!(found.is_empty());
    assert_eq!(engine.remote.find_calls(), 0);
  }

  #[tokio::test]
  async fn create_decorates_and_caches() {
    let schema = Schema::new(["name", "fatherId"]);
    let config = CollectionConfig::new("Person", schema).with_decorator(generated_id("id"));
    let engine = CacheEngine::new(config, MockRemote::new(Vec::new()));

    let created = engine
      .create(record(json!({ "name": "New" })))
      .await
      .unwrap();
    let id = created.get("id").and_then(Value::as_str).unwrap();
    assert!(!id.is_empty());
    assert_eq!(engine.get_by_id(id).unwrap().get("name"), Some(&json!("New")));
  }

  #[tokio::test]
  async fn update_requires_an_id() {
    let engine = engine(MockRemote::new(Vec::new()));
    let err = engine
      .update(record(json!({ "name": "no id" })))
      .await
      .unwrap_err();
    assert!(matches!(err, CacheError::MissingId));
  }

  #[tokio::test]
  async fn destroy_ejects_from_the_cache() {
    let engine = engine(MockRemote::new(Vec::new()));
    engine
      .observe(Observation::Upsert(record(json!({ "id": "a", "fatherId": "f1" }))))
      .unwrap();
    engine.destroy("a").await.unwrap();
    assert!(engine.get_by_id("a").is_none());
    assert!(engine.get_many_by_index("fatherId", &json!("f1")).unwrap().is_empty());
  }

  #[tokio::test]
  async fn find_one_caches_the_first_match() {
    let engine = engine(MockRemote::new(persons()));
    let found = engine
      .find_one(&object(json!({ "name": "John" })))
      .await
      .unwrap();
    assert!(found.is_some());
    assert!(engine.get_by_id("a").is_some());
  }

  #[tokio::test]
  async fn sync_loop_logs_under_a_subscriber() {
    let _ = tracing_subscriber::fmt()
      .with_env_filter("syndex=debug")
      .with_test_writer()
      .try_init();

    let engine = engine(MockRemote::new(persons()));
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };
    // Emits the per-page and cursor-advance debug events
    let fetched = engine.cached_fetch(&Map::new(), &options).await.unwrap();
    assert_eq!(fetched.len(), 3);
  }

  #[tokio::test]
  async fn clear_cache_resets_records_and_cursors() {
    let engine = engine(MockRemote::new(persons()));
    let options = FetchOptions {
      page_size: Some(1),
      ..FetchOptions::default()
    };
    engine.cached_fetch(&Map::new(), &options).await.unwrap();
    assert!(engine.cached_len() > 0);

    engine.clear_cache();
    assert_eq!(engine.cached_len(), 0);
    assert!(engine.cursors().is_empty());

    // A fetch-once after clear issues requests again
    let refetched = engine.fetch_once(&Map::new(), &options).await.unwrap();
    assert_eq!(refetched.len(), 3);
  }
}
