//! An indexed, incrementally synchronized in-memory mirror of a remote
//! collection.
//!
//! This crate provides the client-side cache engine for a
//! collection-oriented remote API:
//! - a primary index (id to record) with last-write-wins replacement
//! - secondary one-to-many indices derived from foreign-key-shaped
//!   schema fields (names ending in `Id`), kept correct under arbitrary
//!   insert/update/delete sequences
//! - declarative filters compiled into predicates over cached records
//! - incremental, offset-paged synchronization that remembers a cursor
//!   per filter and never re-fetches already-seen data
//!
//! The engine owns no transport and no persistence: callers implement
//! [`RemoteClient`] over their wire, and the mirror lives for the
//! lifetime of the [`CacheEngine`].
//!
//! # Example
//!
//! ```ignore
//! let schema = Schema::new(["name", "fatherId"]);
//! let config = CollectionConfig::new("Person", schema)
//!   .with_decorator(generated_id("id"));
//! let persons = CacheEngine::new(config, my_remote);
//!
//! // Sync once per filter, then read from the mirror
//! persons.fetch_once(&filter, &FetchOptions::default()).await?;
//! let children = persons.get_many_by_index("fatherId", &json!("42"))?;
//! ```

mod config;
mod engine;
mod error;
mod index;
mod offset;
mod predicate;
mod record;
mod remote;
mod sync;

pub use config::{created_at, generated_id, CollectionConfig, RecordDecorator, Schema};
pub use engine::{CacheEngine, FetchOptions, FindByManyOptions, Observation};
pub use error::{CacheError, Result};
pub use index::IndexStore;
pub use offset::{Offset, ParseOffsetError};
pub use predicate::{compile, Filter, PredicateFn};
pub use record::{record_id, IndexKey, Record};
pub use remote::{FindOptions, FindPage, RemoteClient, RemoteError, RemoteResult};
pub use sync::{filter_key, FetchCursors};
