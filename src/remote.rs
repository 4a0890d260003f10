//! Boundary with the remote collection source.
//!
//! The engine owns no transport. Callers implement [`RemoteClient`] over
//! whatever wire they have; the engine only requires that `find` report
//! the source's position after each page as an [`Offset`].

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::offset::Offset;
use crate::record::Record;

/// Opaque transport failure. The engine wraps it, never inspects it.
pub type RemoteError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Options for a single page request.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
  /// Position to resume from; `None` means the source's default
  pub offset: Option<Offset>,
  /// Upper bound on records per page, when the source honors one
  pub page_size: Option<usize>,
  /// Sort expression, passed through opaquely
  pub sort: Option<String>,
}

/// One page of a `find` response.
#[derive(Debug, Clone, Default)]
pub struct FindPage {
  pub records: Vec<Record>,
  /// Source position after this page, when the source reports one
  pub offset: Option<Offset>,
}

/// Capability set of the remote collection: query plus the three
/// mutations. One implementation per collection.
#[async_trait]
pub trait RemoteClient: Send + Sync {
  /// Fetch records matching a declarative filter.
  async fn find(&self, filter: &Map<String, Value>, options: &FindOptions)
    -> RemoteResult<FindPage>;

  /// Create a record, returning it as stored (with injected fields).
  async fn create(&self, record: Record) -> RemoteResult<Record>;

  /// Update a record, returning it as stored.
  async fn update(&self, record: Record) -> RemoteResult<Record>;

  /// Delete a record by id.
  async fn destroy(&self, id: &str) -> RemoteResult<()>;
}
