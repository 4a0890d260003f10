//! Error taxonomy for cache and sync operations.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors raised by the cache engine.
///
/// All variants surface synchronously at the call that detects them;
/// nothing is swallowed internally.
#[derive(Debug, Error)]
pub enum CacheError {
  /// A record offered to the cache lacks a non-empty id value.
  #[error("record is missing an id")]
  MissingId,

  /// Lookup against a field that never got a secondary index.
  #[error("field {field:?} is not indexed")]
  IndexNotDefined { field: String },

  /// A filter shape the predicate compiler refuses, such as a bare
  /// array given as a field's equality value.
  #[error("unsupported predicate for field {field:?}")]
  UnsupportedPredicate { field: String },

  /// An operator clause with an unrecognized operator key.
  #[error("unknown operator {operator:?} for field {field:?}")]
  UnknownOperator { field: String, operator: String },

  /// A remote page or mutation request failed. The engine does not
  /// retry; cache state stays as of the last successfully merged page.
  #[error("fetch failed: {0}")]
  Fetch(#[source] RemoteError),
}

impl CacheError {
  /// Wrap a transport-layer failure.
  pub fn fetch(err: impl Into<RemoteError>) -> Self {
    CacheError::Fetch(err.into())
  }
}

pub type Result<T> = std::result::Result<T, CacheError>;
