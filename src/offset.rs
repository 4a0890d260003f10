//! Explicitly ordered synchronization offset token.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Position in a collection's change stream.
///
/// `Start` (wire form `"*"`) orders strictly below every `At` token;
/// `At` tokens order by `(count, timestamp)`. The token is an
/// explicitly ordered type rather than a raw string so that paging
/// progress never depends on incidental lexicographic ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Offset {
  /// Beginning of the stream
  #[default]
  Start,
  At {
    count: u64,
    timestamp: u64,
  },
}

impl Offset {
  pub fn at(count: u64, timestamp: u64) -> Self {
    Offset::At { count, timestamp }
  }

  pub fn is_start(&self) -> bool {
    matches!(self, Offset::Start)
  }
}

/// A token that does not follow the wire conventions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed offset token {token:?}")]
pub struct ParseOffsetError {
  pub token: String,
}

impl FromStr for Offset {
  type Err = ParseOffsetError;

  /// Accepts `"*"`, a bare decimal count, or `"<count>-<timestamp>"`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s == "*" {
      return Ok(Offset::Start);
    }
    let malformed = || ParseOffsetError {
      token: s.to_string(),
    };
    let (count, timestamp) = match s.split_once('-') {
      Some((count, timestamp)) => (count, Some(timestamp)),
      None => (s, None),
    };
    let count = count.parse().map_err(|_| malformed())?;
    let timestamp = match timestamp {
      Some(t) => t.parse().map_err(|_| malformed())?,
      None => 0,
    };
    Ok(Offset::At { count, timestamp })
  }
}

impl fmt::Display for Offset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Offset::Start => f.write_str("*"),
      Offset::At { count, timestamp } => write!(f, "{count}-{timestamp}"),
    }
  }
}
