//! Error type for `roster-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// A stored column could not be turned back into its domain type.
  #[error("cannot decode {column}: {reason}")]
  Decode { column: &'static str, reason: String },

  #[error("class not found: {0}")]
  ClassNotFound(i64),

  #[error("event not found: {0}")]
  EventNotFound(i64),

  #[error("override not found: {0}")]
  OverrideNotFound(i64),
}

impl Error {
  pub(crate) fn decode(column: &'static str, reason: impl ToString) -> Self {
    Self::Decode { column, reason: reason.to_string() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
