//! Storage error types.

use thiserror::Error;

/// Errors from storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O or transaction failure. The transaction was rolled back.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A record with this identifier already exists.
    #[error("{entity} {id} already exists")]
    Conflict {
        /// Kind of record
        entity: &'static str,
        /// Identifier that collided
        id: u64,
    },

    /// The referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Identifier that was looked up
        id: u64,
    },

    /// A write would break a data-model invariant. Nothing was written.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl StorageError {
    /// Returns true if the operation may succeed on retry.
    ///
    /// I/O failures can be transient. A conflict can be retried with a fresh
    /// identifier. Everything else points at corrupt data or a caller bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Conflict { .. })
    }
}
