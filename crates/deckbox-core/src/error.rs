//! Error types for deckbox-core

use thiserror::Error;

use crate::models::{ChangeId, EntityKind};

/// Result type alias using deckbox-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in deckbox-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage fault (never retried automatically)
    #[error(transparent)]
    Storage(#[from] StorageFault),

    /// Remote store unreachable or timed out; retried on the next sync pass
    #[error("Network error: {0}")]
    Network(String),

    /// Remote store rejected the credentials
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Entity not found in the local store
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// No ledger entry with this id
    #[error("Pending change not found: {0}")]
    UnknownChange(ChangeId),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<libsql::Error> for Error {
    fn from(error: libsql::Error) -> Self {
        Self::Storage(error.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Storage(error.into())
    }
}

/// Faults raised by the local store.
#[derive(Error, Debug)]
pub enum StorageFault {
    /// The target collection was never declared
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The collection has no index with this name
    #[error("Unknown index '{index}' on collection '{collection}'")]
    UnknownIndex { collection: String, index: String },

    /// Storage quota exceeded; the whole batch was rolled back
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(String),
}

impl From<libsql::Error> for StorageFault {
    fn from(error: libsql::Error) -> Self {
        let message = error.to_string();
        if is_disk_full(&message) {
            Self::QuotaExceeded(message)
        } else {
            Self::Database(message)
        }
    }
}

fn is_disk_full(message: &str) -> bool {
    message
        .to_ascii_lowercase()
        .contains("database or disk is full")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_full_maps_to_quota_fault() {
        assert!(is_disk_full("SQLite failure: `database or disk is full`"));
        assert!(!is_disk_full("SQLite failure: `no such table: records`"));
    }

    #[test]
    fn not_found_renders_kind_and_id() {
        let error = Error::not_found(EntityKind::Card, "abc");
        assert_eq!(error.to_string(), "card not found: abc");
    }
}
