//! Remote store seam
//!
//! The sync engine talks to the server only through [`RemoteStore`]. Two
//! implementations ship with the crate: [`HttpRemoteStore`] for a REST backend
//! and [`MemoryRemoteStore`] for tests and embedders' tests.

mod http;
mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpRemoteStore;
pub use memory::{MemoryRemoteStore, RemoteCall, RemoteOp};

use crate::error::Error;
use crate::models::{Entity, EntityKind, OwnerId};

/// Classified failure of a remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection refused, reset, or a transient server status
    #[error("Remote unreachable: {0}")]
    Network(String),
    /// No answer within the configured timeout
    #[error("Remote call timed out: {0}")]
    Timeout(String),
    /// The record does not exist remotely
    #[error("Remote record not found: {0}")]
    NotFound(String),
    /// The server refused the request
    #[error("Remote rejected the request: {0}")]
    Rejected(String),
    /// Credentials missing, expired, or refused
    #[error("Remote authentication failed: {0}")]
    Auth(String),
}

impl RemoteError {
    /// Whether the failure says the link itself is down.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Auth(message) => Self::Auth(message),
            other => Self::Network(other.to_string()),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Marker for a record deleted remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub kind: EntityKind,
    pub id: String,
    /// Deletion timestamp (Unix ms)
    pub updated_at: i64,
}

/// One remotely changed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "lowercase")]
pub enum RemoteRecord {
    Live(Entity),
    Deleted(Tombstone),
}

impl RemoteRecord {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Live(entity) => entity.kind(),
            Self::Deleted(tombstone) => tombstone.kind,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Self::Live(entity) => entity.id(),
            Self::Deleted(tombstone) => tombstone.id.clone(),
        }
    }

    pub const fn updated_at(&self) -> i64 {
        match self {
            Self::Live(entity) => entity.updated_at(),
            Self::Deleted(tombstone) => tombstone.updated_at,
        }
    }

    /// Apply order that keeps cards behind their decks: live decks, live
    /// cards, card tombstones, deck tombstones.
    pub const fn apply_rank(&self) -> u8 {
        match (self, self.kind()) {
            (Self::Live(_), EntityKind::Deck) => 0,
            (Self::Live(_), EntityKind::Card) => 1,
            (Self::Deleted(_), EntityKind::Card) => 2,
            (Self::Deleted(_), EntityKind::Deck) => 3,
        }
    }
}

/// Result of a delta fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChanges {
    pub records: Vec<RemoteRecord>,
    /// Server high-water mark to resume from, when the server reports one
    #[serde(default)]
    pub checkpoint: Option<i64>,
}

/// Network-backed CRUD for decks and cards
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store a new record. Must be an idempotent upsert: a retried create of
    /// a record the server already holds succeeds.
    async fn create_remote(&self, owner: &OwnerId, entity: &Entity) -> RemoteResult<()>;

    /// Replace the remote copy of a record with `patch`.
    async fn update_remote(
        &self,
        owner: &OwnerId,
        kind: EntityKind,
        id: &str,
        patch: &Entity,
    ) -> RemoteResult<()>;

    /// Delete a record.
    async fn delete_remote(&self, owner: &OwnerId, kind: EntityKind, id: &str) -> RemoteResult<()>;

    /// Records changed after `checkpoint`, or everything when it is `None`.
    async fn fetch_changed_since(
        &self,
        owner: &OwnerId,
        checkpoint: Option<i64>,
    ) -> RemoteResult<RemoteChanges>;
}

/// Source of the signed-in owner's identity
pub trait Session: Send + Sync {
    /// `None` when nobody is signed in.
    fn owner_id(&self) -> Option<OwnerId>;
}

impl Session for OwnerId {
    fn owner_id(&self) -> Option<OwnerId> {
        Some(self.clone())
    }
}

impl Session for Option<OwnerId> {
    fn owner_id(&self) -> Option<OwnerId> {
        self.clone()
    }
}
