//! Pending-change ledger entries

use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{Entity, EntityKind};
use super::ids::ChangeId;

/// Mutation carried by a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A mutation to record in the ledger, before collapsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: EntityKind,
    pub entity_id: String,
    pub op: ChangeOp,
    /// Record state to send; `None` for deletes
    pub payload: Option<Entity>,
}

impl Change {
    pub fn create(entity: impl Into<Entity>) -> Self {
        Self::with_payload(ChangeOp::Create, entity.into())
    }

    pub fn update(entity: impl Into<Entity>) -> Self {
        Self::with_payload(ChangeOp::Update, entity.into())
    }

    pub fn delete(kind: EntityKind, entity_id: impl ToString) -> Self {
        Self {
            kind,
            entity_id: entity_id.to_string(),
            op: ChangeOp::Delete,
            payload: None,
        }
    }

    fn with_payload(op: ChangeOp, entity: Entity) -> Self {
        Self {
            kind: entity.kind(),
            entity_id: entity.id(),
            op,
            payload: Some(entity),
        }
    }

    /// Index key identifying the target entity.
    pub fn target_key(&self) -> String {
        target_key(self.kind, &self.entity_id)
    }
}

/// One not-yet-acknowledged mutation, as persisted in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Entry identifier
    pub id: ChangeId,
    /// Target entity kind
    pub kind: EntityKind,
    /// Target entity identifier
    pub entity_id: String,
    /// `"{kind}:{entity_id}"`, indexed for collapsing lookups
    pub target: String,
    /// Operation to replay remotely
    pub op: ChangeOp,
    /// Record state to send; `None` for deletes
    pub payload: Option<Entity>,
    /// Original enqueue timestamp (Unix ms), kept across collapses
    pub enqueued_at: i64,
    /// FIFO tie-breaker for entries sharing a millisecond
    pub sequence: u64,
    /// Bumped each time collapsing rewrites the entry
    pub revision: u32,
    /// Failed upload attempts
    pub attempts: u32,
    /// Last upload error
    pub last_error: Option<String>,
    /// Set once attempts reach the configured threshold
    #[serde(default)]
    pub stuck: bool,
}

impl PendingChange {
    pub(crate) fn from_change(change: Change, enqueued_at: i64, sequence: u64) -> Self {
        Self {
            id: ChangeId::new(),
            target: change.target_key(),
            kind: change.kind,
            entity_id: change.entity_id,
            op: change.op,
            payload: change.payload,
            enqueued_at,
            sequence,
            revision: 0,
            attempts: 0,
            last_error: None,
            stuck: false,
        }
    }
}

pub(crate) fn target_key(kind: EntityKind, entity_id: &str) -> String {
    format!("{kind}:{entity_id}")
}
