//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::EntityKind;
use super::ids::ConflictId;

/// How a conflict was settled. Unsynced local work always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOutcome {
    /// The local edit was kept and re-queued over a remote update
    KeptLocalEdit,
    /// A queued local delete was kept over a remote update
    KeptLocalDelete,
    /// A locally edited entity was restored over a remote deletion
    RestoredDeleted,
}

impl fmt::Display for ConflictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeptLocalEdit => "kept-local-edit",
            Self::KeptLocalDelete => "kept-local-delete",
            Self::RestoredDeleted => "restored-deleted",
        })
    }
}

/// Recorded sync conflict resolved during a download phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict record identifier
    pub id: ConflictId,
    /// Entity kind involved in the conflict
    pub kind: EntityKind,
    /// Entity involved in the conflict
    pub entity_id: String,
    /// Local copy's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Incoming remote timestamp
    pub remote_updated_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
    pub outcome: ConflictOutcome,
}
