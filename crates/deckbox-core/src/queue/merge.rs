//! Collapsing rules for the pending-change ledger
//!
//! The ledger keeps at most one entry per entity. Folding a new change into
//! an existing entry is a pure function of the two operations, so it is kept
//! here apart from any storage I/O.

use crate::models::{Change, ChangeId, ChangeOp, PendingChange};

/// How an incoming operation folds into an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collapse {
    /// Rewrite the entry with this operation and the incoming payload
    Replace(ChangeOp),
    /// The entity never has to reach the remote side; remove the entry
    Drop,
    /// Nothing to do
    Keep,
}

/// Fold `incoming` into an entry that already carries `existing`.
pub const fn collapse(existing: ChangeOp, incoming: ChangeOp) -> Collapse {
    match (existing, incoming) {
        (ChangeOp::Create, ChangeOp::Delete) => Collapse::Drop,
        (ChangeOp::Delete, ChangeOp::Delete) => Collapse::Keep,
        (ChangeOp::Create | ChangeOp::Update, ChangeOp::Create) => {
            Collapse::Replace(ChangeOp::Create)
        }
        (ChangeOp::Create, ChangeOp::Update) => Collapse::Replace(ChangeOp::Create),
        (ChangeOp::Update, ChangeOp::Update)
        | (ChangeOp::Delete, ChangeOp::Create | ChangeOp::Update) => {
            Collapse::Replace(ChangeOp::Update)
        }
        (ChangeOp::Update, ChangeOp::Delete) => Collapse::Replace(ChangeOp::Delete),
    }
}

/// Result of merging a change into the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    /// No entry existed; store this new one
    Insert(PendingChange),
    /// The existing entry was rewritten in place
    Rewrite(PendingChange),
    /// The existing entry cancels out and must be removed
    Remove(ChangeId),
    /// The ledger already expresses this change
    Unchanged,
}

/// Merge `incoming` into the ledger's current entry for the same entity.
///
/// A rewritten entry keeps its identity, enqueue time, sequence and failure
/// history; only the operation and payload move forward.
pub fn merge(
    existing: Option<PendingChange>,
    incoming: Change,
    enqueued_at: i64,
    sequence: u64,
) -> Merge {
    let Some(mut entry) = existing else {
        return Merge::Insert(PendingChange::from_change(incoming, enqueued_at, sequence));
    };

    match collapse(entry.op, incoming.op) {
        Collapse::Replace(op) => {
            entry.op = op;
            entry.payload = match op {
                ChangeOp::Delete => None,
                ChangeOp::Create | ChangeOp::Update => incoming.payload,
            };
            entry.revision = entry.revision.wrapping_add(1);
            Merge::Rewrite(entry)
        }
        Collapse::Drop => Merge::Remove(entry.id),
        Collapse::Keep => Merge::Unchanged,
    }
}
