//! Pending-change queue
//!
//! A durable, FIFO ledger of mutations the remote store has not acknowledged
//! yet. Entries are only ever removed on explicit confirmation, so a process
//! that dies mid-sync resumes from whatever is still in here.
//!
//! The queue does not lock: callers that mix reads and writes (the storage
//! service) serialize access themselves.

mod merge;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use merge::{collapse, merge, Collapse, Merge};

use crate::models::{target_key, Change, ChangeId, EntityKind, PendingChange};
use crate::store::collections::PENDING_CHANGES;
use crate::store::{LocalStore, StoreResult, WriteBatch};
use crate::util::now_millis;

/// Attempts after which an entry is flagged stuck when no threshold is configured
pub const DEFAULT_STUCK_AFTER: u32 = 5;

/// Ledger of not-yet-acknowledged mutations, persisted in the local store
#[derive(Clone)]
pub struct PendingChangeQueue {
    store: LocalStore,
    sequence: Arc<AtomicU64>,
    stuck_after: u32,
}

impl PendingChangeQueue {
    /// Open the queue over `store`, resuming the FIFO sequence from disk.
    ///
    /// `stuck_after` of zero disables stuck flagging.
    pub async fn open(store: LocalStore, stuck_after: u32) -> StoreResult<Self> {
        let entries: Vec<PendingChange> = store.get_all(PENDING_CHANGES).await?;
        let last = entries
            .iter()
            .map(|entry| entry.sequence)
            .max()
            .unwrap_or(0);
        if !entries.is_empty() {
            tracing::debug!(
                "Resuming pending-change queue with {} entries",
                entries.len()
            );
        }
        Ok(Self {
            store,
            sequence: Arc::new(AtomicU64::new(last)),
            stuck_after,
        })
    }

    pub const fn stuck_after(&self) -> u32 {
        self.stuck_after
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Look up an entry by id.
    pub async fn get(&self, id: &ChangeId) -> StoreResult<Option<PendingChange>> {
        self.store.get(PENDING_CHANGES, &id.as_str()).await
    }

    /// The entry targeting an entity, if any.
    pub async fn entry_for(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> StoreResult<Option<PendingChange>> {
        let entries: Vec<PendingChange> = self
            .store
            .get_by_index(PENDING_CHANGES, "target", target_key(kind, entity_id))
            .await?;
        Ok(entries.into_iter().next())
    }

    /// Merge `change` into the ledger and add the resulting write to `batch`.
    ///
    /// Nothing is persisted until the caller applies the batch, so the ledger
    /// write commits together with the domain write. Stage each entity at most
    /// once per batch: staging reads the committed ledger, not the batch.
    pub async fn stage(&self, batch: &mut WriteBatch, change: Change) -> StoreResult<Merge> {
        let existing = self.entry_for(change.kind, &change.entity_id).await?;
        let merged = merge(existing, change, now_millis(), self.next_sequence());
        Self::stage_merged(batch, &merged)?;
        Ok(merged)
    }

    /// Like [`Self::stage`], but a rewritten entry moves to the back of the
    /// queue, behind everything staged before it.
    ///
    /// For entities that now depend on a record queued after them, such as
    /// the cards of a deck restored from a remote delete.
    pub async fn stage_behind(&self, batch: &mut WriteBatch, change: Change) -> StoreResult<Merge> {
        let existing = self.entry_for(change.kind, &change.entity_id).await?;
        let enqueued_at = now_millis();
        let sequence = self.next_sequence();
        let mut merged = merge(existing, change, enqueued_at, sequence);
        if let Merge::Rewrite(entry) = &mut merged {
            entry.enqueued_at = enqueued_at;
            entry.sequence = sequence;
        }
        Self::stage_merged(batch, &merged)?;
        Ok(merged)
    }

    fn stage_merged(batch: &mut WriteBatch, merged: &Merge) -> StoreResult<()> {
        match merged {
            Merge::Insert(entry) | Merge::Rewrite(entry) => {
                batch.put(PENDING_CHANGES, entry.id.as_str(), entry)?;
            }
            Merge::Remove(id) => {
                batch.delete(PENDING_CHANGES, id.as_str());
            }
            Merge::Unchanged => {}
        }
        Ok(())
    }

    /// Merge `change` into the ledger and persist it immediately.
    pub async fn enqueue(&self, change: Change) -> StoreResult<Merge> {
        let mut batch = WriteBatch::new();
        let merged = self.stage(&mut batch, change).await?;
        self.store.apply(batch).await?;
        Ok(merged)
    }

    /// Every entry in FIFO order of original enqueue time.
    pub async fn peek_pending(&self) -> StoreResult<Vec<PendingChange>> {
        let mut entries: Vec<PendingChange> =
            self.store.scan_index(PENDING_CHANGES, "enqueued_at").await?;
        entries.sort_by_key(|entry| (entry.enqueued_at, entry.sequence));
        Ok(entries)
    }

    /// Number of queued entries.
    pub async fn len(&self) -> StoreResult<u64> {
        self.store.count(PENDING_CHANGES).await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Delete a confirmed entry.
    pub async fn remove(&self, id: &ChangeId) -> StoreResult<()> {
        self.store.delete(PENDING_CHANGES, id.as_str()).await
    }

    /// Add the deletion of a confirmed entry to `batch`.
    pub fn stage_remove(batch: &mut WriteBatch, id: &ChangeId) {
        batch.delete(PENDING_CHANGES, id.as_str());
    }

    /// Stage removal of `entry` if the ledger still holds the acknowledged
    /// revision.
    ///
    /// Returns `false` when a local edit rewrote the entry after it was
    /// uploaded (the entry must stay queued) or when it is already gone.
    pub async fn stage_acknowledge(
        &self,
        batch: &mut WriteBatch,
        entry: &PendingChange,
    ) -> StoreResult<bool> {
        match self.get(&entry.id).await? {
            Some(stored) if stored.revision == entry.revision => {
                Self::stage_remove(batch, &entry.id);
                Ok(true)
            }
            Some(_) => {
                tracing::debug!(
                    "Pending {} of {} {} changed during upload; keeping it queued",
                    entry.op,
                    entry.kind,
                    entry.entity_id
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Remove `entry` after the remote store confirmed it, unless it was
    /// rewritten in the meantime.
    pub async fn acknowledge(&self, entry: &PendingChange) -> StoreResult<bool> {
        let mut batch = WriteBatch::new();
        let removed = self.stage_acknowledge(&mut batch, entry).await?;
        self.store.apply(batch).await?;
        Ok(removed)
    }

    /// Count a failed upload attempt without dropping the entry.
    ///
    /// Returns the updated entry, or `None` if it was already confirmed.
    pub async fn record_failure(
        &self,
        id: &ChangeId,
        error: &str,
    ) -> StoreResult<Option<PendingChange>> {
        let Some(mut entry) = self.get(id).await? else {
            return Ok(None);
        };

        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_error = Some(error.to_string());

        if self.stuck_after > 0 && entry.attempts >= self.stuck_after && !entry.stuck {
            entry.stuck = true;
            tracing::warn!(
                "Pending {} of {} {} is stuck after {} attempts: {}",
                entry.op,
                entry.kind,
                entry.entity_id,
                entry.attempts,
                error
            );
        }

        self.store
            .put(PENDING_CHANGES, entry.id.as_str(), &entry)
            .await?;
        Ok(Some(entry))
    }

    /// Entries flagged stuck by the failure policy, in FIFO order.
    pub async fn stuck(&self) -> StoreResult<Vec<PendingChange>> {
        Ok(self
            .peek_pending()
            .await?
            .into_iter()
            .filter(|entry| entry.stuck)
            .collect())
    }
}
