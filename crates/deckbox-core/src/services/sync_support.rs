//! Storage operations used by the sync coordinator: upload bookkeeping,
//! applying remote records, conflicts and checkpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::storage::{count_u32, next_order_index, StorageService};
use crate::error::{Error, Result};
use crate::models::{
    Card, Change, ChangeId, ChangeOp, ConflictId, ConflictOutcome, Deck, DeckId, Entity,
    EntityKind, OwnerId, PendingChange, SyncConflict,
};
use crate::queue::PendingChangeQueue;
use crate::remote::{RemoteRecord, Tombstone};
use crate::store::collections::{CARDS, DECKS, SYNC_CONFLICTS, SYNC_META};
use crate::store::WriteBatch;
use crate::sync::resolve::{resolve, Decision, LocalState};
use crate::util::now_millis;

/// What applying one remote record did locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteApply {
    /// The remote copy replaced or removed the local one
    Applied,
    /// The local copy already matched
    Unchanged,
    /// The local copy is newer and already synced; nothing to do
    KeptLocal,
    /// Unsynced local work won and was re-queued
    Conflict(SyncConflict),
    /// The record cannot be applied (a card whose deck does not exist)
    Skipped,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    owner_id: OwnerId,
    value: i64,
}

fn checkpoint_key(owner_id: &OwnerId) -> String {
    format!("checkpoint:{owner_id}")
}

fn put_entity(batch: &mut WriteBatch, entity: &Entity) -> Result<()> {
    match entity {
        Entity::Deck(deck) => batch.put(DECKS, deck.id.as_str(), deck)?,
        Entity::Card(card) => batch.put(CARDS, card.id.as_str(), card)?,
    };
    Ok(())
}

impl StorageService {
    /// Every unconfirmed change in upload order.
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>> {
        Ok(self.queue.peek_pending().await?)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        Ok(self.queue.len().await?)
    }

    /// Changes flagged stuck after repeated upload failures.
    pub async fn stuck_changes(&self) -> Result<Vec<PendingChange>> {
        Ok(self.queue.stuck().await?)
    }

    async fn load_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
        Ok(match kind {
            EntityKind::Deck => self.store.get::<Deck>(DECKS, id).await?.map(Entity::Deck),
            EntityKind::Card => self.store.get::<Card>(CARDS, id).await?.map(Entity::Card),
        })
    }

    /// Record that the remote store accepted `entry`.
    ///
    /// Removes the entry and marks the entity synced, unless a local edit
    /// rewrote the entry while it was in flight. Returns whether the entry was
    /// removed.
    pub async fn confirm_upload(&self, entry: &PendingChange) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::new();

        let removed = self.queue.stage_acknowledge(&mut batch, entry).await?;
        if removed {
            if let Some(mut entity) = self.load_entity(entry.kind, &entry.entity_id).await? {
                entity.set_sync_flags(true, false);
                put_entity(&mut batch, &entity)?;
            }
        } else if entry.op != ChangeOp::Delete
            && self.queue.get(&entry.id).await?.is_none()
            && self.load_entity(entry.kind, &entry.entity_id).await?.is_none()
        {
            // Deleted locally while the create was in flight: the delete
            // collapsed away, but the remote side now holds the record.
            tracing::debug!(
                "{} {} was deleted during upload; queueing remote delete",
                entry.kind,
                entry.entity_id
            );
            self.queue
                .stage(&mut batch, Change::delete(entry.kind, &entry.entity_id))
                .await?;
        }

        self.store.apply(batch).await?;
        Ok(removed)
    }

    /// Count a failed upload of `id`; the entry stays queued.
    pub async fn record_failure(
        &self,
        id: &ChangeId,
        error: &str,
    ) -> Result<Option<PendingChange>> {
        let _guard = self.write_lock.lock().await;
        Ok(self.queue.record_failure(id, error).await?)
    }

    /// Turn a queued update the remote store no longer holds into a create.
    ///
    /// The failed attempt is counted and the entry keeps its place. A remote
    /// delete fetched later in the pass then meets the local work still
    /// pending and restores it; without one, the next pass recreates the
    /// record.
    pub async fn requeue_as_create(&self, entry: &PendingChange, error: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(failed) = self.queue.record_failure(&entry.id, error).await? else {
            return Ok(());
        };
        if failed.op != ChangeOp::Update {
            return Ok(());
        }
        let Some(entity) = self.load_entity(entry.kind, &entry.entity_id).await? else {
            return Ok(());
        };

        let mut batch = WriteBatch::new();
        self.queue.stage(&mut batch, Change::create(entity)).await?;
        self.store.apply(batch).await?;
        tracing::debug!(
            "{} {} is missing remotely; queued as a create",
            entry.kind,
            entry.entity_id
        );
        Ok(())
    }

    /// Drop a queued change without uploading it.
    ///
    /// The local entity, if any, stays as it is but is no longer flagged
    /// pending. This is the only way an entry leaves the queue unconfirmed.
    pub async fn discard_change(&self, id: &ChangeId) -> Result<PendingChange> {
        let _guard = self.write_lock.lock().await;
        let entry = self
            .queue
            .get(id)
            .await?
            .ok_or(Error::UnknownChange(*id))?;

        let mut batch = WriteBatch::new();
        PendingChangeQueue::stage_remove(&mut batch, &entry.id);
        if let Some(mut entity) = self.load_entity(entry.kind, &entry.entity_id).await? {
            entity.set_sync_flags(false, false);
            put_entity(&mut batch, &entity)?;
        }
        self.store.apply(batch).await?;

        tracing::warn!(
            "Discarded pending {} of {} {} after {} attempts",
            entry.op,
            entry.kind,
            entry.entity_id,
            entry.attempts
        );
        Ok(entry)
    }

    /// Apply one record from a delta fetch.
    ///
    /// Each record is applied in its own batch; unsynced local work always
    /// wins and is re-queued.
    pub async fn apply_remote(&self, record: RemoteRecord) -> Result<RemoteApply> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::new();

        let outcome = match record {
            RemoteRecord::Live(Entity::Deck(deck)) => {
                self.apply_remote_deck(&mut batch, deck).await?
            }
            RemoteRecord::Live(Entity::Card(card)) => {
                self.apply_remote_card(&mut batch, card).await?
            }
            RemoteRecord::Deleted(tombstone) => match tombstone.kind {
                EntityKind::Card => self.apply_card_tombstone(&mut batch, &tombstone).await?,
                EntityKind::Deck => self.apply_deck_tombstone(&mut batch, &tombstone).await?,
            },
        };

        self.store.apply(batch).await?;
        Ok(outcome)
    }

    /// Conflict with a queued local delete of an entity the remote side
    /// still updates. The delete stays queued.
    fn queued_delete_conflict(
        batch: &mut WriteBatch,
        entry: Option<&PendingChange>,
        remote_updated_at: i64,
    ) -> Result<Option<RemoteApply>> {
        let Some(entry) = entry.filter(|entry| entry.op == ChangeOp::Delete) else {
            return Ok(None);
        };
        let conflict = stage_conflict(
            batch,
            entry.kind,
            &entry.entity_id,
            entry.enqueued_at,
            remote_updated_at,
            ConflictOutcome::KeptLocalDelete,
        )?;
        Ok(Some(RemoteApply::Conflict(conflict)))
    }

    async fn apply_remote_deck(
        &self,
        batch: &mut WriteBatch,
        mut remote: Deck,
    ) -> Result<RemoteApply> {
        let id = remote.id.as_str();
        let local = self.get_deck(&remote.id).await?;
        let entry = self.queue.entry_for(EntityKind::Deck, &id).await?;

        if local.is_none() {
            if let Some(conflict) =
                Self::queued_delete_conflict(batch, entry.as_ref(), remote.updated_at)?
            {
                return Ok(conflict);
            }
        }

        let state = local.as_ref().map(|deck| LocalState {
            updated_at: deck.updated_at,
            pending: deck.pending_changes || entry.is_some(),
        });
        let identical = local.as_ref().is_some_and(|deck| deck.same_content(&remote));

        match (resolve(state, remote.updated_at, identical), local) {
            (Decision::TakeRemote, _) => {
                remote.card_count = count_u32(self.cards_of(&remote.id).await?.len());
                remote.synced = true;
                remote.pending_changes = false;
                batch.put(DECKS, id, &remote)?;
                tracing::debug!("Took remote deck {}", remote.id);
                Ok(RemoteApply::Applied)
            }
            (Decision::KeepLocal { conflict: true }, Some(mut deck)) => {
                let local_updated_at = deck.updated_at;
                deck.supersede(remote.updated_at);
                batch.put(DECKS, id.clone(), &deck)?;
                self.queue.stage(batch, Change::update(deck)).await?;
                let conflict = stage_conflict(
                    batch,
                    EntityKind::Deck,
                    &id,
                    local_updated_at,
                    remote.updated_at,
                    ConflictOutcome::KeptLocalEdit,
                )?;
                Ok(RemoteApply::Conflict(conflict))
            }
            (Decision::Unchanged, _) => Ok(RemoteApply::Unchanged),
            (Decision::KeepLocal { .. }, _) => Ok(RemoteApply::KeptLocal),
        }
    }

    async fn apply_remote_card(
        &self,
        batch: &mut WriteBatch,
        mut remote: Card,
    ) -> Result<RemoteApply> {
        let id = remote.id.as_str();
        let local = self.get_card(&remote.id).await?;
        let entry = self.queue.entry_for(EntityKind::Card, &id).await?;

        if local.is_none() {
            if let Some(conflict) =
                Self::queued_delete_conflict(batch, entry.as_ref(), remote.updated_at)?
            {
                return Ok(conflict);
            }
        }

        let state = local.as_ref().map(|card| LocalState {
            updated_at: card.updated_at,
            pending: card.pending_changes || entry.is_some(),
        });
        let identical = local.as_ref().is_some_and(|card| card.same_content(&remote));

        match (resolve(state, remote.updated_at, identical), local) {
            (Decision::TakeRemote, local) => {
                let Some(mut deck) = self.get_deck(&remote.deck_id).await? else {
                    tracing::debug!(
                        "Skipping remote card {}: deck {} is not present locally",
                        remote.id,
                        remote.deck_id
                    );
                    return Ok(RemoteApply::Skipped);
                };

                let previous_deck = local.as_ref().map(|card| card.deck_id);
                let joins_deck = previous_deck != Some(remote.deck_id);
                if joins_deck {
                    let count = self.cards_of(&deck.id).await?.len() + 1;
                    deck.card_count = count_u32(count);
                    batch.put(DECKS, deck.id.as_str(), &deck)?;
                }
                if let Some(old_deck_id) = previous_deck.filter(|old| *old != remote.deck_id) {
                    self.stage_recount(batch, &old_deck_id, 1).await?;
                }

                remote.synced = true;
                remote.pending_changes = false;
                batch.put(CARDS, id, &remote)?;
                tracing::debug!("Took remote card {}", remote.id);
                Ok(RemoteApply::Applied)
            }
            (Decision::KeepLocal { conflict: true }, Some(mut card)) => {
                let local_updated_at = card.updated_at;
                card.supersede(remote.updated_at);
                batch.put(CARDS, id.clone(), &card)?;
                self.queue.stage(batch, Change::update(card)).await?;
                let conflict = stage_conflict(
                    batch,
                    EntityKind::Card,
                    &id,
                    local_updated_at,
                    remote.updated_at,
                    ConflictOutcome::KeptLocalEdit,
                )?;
                Ok(RemoteApply::Conflict(conflict))
            }
            (Decision::Unchanged, _) => Ok(RemoteApply::Unchanged),
            (Decision::KeepLocal { .. }, _) => Ok(RemoteApply::KeptLocal),
        }
    }

    /// Write `deck_id`'s cached count after `removed` of its cards leave.
    async fn stage_recount(
        &self,
        batch: &mut WriteBatch,
        deck_id: &DeckId,
        removed: usize,
    ) -> Result<()> {
        if let Some(mut deck) = self.get_deck(deck_id).await? {
            let remaining = self.cards_of(deck_id).await?.len().saturating_sub(removed);
            deck.card_count = count_u32(remaining);
            batch.put(DECKS, deck.id.as_str(), &deck)?;
        }
        Ok(())
    }

    async fn apply_card_tombstone(
        &self,
        batch: &mut WriteBatch,
        tombstone: &Tombstone,
    ) -> Result<RemoteApply> {
        let local: Option<Card> = self.store.get(CARDS, &tombstone.id).await?;
        let entry = self.queue.entry_for(EntityKind::Card, &tombstone.id).await?;

        let Some(mut card) = local else {
            // Already gone here; a queued delete is now moot
            if let Some(entry) = entry {
                PendingChangeQueue::stage_remove(batch, &entry.id);
            }
            return Ok(RemoteApply::Unchanged);
        };

        let state = LocalState {
            updated_at: card.updated_at,
            pending: card.pending_changes || entry.is_some(),
        };
        match resolve(Some(state), tombstone.updated_at, false) {
            Decision::KeepLocal { conflict: true } => {
                card.supersede(tombstone.updated_at);
                batch.put(CARDS, tombstone.id.clone(), &card)?;
                // The deleting device lowered the remote count; send ours back
                if let Some(mut deck) = self.get_deck(&card.deck_id).await? {
                    deck.touch();
                    batch.put(DECKS, deck.id.as_str(), &deck)?;
                    self.queue.stage(batch, Change::update(deck)).await?;
                }
                self.queue.stage(batch, Change::create(card)).await?;
                let conflict = stage_conflict(
                    batch,
                    EntityKind::Card,
                    &tombstone.id,
                    state.updated_at,
                    tombstone.updated_at,
                    ConflictOutcome::RestoredDeleted,
                )?;
                Ok(RemoteApply::Conflict(conflict))
            }
            Decision::KeepLocal { conflict: false } => Ok(RemoteApply::KeptLocal),
            Decision::TakeRemote | Decision::Unchanged => {
                batch.delete(CARDS, tombstone.id.clone());
                self.stage_recount(batch, &card.deck_id, 1).await?;
                tracing::debug!("Removed card {} deleted remotely", tombstone.id);
                Ok(RemoteApply::Applied)
            }
        }
    }

    async fn apply_deck_tombstone(
        &self,
        batch: &mut WriteBatch,
        tombstone: &Tombstone,
    ) -> Result<RemoteApply> {
        let local: Option<Deck> = self.store.get(DECKS, &tombstone.id).await?;
        let entry = self.queue.entry_for(EntityKind::Deck, &tombstone.id).await?;

        let Some(mut deck) = local else {
            if let Some(entry) = entry {
                PendingChangeQueue::stage_remove(batch, &entry.id);
            }
            return Ok(RemoteApply::Unchanged);
        };

        let cards = self.cards_of(&deck.id).await?;
        let mut card_pending = false;
        for card in &cards {
            if card.pending_changes
                || self
                    .queue
                    .entry_for(EntityKind::Card, &card.id.as_str())
                    .await?
                    .is_some()
            {
                card_pending = true;
                break;
            }
        }

        let state = LocalState {
            updated_at: deck.updated_at,
            pending: deck.pending_changes || entry.is_some() || card_pending,
        };
        match resolve(Some(state), tombstone.updated_at, false) {
            Decision::KeepLocal { conflict: true } => {
                // Restore the whole deck so no card is left without its deck
                deck.supersede(tombstone.updated_at);
                batch.put(DECKS, tombstone.id.clone(), &deck)?;
                self.queue.stage(batch, Change::create(deck)).await?;
                for mut card in cards {
                    card.supersede(tombstone.updated_at);
                    batch.put(CARDS, card.id.as_str(), &card)?;
                    self.queue.stage_behind(batch, Change::create(card)).await?;
                }
                let conflict = stage_conflict(
                    batch,
                    EntityKind::Deck,
                    &tombstone.id,
                    state.updated_at,
                    tombstone.updated_at,
                    ConflictOutcome::RestoredDeleted,
                )?;
                Ok(RemoteApply::Conflict(conflict))
            }
            Decision::KeepLocal { conflict: false } => Ok(RemoteApply::KeptLocal),
            Decision::TakeRemote | Decision::Unchanged => {
                for card in &cards {
                    batch.delete(CARDS, card.id.as_str());
                }
                batch.delete(DECKS, tombstone.id.clone());
                tracing::debug!(
                    "Removed deck {} and {} cards deleted remotely",
                    tombstone.id,
                    cards.len()
                );
                Ok(RemoteApply::Applied)
            }
        }
    }

    /// Resolve order-index collisions in a deck after remote cards landed.
    ///
    /// In each collision the card already agreed with the remote side keeps
    /// the slot; the others move to the end of the deck and are queued.
    /// Returns the number of cards moved.
    pub async fn settle_order(&self, deck_id: &DeckId) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cards = self.cards_of(deck_id).await?;

        let mut slots: BTreeMap<u32, Vec<Card>> = BTreeMap::new();
        for card in &cards {
            slots.entry(card.order_index).or_default().push(card.clone());
        }

        let mut next = next_order_index(&cards);
        let mut batch = WriteBatch::new();
        let mut moved = 0;
        for mut clashing in slots.into_values().filter(|slot| slot.len() > 1) {
            let keeper = clashing
                .iter()
                .position(|card| !card.pending_changes)
                .unwrap_or(0);
            clashing.remove(keeper);
            for mut card in clashing {
                card.order_index = next;
                next = next.saturating_add(1);
                card.touch();
                batch.put(CARDS, card.id.as_str(), &card)?;
                self.queue.stage(&mut batch, Change::update(card)).await?;
                moved += 1;
            }
        }

        if moved > 0 {
            self.store.apply(batch).await?;
            tracing::debug!("Moved {moved} colliding cards to the end of deck {deck_id}");
        }
        Ok(moved)
    }

    /// Recorded conflicts, newest first.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let conflicts: Vec<SyncConflict> =
            self.store.scan_index(SYNC_CONFLICTS, "resolved_at").await?;
        Ok(conflicts.into_iter().rev().take(limit).collect())
    }

    /// Last persisted download checkpoint for `owner_id`.
    pub async fn checkpoint(&self, owner_id: &OwnerId) -> Result<Option<i64>> {
        let stored: Option<Checkpoint> = self
            .store
            .get(SYNC_META, &checkpoint_key(owner_id))
            .await?;
        Ok(stored.map(|checkpoint| checkpoint.value))
    }

    pub async fn set_checkpoint(&self, owner_id: &OwnerId, value: i64) -> Result<()> {
        let checkpoint = Checkpoint {
            owner_id: owner_id.clone(),
            value,
        };
        self.store
            .put(SYNC_META, checkpoint_key(owner_id), &checkpoint)
            .await?;
        Ok(())
    }
}

fn stage_conflict(
    batch: &mut WriteBatch,
    kind: EntityKind,
    entity_id: &str,
    local_updated_at: i64,
    remote_updated_at: i64,
    outcome: ConflictOutcome,
) -> Result<SyncConflict> {
    let conflict = SyncConflict {
        id: ConflictId::new(),
        kind,
        entity_id: entity_id.to_string(),
        local_updated_at,
        remote_updated_at,
        resolved_at: now_millis(),
        outcome,
    };
    batch.put(SYNC_CONFLICTS, conflict.id.as_str(), &conflict)?;

    tracing::info!(
        "Sync conflict on {} {}: {} (local {}, remote {})",
        kind,
        entity_id,
        outcome,
        local_updated_at,
        remote_updated_at
    );
    Ok(conflict)
}
