//! Typed deck and card storage on top of the local store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{
    Card, CardId, CardPatch, Change, Deck, DeckId, DeckPatch, EntityKind, NewCard, OwnerId,
};
use crate::queue::PendingChangeQueue;
use crate::store::collections::{CARDS, DECKS};
use crate::store::{LocalStore, WriteBatch, SCHEMAS};
use crate::util::normalize_text_option;

/// Thread-safe service for deck and card operations.
///
/// Every mutation writes the entity and its ledger entry in one batch, under
/// one write lock shared by all clones.
#[derive(Clone)]
pub struct StorageService {
    pub(super) store: LocalStore,
    pub(super) queue: PendingChangeQueue,
    pub(super) write_lock: Arc<Mutex<()>>,
    db_path: Option<PathBuf>,
}

impl StorageService {
    /// Open a storage service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>, config: &EngineConfig) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = LocalStore::open(&db_path, SCHEMAS, config.quota).await?;
        tracing::info!("Opened local store at {}", db_path.display());
        Self::with_store(store, config.sync.stuck_after_attempts, Some(db_path)).await
    }

    /// Open the database named by `config.database_path`.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let Some(db_path) = config.database_path.clone() else {
            return Err(Error::InvalidInput(
                "database path is not configured".to_string(),
            ));
        };
        Self::open_path(db_path, config).await
    }

    /// Open an in-memory storage service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(&EngineConfig::default()).await
    }

    /// Open an in-memory storage service with explicit limits.
    pub async fn open_in_memory_with(config: &EngineConfig) -> Result<Self> {
        let store = LocalStore::open_in_memory(SCHEMAS, config.quota).await?;
        Self::with_store(store, config.sync.stuck_after_attempts, None).await
    }

    async fn with_store(
        store: LocalStore,
        stuck_after: u32,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        let queue = PendingChangeQueue::open(store.clone(), stuck_after).await?;
        Ok(Self {
            store,
            queue,
            write_lock: Arc::new(Mutex::new(())),
            db_path,
        })
    }

    /// Backing database file, if any.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Create a deck owned by `owner_id`.
    pub async fn create_deck(&self, owner_id: &OwnerId, title: &str) -> Result<Deck> {
        if owner_id.is_blank() {
            return Err(Error::InvalidInput("owner id cannot be empty".to_string()));
        }
        let title = required_title(title, "deck")?;

        let _guard = self.write_lock.lock().await;
        let deck = Deck::new(owner_id.clone(), title);

        let mut batch = WriteBatch::new();
        batch.put(DECKS, deck.id.as_str(), &deck)?;
        self.queue
            .stage(&mut batch, Change::create(deck.clone()))
            .await?;
        self.store.apply(batch).await?;

        tracing::debug!("Created deck {}", deck.id);
        Ok(deck)
    }

    /// Fetch a deck by id.
    pub async fn get_deck(&self, id: &DeckId) -> Result<Option<Deck>> {
        Ok(self.store.get(DECKS, &id.as_str()).await?)
    }

    /// Rename a deck.
    pub async fn update_deck(&self, id: &DeckId, patch: &DeckPatch) -> Result<Deck> {
        let patch = DeckPatch {
            title: patch
                .title
                .as_deref()
                .map(|title| required_title(title, "deck"))
                .transpose()?,
        };

        let _guard = self.write_lock.lock().await;
        let mut deck = self.load_deck(id).await?;
        deck.apply(&patch);

        let mut batch = WriteBatch::new();
        batch.put(DECKS, deck.id.as_str(), &deck)?;
        self.queue
            .stage(&mut batch, Change::update(deck.clone()))
            .await?;
        self.store.apply(batch).await?;

        tracing::debug!("Updated deck {}", deck.id);
        Ok(deck)
    }

    /// Delete a deck together with all of its cards.
    pub async fn delete_deck(&self, id: &DeckId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let deck = self.load_deck(id).await?;
        let cards = self.cards_of(id).await?;

        let mut batch = WriteBatch::new();
        for card in &cards {
            batch.delete(CARDS, card.id.as_str());
            self.queue
                .stage(&mut batch, Change::delete(EntityKind::Card, card.id))
                .await?;
        }
        batch.delete(DECKS, deck.id.as_str());
        self.queue
            .stage(&mut batch, Change::delete(EntityKind::Deck, deck.id))
            .await?;
        self.store.apply(batch).await?;

        tracing::debug!("Deleted deck {} with {} cards", deck.id, cards.len());
        Ok(())
    }

    /// Decks owned by `owner_id`, oldest first.
    pub async fn list_decks_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Deck>> {
        Ok(self
            .store
            .get_by_index(DECKS, "owner_id", owner_id.as_str())
            .await?)
    }

    /// Append a card to a deck.
    pub async fn create_card(&self, deck_id: &DeckId, draft: NewCard) -> Result<Card> {
        let draft = NewCard {
            title: required_title(&draft.title, "card")?,
            body: draft.body,
            category: normalize_text_option(draft.category),
        };

        let _guard = self.write_lock.lock().await;
        let mut deck = self.load_deck(deck_id).await?;
        let siblings = self.cards_of(deck_id).await?;
        let card = Card::new(*deck_id, draft, next_order_index(&siblings));

        let mut batch = WriteBatch::new();
        batch.put(CARDS, card.id.as_str(), &card)?;
        self.queue
            .stage(&mut batch, Change::create(card.clone()))
            .await?;
        self.stage_card_count(&mut batch, &mut deck, siblings.len() + 1)
            .await?;
        self.store.apply(batch).await?;

        tracing::debug!("Created card {} in deck {}", card.id, deck.id);
        Ok(card)
    }

    /// Fetch a card by id.
    pub async fn get_card(&self, id: &CardId) -> Result<Option<Card>> {
        Ok(self.store.get(CARDS, &id.as_str()).await?)
    }

    /// Edit a card's content and/or move it within its deck.
    ///
    /// A move renumbers the deck `0..n`; every card whose position changed is
    /// written and queued with the moved one.
    pub async fn update_card(&self, id: &CardId, patch: &CardPatch) -> Result<Card> {
        let patch = CardPatch {
            title: patch
                .title
                .as_deref()
                .map(|title| required_title(title, "card"))
                .transpose()?,
            body: patch.body.clone(),
            category: patch.category.clone().map(normalize_text_option),
            order_index: patch.order_index,
        };

        let _guard = self.write_lock.lock().await;
        let mut card = self.load_card(id).await?;
        let content_changed = !patch.is_move_only();
        if content_changed {
            card.apply(&patch);
        }

        let changed = match patch.order_index {
            Some(target) if target != card.order_index => {
                let siblings = self.cards_of(&card.deck_id).await?;
                reorder(siblings, card, target)
            }
            _ if content_changed => vec![card],
            _ => return Ok(card),
        };

        let mut batch = WriteBatch::new();
        for changed_card in &changed {
            batch.put(CARDS, changed_card.id.as_str(), changed_card)?;
            self.queue
                .stage(&mut batch, Change::update(changed_card.clone()))
                .await?;
        }
        self.store.apply(batch).await?;

        tracing::debug!("Updated card {} ({} cards written)", id, changed.len());
        changed
            .into_iter()
            .find(|changed_card| changed_card.id == *id)
            .ok_or_else(|| Error::not_found(EntityKind::Card, id))
    }

    /// Delete a card.
    pub async fn delete_card(&self, id: &CardId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let card = self.load_card(id).await?;
        let remaining = self.cards_of(&card.deck_id).await?.len().saturating_sub(1);

        let mut batch = WriteBatch::new();
        batch.delete(CARDS, card.id.as_str());
        self.queue
            .stage(&mut batch, Change::delete(EntityKind::Card, card.id))
            .await?;
        if let Some(mut deck) = self.get_deck(&card.deck_id).await? {
            self.stage_card_count(&mut batch, &mut deck, remaining)
                .await?;
        }
        self.store.apply(batch).await?;

        tracing::debug!("Deleted card {}", card.id);
        Ok(())
    }

    /// Cards of a deck ordered by position.
    pub async fn list_cards_for_deck(&self, deck_id: &DeckId) -> Result<Vec<Card>> {
        self.cards_of(deck_id).await
    }

    /// Write a new cached card count for `deck` and queue it for upload.
    ///
    /// The count travels with the deck record, so a change to it is a deck
    /// edit. Nothing is staged when the count is unchanged.
    async fn stage_card_count(
        &self,
        batch: &mut WriteBatch,
        deck: &mut Deck,
        count: usize,
    ) -> Result<()> {
        let count = count_u32(count);
        if deck.card_count == count {
            return Ok(());
        }
        deck.card_count = count;
        deck.touch();
        batch.put(DECKS, deck.id.as_str(), &*deck)?;
        self.queue.stage(batch, Change::update(deck.clone())).await?;
        Ok(())
    }

    pub(super) async fn load_deck(&self, id: &DeckId) -> Result<Deck> {
        self.get_deck(id)
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Deck, id))
    }

    async fn load_card(&self, id: &CardId) -> Result<Card> {
        self.get_card(id)
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Card, id))
    }

    pub(super) async fn cards_of(&self, deck_id: &DeckId) -> Result<Vec<Card>> {
        let mut cards: Vec<Card> = self
            .store
            .get_by_index(CARDS, "deck_id", deck_id.as_str())
            .await?;
        cards.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(cards)
    }
}

fn required_title(raw: &str, what: &str) -> Result<String> {
    normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::InvalidInput(format!("{what} title cannot be empty")))
}

pub(super) fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

pub(super) fn next_order_index(cards: &[Card]) -> u32 {
    cards
        .iter()
        .map(|card| card.order_index)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

/// Place `moved` at position `target` among `siblings` and renumber `0..n`.
///
/// Returns the cards whose position changed, the moved card always included,
/// each touched for upload.
fn reorder(siblings: Vec<Card>, moved: Card, target: u32) -> Vec<Card> {
    let moved_id = moved.id;
    let mut ordered: Vec<Card> = siblings
        .into_iter()
        .filter(|card| card.id != moved_id)
        .collect();
    let slot = usize::try_from(target)
        .unwrap_or(usize::MAX)
        .min(ordered.len());
    ordered.insert(slot, moved);

    ordered
        .into_iter()
        .enumerate()
        .filter_map(|(position, mut card)| {
            let index = count_u32(position);
            if card.id == moved_id || card.order_index != index {
                card.order_index = index;
                card.touch();
                Some(card)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeOp;
    use crate::store::StoreQuota;
    use pretty_assertions::assert_eq;

    fn owner() -> OwnerId {
        OwnerId::from("owner")
    }

    async fn setup() -> StorageService {
        StorageService::open_in_memory().await.unwrap()
    }

    async fn titles(service: &StorageService, deck_id: &DeckId) -> Vec<(u32, String)> {
        service
            .list_cards_for_deck(deck_id)
            .await
            .unwrap()
            .into_iter()
            .map(|card| (card.order_index, card.title))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_deck_queues_a_create() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "  Trip ").await.unwrap();

        assert_eq!(deck.title, "Trip");
        assert!(deck.pending_changes);
        assert_eq!(service.get_deck(&deck.id).await.unwrap(), Some(deck.clone()));

        let pending = service.pending_changes().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, ChangeOp::Create);
        assert_eq!(pending[0].entity_id, deck.id.as_str());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_input_is_rejected() {
        let service = setup().await;
        assert!(matches!(
            service.create_deck(&owner(), "   ").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.create_deck(&OwnerId::from(" "), "Trip").await,
            Err(Error::InvalidInput(_))
        ));

        let deck = service.create_deck(&owner(), "Trip").await.unwrap();
        assert!(matches!(
            service.create_card(&deck.id, NewCard::new("", "body")).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.update_deck(&deck.id, &DeckPatch::title("")).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutations_of_missing_entities_are_not_found() {
        let service = setup().await;
        let missing_deck = DeckId::new();
        let missing_card = CardId::new();

        assert!(matches!(
            service.update_deck(&missing_deck, &DeckPatch::title("x")).await,
            Err(Error::NotFound { kind: EntityKind::Deck, .. })
        ));
        assert!(matches!(
            service.delete_deck(&missing_deck).await,
            Err(Error::NotFound { kind: EntityKind::Deck, .. })
        ));
        assert!(matches!(
            service.create_card(&missing_deck, NewCard::new("a", "")).await,
            Err(Error::NotFound { kind: EntityKind::Deck, .. })
        ));
        assert!(matches!(
            service.update_card(&missing_card, &CardPatch::body("x")).await,
            Err(Error::NotFound { kind: EntityKind::Card, .. })
        ));
        assert!(matches!(
            service.delete_card(&missing_card).await,
            Err(Error::NotFound { kind: EntityKind::Card, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cards_append_and_maintain_deck_count() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "Trip").await.unwrap();

        let flights = service
            .create_card(&deck.id, NewCard::new("Flights", "LHR -> JFK"))
            .await
            .unwrap();
        let hotel = service
            .create_card(&deck.id, NewCard::new("Hotel", "").with_category(" travel "))
            .await
            .unwrap();

        assert_eq!(flights.order_index, 0);
        assert_eq!(hotel.order_index, 1);
        assert_eq!(hotel.category.as_deref(), Some("travel"));

        let stored = service.get_deck(&deck.id).await.unwrap().unwrap();
        assert_eq!(stored.card_count, 2);
        let deck_entry = service
            .queue
            .entry_for(EntityKind::Deck, &deck.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deck_entry.op, ChangeOp::Create);
        assert_eq!(deck_entry.payload, Some(stored.into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn count_change_on_synced_deck_queues_deck_update() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "Trip").await.unwrap();
        let flights = service
            .create_card(&deck.id, NewCard::new("Flights", ""))
            .await
            .unwrap();
        service
            .create_card(&deck.id, NewCard::new("Hotel", ""))
            .await
            .unwrap();
        for entry in service.pending_changes().await.unwrap() {
            assert!(service.confirm_upload(&entry).await.unwrap());
        }
        let synced = service.get_deck(&deck.id).await.unwrap().unwrap();
        assert!(synced.synced);

        service.delete_card(&flights.id).await.unwrap();

        let stored = service.get_deck(&deck.id).await.unwrap().unwrap();
        assert_eq!(stored.card_count, 1);
        assert!(stored.pending_changes);
        assert!(stored.updated_at >= synced.updated_at);

        let pending = service.pending_changes().await.unwrap();
        let ops: Vec<(EntityKind, ChangeOp)> =
            pending.iter().map(|entry| (entry.kind, entry.op)).collect();
        assert_eq!(
            ops,
            vec![
                (EntityKind::Card, ChangeOp::Delete),
                (EntityKind::Deck, ChangeOp::Update),
            ]
        );
        assert_eq!(pending[1].payload, Some(stored.into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_edits_collapse_into_one_entry() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "Trip").await.unwrap();
        let card = service
            .create_card(&deck.id, NewCard::new("Flights", "v1"))
            .await
            .unwrap();

        service
            .update_card(&card.id, &CardPatch::body("v2"))
            .await
            .unwrap();
        let latest = service
            .update_card(&card.id, &CardPatch::body("v3"))
            .await
            .unwrap();

        let pending = service.pending_changes().await.unwrap();
        assert_eq!(pending.len(), 2);
        let card_entry = pending
            .iter()
            .find(|entry| entry.kind == EntityKind::Card)
            .unwrap();
        assert_eq!(card_entry.op, ChangeOp::Create);
        assert_eq!(card_entry.payload, Some(latest.into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_delete_leaves_nothing_queued() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "Trip").await.unwrap();
        service
            .create_card(&deck.id, NewCard::new("Flights", ""))
            .await
            .unwrap();

        service.delete_deck(&deck.id).await.unwrap();

        assert!(service.pending_changes().await.unwrap().is_empty());
        assert_eq!(service.get_deck(&deck.id).await.unwrap(), None);
        assert!(service.list_cards_for_deck(&deck.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn moving_a_card_renumbers_the_deck() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "Trip").await.unwrap();
        let mut ids = Vec::new();
        for title in ["a", "b", "c", "d"] {
            let card = service
                .create_card(&deck.id, NewCard::new(title, ""))
                .await
                .unwrap();
            ids.push(card.id);
        }

        let moved = service
            .update_card(&ids[3], &CardPatch::move_to(1))
            .await
            .unwrap();
        assert_eq!(moved.order_index, 1);
        assert_eq!(
            titles(&service, &deck.id).await,
            vec![
                (0, "a".to_string()),
                (1, "d".to_string()),
                (2, "b".to_string()),
                (3, "c".to_string()),
            ]
        );

        // Moving past the end clamps to the last slot
        service
            .update_card(&ids[0], &CardPatch::move_to(99))
            .await
            .unwrap();
        assert_eq!(
            titles(&service, &deck.id).await,
            vec![
                (0, "d".to_string()),
                (1, "b".to_string()),
                (2, "c".to_string()),
                (3, "a".to_string()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_patch_changes_nothing() {
        let service = setup().await;
        let deck = service.create_deck(&owner(), "Trip").await.unwrap();
        let card = service
            .create_card(&deck.id, NewCard::new("Flights", ""))
            .await
            .unwrap();

        let same = service
            .update_card(&card.id, &CardPatch::default())
            .await
            .unwrap();
        assert_eq!(same, card);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn decks_are_listed_per_owner() {
        let service = setup().await;
        service.create_deck(&owner(), "Mine").await.unwrap();
        service
            .create_deck(&OwnerId::from("someone-else"), "Theirs")
            .await
            .unwrap();

        let mine = service.list_decks_for_owner(&owner()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "Mine");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quota_failure_keeps_entity_and_ledger_consistent() {
        let config = EngineConfig {
            quota: StoreQuota {
                // One deck plus its ledger entry
                max_records: Some(2),
                max_bytes: None,
            },
            ..EngineConfig::default()
        };
        let service = StorageService::open_in_memory_with(&config).await.unwrap();
        service.create_deck(&owner(), "Trip").await.unwrap();

        let error = service.create_deck(&owner(), "Second").await.unwrap_err();
        assert!(matches!(
            error,
            Error::Storage(crate::error::StorageFault::QuotaExceeded(_))
        ));
        assert_eq!(service.list_decks_for_owner(&owner()).await.unwrap().len(), 1);
        assert_eq!(service.pending_changes().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deckbox.db");
        let config = EngineConfig::default();

        let deck = {
            let service = StorageService::open_path(&path, &config).await.unwrap();
            service.create_deck(&owner(), "Trip").await.unwrap()
        };

        let reopened = StorageService::open_path(&path, &config).await.unwrap();
        assert_eq!(reopened.db_path(), Some(path.as_path()));
        assert_eq!(reopened.get_deck(&deck.id).await.unwrap(), Some(deck));
        assert_eq!(reopened.pending_changes().await.unwrap().len(), 1);
    }

    #[test]
    fn reorder_reports_only_shifted_cards() {
        let deck_id = DeckId::new();
        let cards: Vec<Card> = (0..4)
            .map(|index| Card::new(deck_id, NewCard::new(format!("c{index}"), ""), index))
            .collect();

        let changed = reorder(cards.clone(), cards[2].clone(), 1);
        let moved: Vec<(String, u32)> = changed
            .iter()
            .map(|card| (card.title.clone(), card.order_index))
            .collect();
        assert_eq!(
            moved,
            vec![("c2".to_string(), 1), ("c1".to_string(), 2)]
        );
        assert!(changed.iter().all(|card| card.pending_changes));
    }
}
