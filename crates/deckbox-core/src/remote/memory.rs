//! In-process remote store with a call log and failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RemoteChanges, RemoteError, RemoteRecord, RemoteResult, RemoteStore, Tombstone};
use crate::models::{Card, Deck, Entity, EntityKind, OwnerId};
use crate::util::now_millis;

/// Remote operation recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    Fetch,
}

/// One call made against a [`MemoryRemoteStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub owner: OwnerId,
    pub kind: Option<EntityKind>,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone)]
struct Stored {
    record: RemoteRecord,
    /// Server-side change time; drives delta fetches
    changed_at: i64,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<OwnerId, BTreeMap<(EntityKind, String), Stored>>,
    clock: i64,
    calls: Vec<RemoteCall>,
    fail_all: Option<RemoteError>,
    fail_entities: HashMap<String, RemoteError>,
}

impl State {
    /// Strictly increasing server clock, never behind the wall clock
    fn tick(&mut self) -> i64 {
        self.clock = now_millis().max(self.clock + 1);
        self.clock
    }

    fn store(&mut self, owner: &OwnerId, record: RemoteRecord) {
        let changed_at = self.tick();
        let key = (record.kind(), record.id());
        self.records
            .entry(owner.clone())
            .or_default()
            .insert(key, Stored { record, changed_at });
    }

    fn injected(&self, entity_id: Option<&str>) -> Option<RemoteError> {
        if let Some(error) = &self.fail_all {
            return Some(error.clone());
        }
        entity_id.and_then(|id| self.fail_entities.get(id).cloned())
    }
}

/// Remote store kept in process memory
///
/// Cheap to clone; clones share the same server state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<State>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin(
        &self,
        op: RemoteOp,
        owner: &OwnerId,
        kind: Option<EntityKind>,
        entity_id: Option<&str>,
    ) -> RemoteResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(RemoteCall {
            op,
            owner: owner.clone(),
            kind,
            entity_id: entity_id.map(str::to_string),
        });
        match state.injected(entity_id) {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    /// Make every call fail with `error` until [`Self::clear_failures`].
    pub fn fail_all(&self, error: RemoteError) {
        self.lock().fail_all = Some(error);
    }

    /// Make every call touching `entity_id` fail with `error`.
    pub fn fail_entity(&self, entity_id: impl Into<String>, error: RemoteError) {
        self.lock().fail_entities.insert(entity_id.into(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_all = None;
        state.fail_entities.clear();
    }

    /// Every call made so far, failed ones included.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Number of create, update and delete calls made so far.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op != RemoteOp::Fetch)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Write a record as another client would, bypassing the call log.
    pub fn put_record(&self, owner: &OwnerId, record: RemoteRecord) {
        self.lock().store(owner, record);
    }

    /// Current remote copy of a record, tombstones included.
    pub fn record(&self, owner: &OwnerId, kind: EntityKind, id: &str) -> Option<RemoteRecord> {
        self.lock()
            .records
            .get(owner)
            .and_then(|records| records.get(&(kind, id.to_string())))
            .map(|stored| stored.record.clone())
    }

    /// Live decks of an owner.
    pub fn decks(&self, owner: &OwnerId) -> Vec<Deck> {
        self.live(owner)
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::Deck(deck) => Some(deck),
                Entity::Card(_) => None,
            })
            .collect()
    }

    /// Live cards of an owner.
    pub fn cards(&self, owner: &OwnerId) -> Vec<Card> {
        self.live(owner)
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::Card(card) => Some(card),
                Entity::Deck(_) => None,
            })
            .collect()
    }

    fn live(&self, owner: &OwnerId) -> Vec<Entity> {
        self.lock()
            .records
            .get(owner)
            .map(|records| {
                records
                    .values()
                    .filter_map(|stored| match &stored.record {
                        RemoteRecord::Live(entity) => Some(entity.clone()),
                        RemoteRecord::Deleted(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create_remote(&self, owner: &OwnerId, entity: &Entity) -> RemoteResult<()> {
        let id = entity.id();
        let mut state = self.begin(RemoteOp::Create, owner, Some(entity.kind()), Some(&id))?;
        state.store(owner, RemoteRecord::Live(entity.clone()));
        Ok(())
    }

    async fn update_remote(
        &self,
        owner: &OwnerId,
        kind: EntityKind,
        id: &str,
        patch: &Entity,
    ) -> RemoteResult<()> {
        let mut state = self.begin(RemoteOp::Update, owner, Some(kind), Some(id))?;
        let exists = state
            .records
            .get(owner)
            .and_then(|records| records.get(&(kind, id.to_string())))
            .is_some_and(|stored| matches!(stored.record, RemoteRecord::Live(_)));
        if !exists {
            return Err(RemoteError::NotFound(format!("{kind} {id}")));
        }
        state.store(owner, RemoteRecord::Live(patch.clone()));
        Ok(())
    }

    async fn delete_remote(&self, owner: &OwnerId, kind: EntityKind, id: &str) -> RemoteResult<()> {
        let mut state = self.begin(RemoteOp::Delete, owner, Some(kind), Some(id))?;
        let live = state
            .records
            .get(owner)
            .and_then(|records| records.get(&(kind, id.to_string())))
            .is_some_and(|stored| matches!(stored.record, RemoteRecord::Live(_)));
        if !live {
            return Err(RemoteError::NotFound(format!("{kind} {id}")));
        }
        let deleted_at = state.tick();
        state.store(
            owner,
            RemoteRecord::Deleted(Tombstone {
                kind,
                id: id.to_string(),
                updated_at: deleted_at,
            }),
        );
        Ok(())
    }

    async fn fetch_changed_since(
        &self,
        owner: &OwnerId,
        checkpoint: Option<i64>,
    ) -> RemoteResult<RemoteChanges> {
        let state = self.begin(RemoteOp::Fetch, owner, None, None)?;
        let mut changed: Vec<&Stored> = state
            .records
            .get(owner)
            .map(|records| {
                records
                    .values()
                    .filter(|stored| match checkpoint {
                        Some(since) => stored.changed_at > since,
                        None => true,
                    })
                    .collect()
            })
            .unwrap_or_default();
        changed.sort_by_key(|stored| stored.changed_at);

        Ok(RemoteChanges {
            checkpoint: changed.last().map(|stored| stored.changed_at).or(checkpoint),
            records: changed.into_iter().map(|stored| stored.record.clone()).collect(),
        })
    }
}
