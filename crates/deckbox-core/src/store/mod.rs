//! Embedded local store

mod connection;
mod local;
mod migrations;

pub use connection::Database;
pub use local::{CollectionSchema, IndexSpec, IndexValue, LocalStore, StoreQuota, WriteBatch};

use crate::error::StorageFault;

/// Result type for local store operations
pub type StoreResult<T> = std::result::Result<T, StorageFault>;

/// Collection names used by the engine
pub mod collections {
    pub const DECKS: &str = "decks";
    pub const CARDS: &str = "cards";
    pub const PENDING_CHANGES: &str = "pending_changes";
    pub const SYNC_CONFLICTS: &str = "sync_conflicts";
    pub const SYNC_META: &str = "sync_meta";
}

/// Collections and indexes of the deckbox local layout
pub const SCHEMAS: &[CollectionSchema] = &[
    CollectionSchema {
        name: collections::DECKS,
        indexes: &[IndexSpec::on("owner_id")],
    },
    CollectionSchema {
        name: collections::CARDS,
        indexes: &[IndexSpec::on("deck_id"), IndexSpec::on("order_index")],
    },
    CollectionSchema {
        name: collections::PENDING_CHANGES,
        indexes: &[IndexSpec::on("enqueued_at"), IndexSpec::on("target")],
    },
    CollectionSchema {
        name: collections::SYNC_CONFLICTS,
        indexes: &[IndexSpec::on("resolved_at")],
    },
    CollectionSchema {
        name: collections::SYNC_META,
        indexes: &[],
    },
];
