//! deckbox-core - Core library for Deckbox
//!
//! Local-first storage and sync for decks and cards. Every mutation lands in
//! the embedded local store together with a pending-change entry; the sync
//! coordinator replays those entries against a remote store whenever the
//! connectivity monitor reports a usable link, then pulls remote deltas.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod remote;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use config::{EngineConfig, RemoteConfig, SyncOptions};
pub use connectivity::{ConnectionQuality, ConnectivityMonitor, ConnectivityState, LinkHint};
pub use error::{Error, Result, StorageFault};
pub use events::Subscription;
pub use models::{Card, CardId, Deck, DeckId, OwnerId};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteError, RemoteStore, Session};
pub use services::StorageService;
pub use state::SyncState;
pub use sync::{SyncCoordinator, SyncReport, SyncTrigger};
