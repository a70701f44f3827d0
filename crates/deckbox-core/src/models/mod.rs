//! Data models for Deckbox

mod card;
mod change;
mod conflict;
mod deck;
mod entity;
mod ids;

pub use card::{Card, CardPatch, NewCard};
pub use change::{Change, ChangeOp, PendingChange};
pub(crate) use change::target_key;
pub use conflict::{ConflictOutcome, SyncConflict};
pub use deck::{Deck, DeckPatch};
pub use entity::{Entity, EntityKind};
pub use ids::{CardId, ChangeId, ConflictId, DeckId, OwnerId};
