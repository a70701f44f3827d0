//! Deck model

use serde::{Deserialize, Serialize};

use super::ids::{DeckId, OwnerId};
use crate::util::{next_timestamp, now_millis};

/// A named collection of cards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    /// Unique identifier (client generated)
    pub id: DeckId,
    /// User that created the deck
    pub owner_id: OwnerId,
    /// Display title
    pub title: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Cached number of cards in the deck
    #[serde(default)]
    pub card_count: u32,
    /// Whether the remote store has acknowledged this version
    #[serde(default)]
    pub synced: bool,
    /// Whether a local edit is waiting for upload
    #[serde(default)]
    pub pending_changes: bool,
}

impl Deck {
    /// Create a new, not yet synced deck
    #[must_use]
    pub fn new(owner_id: OwnerId, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: DeckId::new(),
            owner_id,
            title: title.into(),
            created_at: now,
            updated_at: now,
            card_count: 0,
            synced: false,
            pending_changes: true,
        }
    }

    /// Apply a patch, bumping `updated_at` and flagging the deck as pending.
    pub fn apply(&mut self, patch: &DeckPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = next_timestamp(self.updated_at);
        self.synced = false;
        self.pending_changes = true;
    }

    /// Touch so this copy outranks a remote version stamped `remote_updated_at`.
    pub(crate) fn supersede(&mut self, remote_updated_at: i64) {
        self.touch();
        self.updated_at = self.updated_at.max(remote_updated_at.saturating_add(1));
    }

    /// Compare the user-visible fields, ignoring sync flags and cached counts.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner_id == other.owner_id
            && self.title == other.title
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
    }
}

/// Partial update for a deck
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckPatch {
    pub title: Option<String>,
}

impl DeckPatch {
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_deck_is_pending() {
        let deck = Deck::new(OwnerId::from("owner"), "Trip");
        assert_eq!(deck.title, "Trip");
        assert!(deck.pending_changes);
        assert!(!deck.synced);
        assert_eq!(deck.created_at, deck.updated_at);
    }

    #[test]
    fn apply_patch_marks_pending_and_keeps_time_monotonic() {
        let mut deck = Deck::new(OwnerId::from("owner"), "Trip");
        deck.synced = true;
        deck.pending_changes = false;
        let before = deck.updated_at;

        deck.apply(&DeckPatch::title("Holiday"));

        assert_eq!(deck.title, "Holiday");
        assert!(deck.pending_changes);
        assert!(!deck.synced);
        assert!(deck.updated_at >= before);
    }

    #[test]
    fn same_content_ignores_flags() {
        let deck = Deck::new(OwnerId::from("owner"), "Trip");
        let mut other = deck.clone();
        other.synced = true;
        other.pending_changes = false;
        other.card_count = 7;
        assert!(deck.same_content(&other));

        other.title = "Other".to_string();
        assert!(!deck.same_content(&other));
    }
}
