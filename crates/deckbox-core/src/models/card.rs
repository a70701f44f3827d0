//! Card model

use serde::{Deserialize, Serialize};

use super::ids::{CardId, DeckId};
use crate::util::{next_timestamp, now_millis};

/// One note inside a deck
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Unique identifier (client generated)
    pub id: CardId,
    /// Owning deck
    pub deck_id: DeckId,
    /// Card title
    pub title: String,
    /// Body text
    pub body: String,
    /// Optional category tag
    #[serde(default)]
    pub category: Option<String>,
    /// Position within the deck, unique per deck
    pub order_index: u32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Whether the remote store has acknowledged this version
    #[serde(default)]
    pub synced: bool,
    /// Whether a local edit is waiting for upload
    #[serde(default)]
    pub pending_changes: bool,
}

impl Card {
    /// Create a new, not yet synced card at the given position
    #[must_use]
    pub fn new(deck_id: DeckId, draft: NewCard, order_index: u32) -> Self {
        let now = now_millis();
        Self {
            id: CardId::new(),
            deck_id,
            title: draft.title,
            body: draft.body,
            category: draft.category,
            order_index,
            created_at: now,
            updated_at: now,
            synced: false,
            pending_changes: true,
        }
    }

    /// Apply the content fields of a patch. Position changes are handled by
    /// the storage service because they affect sibling cards.
    pub fn apply(&mut self, patch: &CardPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(body) = &patch.body {
            self.body.clone_from(body);
        }
        if let Some(category) = &patch.category {
            self.category.clone_from(category);
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

    /// Compare the user-visible fields, ignoring sync flags.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.deck_id == other.deck_id
            && self.title == other.title
            && self.body == other.body
            && self.category == other.category
            && self.order_index == other.order_index
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
    }
}

/// Fields supplied when creating a card
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCard {
    pub title: String,
    pub body: String,
    pub category: Option<String>,
}

impl NewCard {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            category: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Partial update for a card
///
/// `category: Some(None)` clears the category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub category: Option<Option<String>>,
    pub order_index: Option<u32>,
}

impl CardPatch {
    #[must_use]
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn move_to(order_index: u32) -> Self {
        Self {
            order_index: Some(order_index),
            ..Self::default()
        }
    }

    /// True when the patch changes nothing but the position.
    pub const fn is_move_only(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.category.is_none()
    }
}
