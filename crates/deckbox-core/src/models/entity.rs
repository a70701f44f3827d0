//! Entity union shared by the change ledger and the remote protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::card::Card;
use super::deck::Deck;

/// Kind of synchronized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Deck,
    Card,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deck => "deck",
            Self::Card => "card",
        }
    }

    /// Path segment used by the remote REST API
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Deck => "decks",
            Self::Card => "cards",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deck" | "decks" => Ok(Self::Deck),
            "card" | "cards" => Ok(Self::Card),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

/// A full record snapshot of either entity kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum Entity {
    Deck(Deck),
    Card(Card),
}

impl Entity {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Deck(_) => EntityKind::Deck,
            Self::Card(_) => EntityKind::Card,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Self::Deck(deck) => deck.id.as_str(),
            Self::Card(card) => card.id.as_str(),
        }
    }

    pub const fn updated_at(&self) -> i64 {
        match self {
            Self::Deck(deck) => deck.updated_at,
            Self::Card(card) => card.updated_at,
        }
    }

    pub const fn pending_changes(&self) -> bool {
        match self {
            Self::Deck(deck) => deck.pending_changes,
            Self::Card(card) => card.pending_changes,
        }
    }

    pub(crate) fn set_sync_flags(&mut self, synced: bool, pending_changes: bool) {
        match self {
            Self::Deck(deck) => {
                deck.synced = synced;
                deck.pending_changes = pending_changes;
            }
            Self::Card(card) => {
                card.synced = synced;
                card.pending_changes = pending_changes;
            }
        }
    }

    /// Compare user-visible content of two snapshots of the same kind.
    pub fn same_content(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Deck(left), Self::Deck(right)) => left.same_content(right),
            (Self::Card(left), Self::Card(right)) => left.same_content(right),
            _ => false,
        }
    }
}

impl From<Deck> for Entity {
    fn from(deck: Deck) -> Self {
        Self::Deck(deck)
    }
}

impl From<Card> for Entity {
    fn from(card: Card) -> Self {
        Self::Card(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewCard, OwnerId};

    #[test]
    fn entity_kind_parses_singular_and_plural() {
        assert_eq!("deck".parse::<EntityKind>().unwrap(), EntityKind::Deck);
        assert_eq!("Cards".parse::<EntityKind>().unwrap(), EntityKind::Card);
        assert!("tag".parse::<EntityKind>().is_err());
    }

    #[test]
    fn entity_serializes_with_kind_tag() {
        let deck = Deck::new(OwnerId::from("owner"), "Trip");
        let value = serde_json::to_value(Entity::from(deck.clone())).unwrap();
        assert_eq!(value["kind"], "deck");
        assert_eq!(value["record"]["title"], "Trip");

        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back, Entity::Deck(deck));
    }

    #[test]
    fn same_content_rejects_mixed_kinds() {
        let deck = Deck::new(OwnerId::from("owner"), "Trip");
        let card = crate::models::Card::new(deck.id, NewCard::new("Flights", ""), 0);
        assert!(!Entity::from(deck).same_content(&Entity::from(card)));
    }
}
