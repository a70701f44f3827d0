use deckbox_core::models::{CardPatch, NewCard};
use deckbox_core::{Card, OwnerId, StorageService};

use crate::commands::common::{
    card_to_list_item, format_card_lines, normalize_text, resolve_card, resolve_deck,
};
use crate::error::CliError;

/// Content changes requested by `card edit`
#[derive(Debug, Default)]
pub struct CardEdit {
    pub title: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
    pub clear_category: bool,
}

impl CardEdit {
    pub fn into_patch(self) -> Result<CardPatch, CliError> {
        let title = match self.title {
            Some(title) => Some(normalize_text(&title).ok_or(CliError::EmptyTitle)?),
            None => None,
        };
        let category = if self.clear_category {
            Some(None)
        } else {
            self.category.map(|category| normalize_text(&category))
        };
        let patch = CardPatch {
            title,
            body: self.body,
            category,
            order_index: None,
        };

        if patch.is_move_only() {
            return Err(CliError::NothingToEdit);
        }
        Ok(patch)
    }
}

pub async fn add_card(
    storage: &StorageService,
    owner: &OwnerId,
    deck_query: &str,
    title: &str,
    body: &str,
    category: Option<String>,
) -> Result<Card, CliError> {
    let title = normalize_text(title).ok_or(CliError::EmptyTitle)?;
    let deck = resolve_deck(deck_query, owner, storage).await?;

    let mut draft = NewCard::new(title, body.trim());
    if let Some(category) = category {
        draft = draft.with_category(category);
    }
    Ok(storage.create_card(&deck.id, draft).await?)
}

pub async fn run_card_add(
    storage: &StorageService,
    owner: &OwnerId,
    deck_query: &str,
    title: &str,
    body: &str,
    category: Option<String>,
) -> Result<(), CliError> {
    let card = add_card(storage, owner, deck_query, title, body, category).await?;
    println!("{}", card.id);
    Ok(())
}

pub async fn run_card_list(
    storage: &StorageService,
    owner: &OwnerId,
    deck_query: &str,
    json: bool,
) -> Result<(), CliError> {
    let deck = resolve_deck(deck_query, owner, storage).await?;
    let cards = storage.list_cards_for_deck(&deck.id).await?;

    if json {
        let items = cards.iter().map(card_to_list_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if cards.is_empty() {
        println!("No cards in '{}'.", deck.title);
        return Ok(());
    }

    for line in format_card_lines(&cards) {
        println!("{line}");
    }

    Ok(())
}

pub async fn run_card_edit(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
    edit: CardEdit,
) -> Result<(), CliError> {
    let patch = edit.into_patch()?;
    let card = resolve_card(id, owner, storage).await?;
    let updated = storage.update_card(&card.id, &patch).await?;
    println!("{}", updated.id);
    Ok(())
}

pub async fn move_card(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
    position: u32,
) -> Result<Card, CliError> {
    let card = resolve_card(id, owner, storage).await?;
    Ok(storage
        .update_card(&card.id, &CardPatch::move_to(position))
        .await?)
}

pub async fn run_card_move(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
    position: u32,
) -> Result<(), CliError> {
    let card = move_card(storage, owner, id, position).await?;
    println!("{} -> {}", card.id, card.order_index);
    Ok(())
}

pub async fn run_card_delete(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
) -> Result<(), CliError> {
    let card = resolve_card(id, owner, storage).await?;
    storage.delete_card(&card.id).await?;
    println!("{}", card.id);
    Ok(())
}
