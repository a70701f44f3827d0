use chrono::Utc;
use deckbox_core::models::DeckPatch;
use deckbox_core::{Deck, OwnerId, StorageService};

use crate::commands::common::{deck_to_list_item, format_deck_lines, resolve_deck, resolve_title};
use crate::error::CliError;

pub async fn run_deck_add(
    storage: &StorageService,
    owner: &OwnerId,
    title_parts: &[String],
) -> Result<(), CliError> {
    let title = resolve_title(title_parts)?;
    let deck = storage.create_deck(owner, &title).await?;
    println!("{}", deck.id);
    Ok(())
}

pub async fn run_deck_list(
    storage: &StorageService,
    owner: &OwnerId,
    json: bool,
) -> Result<(), CliError> {
    let decks = storage.list_decks_for_owner(owner).await?;

    if json {
        let now_ms = Utc::now().timestamp_millis();
        let items = decks
            .iter()
            .map(|deck| deck_to_list_item(deck, now_ms))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if decks.is_empty() {
        println!("No decks found.");
        return Ok(());
    }

    for line in format_deck_lines(&decks) {
        println!("{line}");
    }

    Ok(())
}

pub async fn rename_deck(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
    title_parts: &[String],
) -> Result<Deck, CliError> {
    let title = resolve_title(title_parts)?;
    let deck = resolve_deck(id, owner, storage).await?;
    if deck.title == title {
        return Ok(deck);
    }
    Ok(storage.update_deck(&deck.id, &DeckPatch::title(title)).await?)
}

pub async fn run_deck_rename(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
    title_parts: &[String],
) -> Result<(), CliError> {
    let deck = rename_deck(storage, owner, id, title_parts).await?;
    println!("{}", deck.id);
    Ok(())
}

pub async fn run_deck_delete(
    storage: &StorageService,
    owner: &OwnerId,
    id: &str,
) -> Result<(), CliError> {
    let deck = resolve_deck(id, owner, storage).await?;
    storage.delete_deck(&deck.id).await?;
    println!("{}", deck.id);
    Ok(())
}
