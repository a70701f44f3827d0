use std::env;
use std::path::PathBuf;

use chrono::Utc;
use deckbox_core::config::ENV_OWNER_ID;
use deckbox_core::models::{ChangeId, PendingChange, SyncConflict};
use deckbox_core::{Card, CardId, Deck, DeckId, EngineConfig, OwnerId, StorageService};
use serde::Serialize;

use crate::error::CliError;

/// Characters of an id shown in listings and ambiguity hints
pub const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct DeckListItem {
    pub id: String,
    pub title: String,
    pub card_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub pending_changes: bool,
}

#[derive(Debug, Serialize)]
pub struct CardListItem {
    pub id: String,
    pub deck_id: String,
    pub order_index: u32,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub updated_at: i64,
    pub pending_changes: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingChangeItem {
    pub id: String,
    pub kind: String,
    pub entity_id: String,
    pub op: String,
    pub enqueued_at: i64,
    pub enqueued_at_iso: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub stuck: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: String,
    pub kind: String,
    pub entity_id: String,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub outcome: String,
}

/// Engine settings from the environment, with `--db-path` taking precedence
/// over `DECKBOX_DB_PATH`.
pub fn load_engine_config(cli_db_path: Option<PathBuf>) -> Result<EngineConfig, CliError> {
    let mut config = EngineConfig::from_env()?;
    let path = match cli_db_path.or_else(|| config.database_path.take()) {
        Some(path) => path,
        None => default_db_path()?,
    };
    config.database_path = Some(path);
    Ok(config)
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("deckbox").join("deckbox.db"))
        .ok_or_else(|| CliError::Config("failed to resolve the data directory".to_string()))
}

pub async fn open_storage(config: &EngineConfig) -> Result<StorageService, CliError> {
    Ok(StorageService::from_config(config).await?)
}

pub fn resolve_owner(cli_owner: Option<String>) -> Result<OwnerId, CliError> {
    owner_from(cli_owner, env::var(ENV_OWNER_ID).ok())
}

pub fn owner_from(
    cli_owner: Option<String>,
    env_owner: Option<String>,
) -> Result<OwnerId, CliError> {
    cli_owner
        .as_deref()
        .and_then(normalize_text)
        .or_else(|| env_owner.as_deref().and_then(normalize_text))
        .map(OwnerId::new)
        .ok_or(CliError::OwnerNotConfigured)
}

pub async fn resolve_deck(
    query: &str,
    owner: &OwnerId,
    storage: &StorageService,
) -> Result<Deck, CliError> {
    let query = normalize_identifier(query, "Deck")?;
    if let Ok(deck_id) = query.parse::<DeckId>() {
        if let Some(deck) = storage.get_deck(&deck_id).await? {
            return Ok(deck);
        }
    }

    let decks = storage.list_decks_for_owner(owner).await?;
    pick_by_prefix(&query, "Deck", decks, |deck| deck.id.to_string())
}

pub async fn resolve_card(
    query: &str,
    owner: &OwnerId,
    storage: &StorageService,
) -> Result<Card, CliError> {
    let query = normalize_identifier(query, "Card")?;
    if let Ok(card_id) = query.parse::<CardId>() {
        if let Some(card) = storage.get_card(&card_id).await? {
            return Ok(card);
        }
    }

    let mut cards = Vec::new();
    for deck in storage.list_decks_for_owner(owner).await? {
        cards.extend(storage.list_cards_for_deck(&deck.id).await?);
    }
    pick_by_prefix(&query, "Card", cards, |card| card.id.to_string())
}

pub async fn resolve_change(
    query: &str,
    storage: &StorageService,
) -> Result<PendingChange, CliError> {
    let query = normalize_identifier(query, "Change")?;
    let entries = storage.pending_changes().await?;
    if let Ok(change_id) = query.parse::<ChangeId>() {
        if let Some(entry) = entries.iter().find(|entry| entry.id == change_id) {
            return Ok(entry.clone());
        }
    }
    pick_by_prefix(&query, "Change", entries, |entry| entry.id.to_string())
}

/// Pick the single candidate whose id starts with `query`.
pub fn pick_by_prefix<T>(
    query: &str,
    kind: &'static str,
    candidates: Vec<T>,
    id_of: impl Fn(&T) -> String,
) -> Result<T, CliError> {
    let mut matches = candidates
        .into_iter()
        .filter(|candidate| id_of(candidate).starts_with(query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::NotFound {
            kind,
            query: query.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|candidate| short_id(&id_of(candidate)))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn deck_to_list_item(deck: &Deck, now_ms: i64) -> DeckListItem {
    DeckListItem {
        id: deck.id.to_string(),
        title: deck.title.clone(),
        card_count: deck.card_count,
        created_at: deck.created_at,
        updated_at: deck.updated_at,
        relative_time: format_relative_time(deck.updated_at, now_ms),
        pending_changes: deck.pending_changes,
    }
}

pub fn card_to_list_item(card: &Card) -> CardListItem {
    CardListItem {
        id: card.id.to_string(),
        deck_id: card.deck_id.to_string(),
        order_index: card.order_index,
        title: card.title.clone(),
        body: card.body.clone(),
        category: card.category.clone(),
        updated_at: card.updated_at,
        pending_changes: card.pending_changes,
    }
}

pub fn pending_change_to_item(entry: &PendingChange) -> PendingChangeItem {
    PendingChangeItem {
        id: entry.id.to_string(),
        kind: entry.kind.to_string(),
        entity_id: entry.entity_id.clone(),
        op: entry.op.to_string(),
        enqueued_at: entry.enqueued_at,
        enqueued_at_iso: format_sync_timestamp(entry.enqueued_at),
        attempts: entry.attempts,
        last_error: entry.last_error.clone(),
        stuck: entry.stuck,
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id.to_string(),
        kind: conflict.kind.to_string(),
        entity_id: conflict.entity_id.clone(),
        local_updated_at: conflict.local_updated_at,
        remote_updated_at: conflict.remote_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        outcome: conflict.outcome.to_string(),
    }
}

pub fn format_deck_lines(decks: &[Deck]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    decks
        .iter()
        .map(|deck| {
            let marker = if deck.pending_changes { "*" } else { " " };
            format!(
                "{:<13} {marker} {:<32}  {:>4} cards  {}",
                short_id(&deck.id.to_string()),
                truncate(&deck.title, 32),
                deck.card_count,
                format_relative_time(deck.updated_at, now_ms)
            )
        })
        .collect()
}

pub fn format_card_lines(cards: &[Card]) -> Vec<String> {
    cards
        .iter()
        .map(|card| {
            let marker = if card.pending_changes { "*" } else { " " };
            let category = card
                .category
                .as_deref()
                .map(|category| format!("  [{category}]"))
                .unwrap_or_default();
            format!(
                "{:>3}. {:<13} {marker} {}{category}",
                card.order_index,
                short_id(&card.id.to_string()),
                truncate(&card.title, 48)
            )
        })
        .collect()
}

pub fn format_pending_lines(entries: &[PendingChange]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "{:<13}  {:<6}  {:<4}  {}  attempts={}",
                short_id(&entry.id.to_string()),
                entry.op,
                entry.kind,
                short_id(&entry.entity_id),
                entry.attempts
            );
            if entry.stuck {
                line.push_str("  STUCK");
            }
            if let Some(error) = &entry.last_error {
                line.push_str("  last error: ");
                line.push_str(&truncate(error, 60));
            }
            line
        })
        .collect()
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<16}  {}={}  local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.outcome,
                conflict.kind,
                short_id(&conflict.entity_id),
                conflict.local_updated_at,
                conflict.remote_updated_at
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Collapse whitespace and cut to `max_chars`, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format_sync_timestamp(timestamp_ms)
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

pub fn resolve_title(parts: &[String]) -> Result<String, CliError> {
    normalize_text(&parts.join(" ")).ok_or(CliError::EmptyTitle)
}

pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str, kind: &'static str) -> Result<String, CliError> {
    normalize_text(id).ok_or(CliError::EmptyId(kind))
}
