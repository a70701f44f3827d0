use deckbox_core::models::{CardPatch, ChangeOp};
use deckbox_core::{EngineConfig, OwnerId, StorageService, SyncReport};
use pretty_assertions::assert_eq;

use crate::cli::CompletionShell;
use crate::commands::card::{add_card, move_card, CardEdit};
use crate::commands::common::{
    format_pending_lines, format_relative_time, format_sync_timestamp, load_engine_config,
    normalize_identifier, normalize_text, owner_from, pick_by_prefix, resolve_card,
    resolve_change, resolve_deck, resolve_title, short_id, truncate,
};
use crate::commands::completions::render_completions;
use crate::commands::deck::{rename_deck, run_deck_delete};
use crate::commands::queue::run_discard;
use crate::commands::sync::{format_sync_report, run_sync};
use crate::error::CliError;

fn owner() -> OwnerId {
    OwnerId::new("user-1")
}

fn words(text: &str) -> Vec<String> {
    text.split(' ').map(ToString::to_string).collect()
}

#[test]
fn normalize_text_trims_and_rejects_empty() {
    assert_eq!(normalize_text("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_text(" \n\t "), None);
}

#[test]
fn resolve_title_joins_words() {
    assert_eq!(
        resolve_title(&words("Trip to Lisbon")).unwrap(),
        "Trip to Lisbon"
    );
    assert!(matches!(
        resolve_title(&["  ".to_string()]),
        Err(CliError::EmptyTitle)
    ));
}

#[test]
fn normalize_identifier_rejects_empty() {
    assert!(matches!(
        normalize_identifier(" \n ", "Deck"),
        Err(CliError::EmptyId("Deck"))
    ));
    assert_eq!(normalize_identifier("  abc123  ", "Deck").unwrap(), "abc123");
}

#[test]
fn owner_flag_beats_environment() {
    let owner = owner_from(Some("flag".to_string()), Some("env".to_string())).unwrap();
    assert_eq!(owner.as_str(), "flag");

    let owner = owner_from(Some("  ".to_string()), Some("env".to_string())).unwrap();
    assert_eq!(owner.as_str(), "env");

    assert!(matches!(
        owner_from(None, None),
        Err(CliError::OwnerNotConfigured)
    ));
}

#[test]
fn short_id_keeps_prefix() {
    assert_eq!(
        short_id("0190d6a2-1c3e-7b4a-9f00-123456789abc"),
        "0190d6a2-1c3e"
    );
    assert_eq!(short_id("abc"), "abc");
}

#[test]
fn truncate_collapses_whitespace_and_cuts() {
    assert_eq!(truncate("  two \n words ", 20), "two words");
    assert_eq!(truncate("abcdefghij", 8), "abcde...");
}

#[test]
fn format_sync_timestamp_renders_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_sync_timestamp(i64::MAX), i64::MAX.to_string());
}

#[test]
fn format_relative_time_buckets() {
    let now = 1_700_000_000_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(0, now), "1970-01-01");
}

#[test]
fn pick_by_prefix_resolves_unique_ambiguous_and_missing() {
    let ids = vec![
        "aaaaaaaa-aaaa-7aaa-8aaa-aaaaaaaaaaaa".to_string(),
        "aaaaaaaa-aaaa-7aaa-8aaa-bbbbbbbbbbbb".to_string(),
        "cccccccc-cccc-7ccc-8ccc-cccccccccccc".to_string(),
    ];

    let picked = pick_by_prefix(
        "aaaaaaaa-aaaa-7aaa-8aaa-b",
        "Deck",
        ids.clone(),
        Clone::clone,
    )
    .unwrap();
    assert_eq!(picked, ids[1]);

    let error = pick_by_prefix("aaaa", "Deck", ids.clone(), Clone::clone).unwrap_err();
    let CliError::AmbiguousId(message) = error else {
        panic!("expected an ambiguity error");
    };
    assert!(message.contains("aaaaaaaa-aaaa"));

    let error = pick_by_prefix("dd", "Deck", ids, Clone::clone).unwrap_err();
    assert!(matches!(error, CliError::NotFound { kind: "Deck", .. }));
}

#[test]
fn card_edit_builds_patch() {
    let patch = CardEdit {
        title: Some("  Flights ".to_string()),
        clear_category: true,
        ..CardEdit::default()
    }
    .into_patch()
    .unwrap();
    assert_eq!(
        patch,
        CardPatch {
            title: Some("Flights".to_string()),
            category: Some(None),
            ..CardPatch::default()
        }
    );

    let patch = CardEdit {
        category: Some("travel".to_string()),
        ..CardEdit::default()
    }
    .into_patch()
    .unwrap();
    assert_eq!(patch.category, Some(Some("travel".to_string())));
}

#[test]
fn card_edit_rejects_empty_requests() {
    assert!(matches!(
        CardEdit::default().into_patch(),
        Err(CliError::NothingToEdit)
    ));
    assert!(matches!(
        CardEdit {
            title: Some(" ".to_string()),
            ..CardEdit::default()
        }
        .into_patch(),
        Err(CliError::EmptyTitle)
    ));
}

#[test]
fn completions_name_the_binary() {
    for shell in [
        CompletionShell::Bash,
        CompletionShell::Zsh,
        CompletionShell::Fish,
    ] {
        let script = String::from_utf8(render_completions(shell)).unwrap();
        assert!(script.contains("deckbox"));
    }
}

#[test]
fn db_path_flag_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flag.db");
    let config = load_engine_config(Some(path.clone())).unwrap();
    assert_eq!(config.database_path, Some(path));
}

#[test]
fn sync_report_mentions_stuck_and_skipped_work() {
    let quiet = format_sync_report(&SyncReport {
        uploaded: 2,
        ..SyncReport::default()
    });
    assert_eq!(
        quiet,
        vec!["Uploaded 2, downloaded 0, failed 0, conflicts 0".to_string()]
    );

    let noisy = format_sync_report(&SyncReport {
        failed: 1,
        stuck: 1,
        skipped_download: true,
        ..SyncReport::default()
    });
    assert_eq!(noisy.len(), 3);
    assert!(noisy[2].contains("pending --stuck"));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_deck_supports_exact_and_prefix_id() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let deck = storage.create_deck(&owner(), "Trip").await.unwrap();
    let full = deck.id.to_string();

    let by_exact = resolve_deck(&full, &owner(), &storage).await.unwrap();
    assert_eq!(by_exact.id, deck.id);

    let by_prefix = resolve_deck(&full[..30], &owner(), &storage).await.unwrap();
    assert_eq!(by_prefix.id, deck.id);

    let error = resolve_deck("zzzz", &owner(), &storage).await.unwrap_err();
    assert!(matches!(error, CliError::NotFound { kind: "Deck", .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_deck_ignores_other_owners() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let deck = storage
        .create_deck(&OwnerId::new("someone-else"), "Private")
        .await
        .unwrap();
    let prefix = deck.id.to_string()[..30].to_string();

    let error = resolve_deck(&prefix, &owner(), &storage).await.unwrap_err();
    assert!(matches!(error, CliError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_deck_rejects_ambiguous_prefix() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let first = storage.create_deck(&owner(), "Trip").await.unwrap();
    storage.create_deck(&owner(), "Work").await.unwrap();

    // UUID v7 ids created together share their timestamp prefix.
    let prefix = first.id.to_string()[..4].to_string();
    let error = resolve_deck(&prefix, &owner(), &storage).await.unwrap_err();
    assert!(matches!(error, CliError::AmbiguousId(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_deck_updates_title_and_queues_change() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let deck = storage.create_deck(&owner(), "Trip").await.unwrap();

    let renamed = rename_deck(
        &storage,
        &owner(),
        &deck.id.to_string(),
        &words("Lisbon trip"),
    )
    .await
    .unwrap();
    assert_eq!(renamed.title, "Lisbon trip");

    // The rename collapses into the queued create.
    let pending = storage.pending_changes().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].op, ChangeOp::Create);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_and_move_cards_by_prefix() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let deck = storage.create_deck(&owner(), "Trip").await.unwrap();
    let deck_query = deck.id.to_string()[..30].to_string();

    let flights = add_card(&storage, &owner(), &deck_query, "Flights", "", None)
        .await
        .unwrap();
    let hotel = add_card(
        &storage,
        &owner(),
        &deck_query,
        "Hotel",
        " Book early ",
        Some("stay".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(flights.order_index, 0);
    assert_eq!(hotel.order_index, 1);
    assert_eq!(hotel.body, "Book early");

    let moved = move_card(&storage, &owner(), &hotel.id.to_string(), 0)
        .await
        .unwrap();
    assert_eq!(moved.order_index, 0);

    let titles = storage
        .list_cards_for_deck(&deck.id)
        .await
        .unwrap()
        .into_iter()
        .map(|card| card.title)
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["Hotel".to_string(), "Flights".to_string()]);

    let card_prefix = flights.id.to_string()[..30].to_string();
    let resolved = resolve_card(&card_prefix, &owner(), &storage).await.unwrap();
    assert_eq!(resolved.id, flights.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_card_rejects_blank_title() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let deck = storage.create_deck(&owner(), "Trip").await.unwrap();

    let error = add_card(&storage, &owner(), &deck.id.to_string(), "  ", "", None)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::EmptyTitle));
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_lines_and_discard_by_prefix() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let deck = storage.create_deck(&owner(), "Trip").await.unwrap();

    let pending = storage.pending_changes().await.unwrap();
    let lines = format_pending_lines(&pending);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("create"));
    assert!(lines[0].contains("deck"));

    let change_prefix = pending[0].id.to_string()[..30].to_string();
    let entry = resolve_change(&change_prefix, &storage).await.unwrap();
    assert_eq!(entry.entity_id, deck.id.to_string());

    run_discard(&storage, &change_prefix).await.unwrap();
    assert_eq!(storage.pending_count().await.unwrap(), 0);

    let error = resolve_change(&change_prefix, &storage).await.unwrap_err();
    assert!(matches!(error, CliError::NotFound { kind: "Change", .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn deck_delete_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deckbox.db");
    let config = EngineConfig::default();

    let deck_id = {
        let storage = StorageService::open_path(&path, &config).await.unwrap();
        let deck = storage.create_deck(&owner(), "Trip").await.unwrap();
        storage
            .create_card(&deck.id, deckbox_core::models::NewCard::new("Flights", ""))
            .await
            .unwrap();
        run_deck_delete(&storage, &owner(), &deck.id.to_string())
            .await
            .unwrap();
        deck.id
    };

    let storage = StorageService::open_path(&path, &config).await.unwrap();
    assert!(storage.get_deck(&deck_id).await.unwrap().is_none());
    assert!(storage
        .list_decks_for_owner(&owner())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_remote_configuration() {
    let storage = StorageService::open_in_memory().await.unwrap();
    let error = run_sync(&storage, &EngineConfig::default(), None, false)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::SyncNotConfigured));
}
