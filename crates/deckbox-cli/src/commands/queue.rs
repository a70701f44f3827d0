use deckbox_core::StorageService;

use crate::commands::common::{
    format_pending_lines, format_sync_conflict_lines, pending_change_to_item, resolve_change,
    sync_conflict_to_item,
};
use crate::error::CliError;

pub async fn run_pending(
    storage: &StorageService,
    stuck: bool,
    json: bool,
) -> Result<(), CliError> {
    let entries = if stuck {
        storage.stuck_changes().await?
    } else {
        storage.pending_changes().await?
    };

    if json {
        let items = entries
            .iter()
            .map(pending_change_to_item)
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entries.is_empty() {
        if stuck {
            println!("No stuck changes.");
        } else {
            println!("Nothing waiting for upload.");
        }
        return Ok(());
    }

    for line in format_pending_lines(&entries) {
        println!("{line}");
    }

    Ok(())
}

pub async fn run_discard(storage: &StorageService, id: &str) -> Result<(), CliError> {
    let entry = resolve_change(id, storage).await?;
    let discarded = storage.discard_change(&entry.id).await?;
    println!(
        "Discarded {} of {} {}",
        discarded.op, discarded.kind, discarded.entity_id
    );
    Ok(())
}

pub async fn run_conflicts(
    storage: &StorageService,
    limit: usize,
    json: bool,
) -> Result<(), CliError> {
    let conflicts = storage.list_conflicts(limit).await?;

    if json {
        let items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }

    Ok(())
}
