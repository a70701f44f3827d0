//! Deckbox CLI - decks and cards that keep working offline
//!
//! Every command writes to the local store first; `deckbox sync` pushes the
//! queued changes to the configured remote and pulls what changed there.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{CardCommands, Cli, Commands, DeckCommands};
use crate::commands::card::{
    run_card_add, run_card_delete, run_card_edit, run_card_list, run_card_move, CardEdit,
};
use crate::commands::common::{load_engine_config, open_storage, resolve_owner};
use crate::commands::completions::run_completions;
use crate::commands::deck::{run_deck_add, run_deck_delete, run_deck_list, run_deck_rename};
use crate::commands::queue::{run_conflicts, run_discard, run_pending};
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "deckbox=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config = load_engine_config(cli.db_path)?;
    let storage = open_storage(&config).await?;

    match cli.command {
        Commands::Deck { command } => {
            let owner = resolve_owner(cli.owner)?;
            match command {
                DeckCommands::Add { title } => run_deck_add(&storage, &owner, &title).await?,
                DeckCommands::List { json } => run_deck_list(&storage, &owner, json).await?,
                DeckCommands::Rename { id, title } => {
                    run_deck_rename(&storage, &owner, &id, &title).await?;
                }
                DeckCommands::Delete { id } => run_deck_delete(&storage, &owner, &id).await?,
            }
        }
        Commands::Card { command } => {
            let owner = resolve_owner(cli.owner)?;
            match command {
                CardCommands::Add {
                    deck,
                    title,
                    body,
                    category,
                } => run_card_add(&storage, &owner, &deck, &title, &body, category).await?,
                CardCommands::List { deck, json } => {
                    run_card_list(&storage, &owner, &deck, json).await?;
                }
                CardCommands::Edit {
                    id,
                    title,
                    body,
                    category,
                    clear_category,
                } => {
                    let edit = CardEdit {
                        title,
                        body,
                        category,
                        clear_category,
                    };
                    run_card_edit(&storage, &owner, &id, edit).await?;
                }
                CardCommands::Move { id, position } => {
                    run_card_move(&storage, &owner, &id, position).await?;
                }
                CardCommands::Delete { id } => run_card_delete(&storage, &owner, &id).await?,
            }
        }
        Commands::Pending { stuck, json } => run_pending(&storage, stuck, json).await?,
        Commands::Discard { id } => run_discard(&storage, &id).await?,
        Commands::Conflicts { limit, json } => run_conflicts(&storage, limit, json).await?,
        Commands::Sync { json } => {
            let remote = deckbox_core::RemoteConfig::from_env()?;
            run_sync(&storage, &config, remote, json).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
