use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] deckbox_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No title provided")]
    EmptyTitle,
    #[error("{0} ID cannot be empty")]
    EmptyId(&'static str),
    #[error("{kind} not found for id/prefix: {query}")]
    NotFound { kind: &'static str, query: String },
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Nothing to change; pass --title, --body, --category or --clear-category")]
    NothingToEdit,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No owner configured. Pass --owner or set DECKBOX_OWNER_ID.")]
    OwnerNotConfigured,
    #[error(
        "Sync is not configured. Set DECKBOX_REMOTE_URL, DECKBOX_AUTH_TOKEN and DECKBOX_OWNER_ID."
    )]
    SyncNotConfigured,
}
