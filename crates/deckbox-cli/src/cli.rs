use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "deckbox")]
#[command(about = "Keep decks and cards offline, sync them when the network comes back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Owner whose decks to work with (falls back to DECKBOX_OWNER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub owner: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage decks
    Deck {
        #[command(subcommand)]
        command: DeckCommands,
    },
    /// Manage cards inside a deck
    Card {
        #[command(subcommand)]
        command: CardCommands,
    },
    /// Show changes waiting for upload
    Pending {
        /// Only show entries that keep failing
        #[arg(long)]
        stuck: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a pending change without uploading it
    Discard {
        /// Change ID or unique ID prefix
        id: String,
    },
    /// Show recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync pass against the configured remote
    Sync {
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum DeckCommands {
    /// Create a new deck
    #[command(alias = "new")]
    Add {
        /// Deck title
        title: Vec<String>,
    },
    /// List decks
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a deck's title
    Rename {
        /// Deck ID or unique ID prefix
        id: String,
        /// New title
        title: Vec<String>,
    },
    /// Delete a deck and all of its cards
    Delete {
        /// Deck ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CardCommands {
    /// Append a card to a deck
    #[command(alias = "new")]
    Add {
        /// Deck ID or unique ID prefix
        deck: String,
        /// Card title
        title: String,
        /// Card body
        #[arg(short, long, default_value = "")]
        body: String,
        /// Optional category label
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List the cards of a deck in order
    List {
        /// Deck ID or unique ID prefix
        deck: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a card's content
    Edit {
        /// Card ID or unique ID prefix
        id: String,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New body
        #[arg(short, long)]
        body: Option<String>,
        /// New category label
        #[arg(short, long, conflicts_with = "clear_category")]
        category: Option<String>,
        /// Remove the category label
        #[arg(long)]
        clear_category: bool,
    },
    /// Move a card to another position in its deck
    Move {
        /// Card ID or unique ID prefix
        id: String,
        /// Zero-based target position
        position: u32,
    },
    /// Delete a card
    Delete {
        /// Card ID or unique ID prefix
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
