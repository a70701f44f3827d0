//! Shared sync state types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sync coordinator state, as observed by the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
}

impl SyncState {
    pub(crate) const fn from_flag(syncing: bool) -> Self {
        if syncing {
            Self::Syncing
        } else {
            Self::Idle
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
        })
    }
}
