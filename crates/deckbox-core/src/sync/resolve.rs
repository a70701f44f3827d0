//! Per-record last-write-wins decision for the download phase.

/// What the local side holds for an entity the server reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    pub updated_at: i64,
    /// A local edit is waiting for upload (flag set or ledger entry present)
    pub pending: bool,
}

/// Outcome of comparing a remote record with the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Overwrite the local copy with the remote one
    TakeRemote,
    /// Keep the local copy; `conflict` when it holds unsynced edits
    KeepLocal { conflict: bool },
    /// Both sides already agree
    Unchanged,
}

/// Decide between the local and remote copies of one entity.
///
/// Unsynced local edits always win. Otherwise the newer timestamp wins, and
/// an equal timestamp goes to the remote copy.
pub const fn resolve(
    local: Option<LocalState>,
    remote_updated_at: i64,
    identical: bool,
) -> Decision {
    let Some(local) = local else {
        return Decision::TakeRemote;
    };
    if identical {
        return Decision::Unchanged;
    }
    if local.pending {
        return Decision::KeepLocal { conflict: true };
    }
    if remote_updated_at >= local.updated_at {
        Decision::TakeRemote
    } else {
        Decision::KeepLocal { conflict: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn local(updated_at: i64, pending: bool) -> Option<LocalState> {
        Some(LocalState {
            updated_at,
            pending,
        })
    }

    #[test]
    fn missing_local_copy_takes_remote() {
        assert_eq!(resolve(None, 10, false), Decision::TakeRemote);
    }

    #[test]
    fn newer_remote_wins_without_pending_changes() {
        assert_eq!(resolve(local(10, false), 20, false), Decision::TakeRemote);
    }

    #[test]
    fn pending_local_wins_regardless_of_timestamp() {
        assert_eq!(
            resolve(local(10, true), 20, false),
            Decision::KeepLocal { conflict: true }
        );
        assert_eq!(
            resolve(local(30, true), 20, false),
            Decision::KeepLocal { conflict: true }
        );
    }

    #[test]
    fn equal_timestamps_go_to_remote() {
        assert_eq!(resolve(local(10, false), 10, false), Decision::TakeRemote);
    }

    #[test]
    fn older_remote_keeps_local_quietly() {
        assert_eq!(
            resolve(local(30, false), 20, false),
            Decision::KeepLocal { conflict: false }
        );
    }

    #[test]
    fn identical_copies_are_unchanged() {
        assert_eq!(resolve(local(10, true), 10, true), Decision::Unchanged);
        assert_eq!(resolve(local(10, false), 10, true), Decision::Unchanged);
    }
}
