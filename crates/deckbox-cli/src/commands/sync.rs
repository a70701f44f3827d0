use std::sync::Arc;

use deckbox_core::{
    ConnectivityMonitor, EngineConfig, HttpRemoteStore, RemoteConfig, StorageService,
    SyncCoordinator, SyncReport,
};

use crate::error::CliError;

pub async fn run_sync(
    storage: &StorageService,
    config: &EngineConfig,
    remote: Option<RemoteConfig>,
    json: bool,
) -> Result<(), CliError> {
    let remote = remote.ok_or(CliError::SyncNotConfigured)?;
    let store = HttpRemoteStore::from_config(&remote, config.sync.remote_timeout())
        .map_err(deckbox_core::Error::from)?;

    let coordinator = SyncCoordinator::new(
        storage.clone(),
        Arc::new(store),
        Arc::new(remote.owner_id),
        ConnectivityMonitor::new(true),
        config.sync,
    );

    let Some(report) = coordinator.sync().await? else {
        println!("Sync skipped.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_sync_report(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_sync_report(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Uploaded {}, downloaded {}, failed {}, conflicts {}",
        report.uploaded, report.downloaded, report.failed, report.conflicts
    )];
    if report.skipped_download {
        lines.push("Download skipped; remote changes will arrive on the next sync.".to_string());
    }
    if report.stuck > 0 {
        lines.push(format!(
            "{} change(s) keep failing; see `deckbox pending --stuck`.",
            report.stuck
        ));
    }
    lines
}
