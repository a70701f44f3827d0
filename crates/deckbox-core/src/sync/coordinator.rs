//! Sync coordinator: upload the pending-change queue, then pull remote deltas.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::SyncOptions;
use crate::connectivity::{ConnectionQuality, ConnectivityMonitor};
use crate::error::{Error, Result};
use crate::events::{Subscribers, Subscription};
use crate::models::{ChangeOp, Entity, OwnerId, PendingChange};
use crate::remote::{RemoteError, RemoteRecord, RemoteResult, RemoteStore, Session};
use crate::services::{RemoteApply, StorageService};
use crate::state::SyncState;

/// What started a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    /// Explicit `sync()` call
    Manual,
    /// Connectivity came back
    Reconnect,
    /// Periodic timer
    Timer,
    /// The application returned to the foreground
    Foreground,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Reconnect => "reconnect",
            Self::Timer => "timer",
            Self::Foreground => "foreground",
        })
    }
}

/// Outcome of one completed sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Queue entries the remote store accepted
    pub uploaded: usize,
    /// Remote records applied locally
    pub downloaded: usize,
    /// Upload attempts that failed and stay queued
    pub failed: usize,
    /// Remote records that lost to unsynced local work
    pub conflicts: usize,
    /// Entries flagged stuck once the pass finished
    pub stuck: usize,
    /// The download phase did not run (link lost, slow link, fetch failed)
    pub skipped_download: bool,
}

enum Command {
    Sync(SyncTrigger),
    Stop,
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    connectivity: Subscription,
}

struct Inner {
    storage: StorageService,
    remote: Arc<dyn RemoteStore>,
    session: Arc<dyn Session>,
    monitor: ConnectivityMonitor,
    options: SyncOptions,
    syncing: AtomicBool,
    on_start: Subscribers<SyncTrigger>,
    on_complete: Subscribers<SyncReport>,
    on_error: Subscribers<Error>,
    runtime: Mutex<Option<Running>>,
}

/// Holds the Syncing flag for the duration of one pass.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives sync passes between the local store and a remote store.
///
/// Cheap to clone; clones share one Idle/Syncing state, so at most one pass
/// runs at a time no matter which clone or trigger asks for it.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(
        storage: StorageService,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn Session>,
        monitor: ConnectivityMonitor,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                remote,
                session,
                monitor,
                options,
                syncing: AtomicBool::new(false),
                on_start: Subscribers::new(),
                on_complete: Subscribers::new(),
                on_error: Subscribers::new(),
                runtime: Mutex::new(None),
            }),
        }
    }

    pub fn storage(&self) -> &StorageService {
        &self.inner.storage
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_flag(self.inner.syncing.load(Ordering::Acquire))
    }

    /// Run one pass now.
    ///
    /// Returns `Ok(None)` without firing any callback when offline or when a
    /// pass is already running.
    pub async fn sync(&self) -> Result<Option<SyncReport>> {
        self.sync_with(SyncTrigger::Manual).await
    }

    pub async fn sync_with(&self, trigger: SyncTrigger) -> Result<Option<SyncReport>> {
        self.inner.sync_with(trigger).await
    }

    pub fn on_sync_start(
        &self,
        callback: impl Fn(&SyncTrigger) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.on_start.subscribe(callback)
    }

    pub fn on_sync_complete(
        &self,
        callback: impl Fn(&SyncReport) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.on_complete.subscribe(callback)
    }

    /// Called for passes that fail outright, such as rejected credentials.
    pub fn on_sync_error(&self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Subscription {
        self.inner.on_error.subscribe(callback)
    }

    /// Spawn the background trigger loop on the current tokio runtime.
    ///
    /// The loop syncs on every offline-to-online transition, every
    /// `interval_secs` and every [`Self::foreground`] call. If the monitor is
    /// already online, a first pass runs right away. Calling `start` twice is
    /// a no-op.
    pub fn start(&self) {
        let mut runtime = self.inner.runtime();
        if runtime.is_some() {
            tracing::debug!("Sync loop already running");
            return;
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let reconnects = commands.clone();
        let was_online = AtomicBool::new(false);
        let connectivity = self.inner.monitor.subscribe(move |state| {
            let before = was_online.swap(state.online, Ordering::AcqRel);
            if state.online && !before {
                // The loop is gone only during shutdown
                let _ = reconnects.send(Command::Sync(SyncTrigger::Reconnect));
            }
        });

        let task = tokio::spawn(run_loop(
            Arc::downgrade(&self.inner),
            receiver,
            self.inner.options.interval(),
        ));
        *runtime = Some(Running {
            commands,
            task,
            connectivity,
        });
        tracing::info!("Sync loop started");
    }

    pub fn is_running(&self) -> bool {
        self.inner.runtime().is_some()
    }

    /// Ask the background loop for a pass after the app was foregrounded.
    pub fn foreground(&self) {
        match self.inner.runtime().as_ref() {
            Some(running) => {
                let _ = running.commands.send(Command::Sync(SyncTrigger::Foreground));
            }
            None => tracing::debug!("Foreground ignored: sync loop not running"),
        }
    }

    /// Stop the background loop, release the connectivity subscription and
    /// drop every sync event subscriber.
    pub async fn shutdown(&self) {
        let running = self.inner.runtime().take();
        if let Some(Running {
            commands,
            task,
            connectivity,
        }) = running
        {
            connectivity.unsubscribe();
            let _ = commands.send(Command::Stop);
            if let Err(error) = task.await {
                tracing::warn!("Sync loop ended abnormally: {error}");
            }
            tracing::info!("Sync loop stopped");
        }

        self.inner.on_start.clear();
        self.inner.on_complete.clear();
        self.inner.on_error.clear();
    }
}

async fn run_loop(
    inner: Weak<Inner>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    period: Option<Duration>,
) {
    let mut ticker = period.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let trigger = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Sync(trigger)) => trigger,
                Some(Command::Stop) | None => break,
            },
            () = next_tick(ticker.as_mut()) => SyncTrigger::Timer,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(error) = inner.sync_with(trigger).await {
            tracing::debug!("{trigger} sync pass failed: {error}");
        }
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Inner {
    fn runtime(&self) -> MutexGuard<'_, Option<Running>> {
        self.runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn sync_with(&self, trigger: SyncTrigger) -> Result<Option<SyncReport>> {
        if self.monitor.is_offline() {
            tracing::debug!("Skipping {trigger} sync: offline");
            return Ok(None);
        }
        let Some(pass) = PassGuard::acquire(&self.syncing) else {
            tracing::debug!("Skipping {trigger} sync: a pass is already running");
            return Ok(None);
        };

        self.on_start.emit(&trigger);
        let result = self.run_pass(trigger).await;
        drop(pass);

        match result {
            Ok(report) => {
                tracing::info!(
                    "Sync ({trigger}): {} uploaded, {} downloaded, {} failed, {} conflicts",
                    report.uploaded,
                    report.downloaded,
                    report.failed,
                    report.conflicts
                );
                self.on_complete.emit(&report);
                Ok(Some(report))
            }
            Err(error) => {
                tracing::error!("Sync ({trigger}) aborted: {error}");
                self.on_error.emit(&error);
                Err(error)
            }
        }
    }

    async fn run_pass(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        let owner = self
            .session
            .owner_id()
            .filter(|owner| !owner.is_blank())
            .ok_or_else(|| Error::Auth("no signed-in owner".to_string()))?;

        let mut report = SyncReport::default();
        let link_lost = self.upload(&owner, &mut report).await?;

        if link_lost {
            report.skipped_download = true;
        } else if trigger == SyncTrigger::Timer
            && self.options.defer_download_on_slow_link
            && self.monitor.connection_quality() == ConnectionQuality::Slow
        {
            tracing::debug!("Deferring download on a slow link");
            report.skipped_download = true;
        } else {
            self.download(&owner, &mut report).await?;
        }

        report.stuck = self.storage.stuck_changes().await?.len();
        Ok(report)
    }

    /// Upload phase. Returns `true` when the link went down mid-phase.
    async fn upload(&self, owner: &OwnerId, report: &mut SyncReport) -> Result<bool> {
        for entry in self.storage.pending_changes().await? {
            match self.push(owner, &entry).await {
                Ok(()) => {
                    self.storage.confirm_upload(&entry).await?;
                    report.uploaded += 1;
                }
                Err(error @ RemoteError::Auth(_)) => return Err(error.into()),
                Err(error @ RemoteError::NotFound(_)) if entry.op == ChangeOp::Update => {
                    // Deleted remotely, or never arrived; the download decides
                    tracing::info!(
                        "{} {} is missing remotely; queueing it as a create",
                        entry.kind,
                        entry.entity_id
                    );
                    self.storage
                        .requeue_as_create(&entry, &error.to_string())
                        .await?;
                    report.failed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        "Upload of {} {} {} failed: {error}",
                        entry.op,
                        entry.kind,
                        entry.entity_id
                    );
                    self.storage
                        .record_failure(&entry.id, &error.to_string())
                        .await?;
                    report.failed += 1;

                    if error.is_transport() && self.monitor.is_offline() {
                        tracing::info!("Link lost during upload; stopping the pass early");
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    async fn push(&self, owner: &OwnerId, entry: &PendingChange) -> RemoteResult<()> {
        let kind = entry.kind;
        let id = entry.entity_id.as_str();

        let record = match (entry.op, &entry.payload) {
            (ChangeOp::Delete, _) => {
                return match self.call(self.remote.delete_remote(owner, kind, id)).await {
                    Err(RemoteError::NotFound(_)) => {
                        tracing::debug!("{kind} {id} was already gone remotely");
                        Ok(())
                    }
                    other => other,
                };
            }
            (_, Some(payload)) => remote_copy(payload),
            (op, None) => {
                return Err(RemoteError::Rejected(format!(
                    "{op} of {kind} {id} carries no record"
                )));
            }
        };

        if entry.op == ChangeOp::Create {
            self.call(self.remote.create_remote(owner, &record)).await
        } else {
            self.call(self.remote.update_remote(owner, kind, id, &record))
                .await
        }
    }

    async fn download(&self, owner: &OwnerId, report: &mut SyncReport) -> Result<()> {
        let checkpoint = self.storage.checkpoint(owner).await?;
        let changes = match self
            .call(self.remote.fetch_changed_since(owner, checkpoint))
            .await
        {
            Ok(changes) => changes,
            Err(error @ RemoteError::Auth(_)) => return Err(error.into()),
            Err(error) => {
                tracing::warn!("Fetching remote changes failed: {error}");
                report.skipped_download = true;
                return Ok(());
            }
        };

        let high_water = changes.records.iter().map(RemoteRecord::updated_at).max();
        let mut records = changes.records;
        records.sort_by_key(RemoteRecord::apply_rank);

        let mut touched_decks = BTreeSet::new();
        for record in records {
            let deck_id = match &record {
                RemoteRecord::Live(Entity::Card(card)) => Some(card.deck_id),
                _ => None,
            };
            match self.storage.apply_remote(record).await? {
                RemoteApply::Applied => {
                    report.downloaded += 1;
                    touched_decks.extend(deck_id);
                }
                RemoteApply::Conflict(_) => report.conflicts += 1,
                RemoteApply::Unchanged | RemoteApply::KeptLocal | RemoteApply::Skipped => {}
            }
        }

        for deck_id in &touched_decks {
            self.storage.settle_order(deck_id).await?;
        }

        if let Some(next) = changes.checkpoint.or(high_water) {
            let next = checkpoint.map_or(next, |previous| previous.max(next));
            self.storage.set_checkpoint(owner, next).await?;
        }
        Ok(())
    }

    /// Bound a remote call by the configured timeout.
    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        let limit = self.options.remote_timeout();
        tokio::time::timeout(limit, request)
            .await
            .unwrap_or_else(|_| Err(RemoteError::Timeout(format!("no answer within {limit:?}"))))
    }
}

/// The record as the remote side will hold it once accepted.
fn remote_copy(payload: &Entity) -> Entity {
    let mut record = payload.clone();
    record.set_sync_flags(true, false);
    record
}
