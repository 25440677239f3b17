//! Queue monitor: the Inbox → Outbox → Sent state machine
//!
//! All bookkeeping happens on one task that consumes a command queue and the
//! uploader's completion queue in arrival order, so the [`RetryStore`] is only
//! ever touched from a single place. The filesystem moves and the uploads
//! themselves run on spawned tasks so independent items fan out.

use crate::config::ShipperConfig;
use crate::error::MoveDirection;
use crate::queue::arbitrator::{rename_item, Arbitrator};
use crate::queue::delegate::Reporter;
use crate::queue::layout::{Stage, StorageLayout};
use crate::queue::preflight::preflight_in;
use crate::queue::retry::RetryStore;
use crate::upload::{UploadOutcome, UploadResult, Uploader};
use crate::{Result, ShipError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Work queued for the monitor task
#[derive(Debug)]
pub(crate) enum MonitorCommand {
    /// A new item appeared in the Inbox
    InboxChanged(PathBuf),
    /// Redrive every retry store entry
    RetryTimerFired,
    /// Seed the retry store from the Inbox and Outbox contents
    Recover,
    /// Keep an item for the next retry tick
    Retain(PathBuf),
    /// Report the current retry store entries
    Snapshot(oneshot::Sender<Vec<PathBuf>>),
}

/// Cheap, clonable handle to a running [`QueueMonitor`].
///
/// Every method only enqueues work; the boolean ones return `false` once the
/// monitor has stopped.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<MonitorCommand>,
}

impl MonitorHandle {
    /// A new item appeared in the Inbox
    pub fn inbox_changed(&self, path: impl Into<PathBuf>) -> bool {
        self.send(MonitorCommand::InboxChanged(path.into()))
    }

    /// Redrive everything in the retry store now
    pub fn fire_retry_timer(&self) -> bool {
        self.send(MonitorCommand::RetryTimerFired)
    }

    /// Rescan the Inbox and Outbox into the retry store.
    ///
    /// Merges with what is already there, so repeated calls never duplicate
    /// entries.
    pub fn recover(&self) -> bool {
        self.send(MonitorCommand::Recover)
    }

    /// Sorted copy of the retry store, empty once the monitor has stopped
    pub async fn retry_entries(&self) -> Vec<PathBuf> {
        let (tx, rx) = oneshot::channel();
        if !self.send(MonitorCommand::Snapshot(tx)) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: MonitorCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<MonitorCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }
}

/// Performs arbitrated moves off the monitor task
#[derive(Clone)]
struct Stager {
    layout: StorageLayout,
    arbitrator: Arc<dyn Arbitrator>,
    uploader: Uploader,
    reporter: Reporter,
    commands: mpsc::UnboundedSender<MonitorCommand>,
}

impl Stager {
    /// Move an Inbox item to the Outbox, then hand it to the uploader
    fn spawn_to_outbox(&self, inbox: PathBuf) {
        let stager = self.clone();
        tokio::spawn(async move { stager.to_outbox(inbox).await });
    }

    /// Move a delivered item to Sent
    fn spawn_to_sent(&self, outbox: PathBuf) {
        let stager = self.clone();
        tokio::spawn(async move { stager.to_sent(outbox).await });
    }

    async fn to_outbox(&self, inbox: PathBuf) {
        let Some(outbox) = self.layout.staged_path(Stage::Outbox, &inbox) else {
            return;
        };

        match self
            .move_item(MoveDirection::ToOutbox, inbox.clone(), outbox.clone())
            .await
        {
            Ok(()) => {
                debug!("Staged {} for upload", outbox.display());
                self.uploader.send(outbox);
            }
            Err(e) => {
                let retain = !e.is_expected();
                self.reporter.report(&e);
                if retain {
                    // Still in the Inbox, try again on the next tick
                    let _ = self.commands.send(MonitorCommand::Retain(inbox));
                }
            }
        }
    }

    async fn to_sent(&self, outbox: PathBuf) {
        let Some(sent) = self.layout.staged_path(Stage::Sent, &outbox) else {
            return;
        };

        match self
            .move_item(MoveDirection::ToSent, outbox, sent.clone())
            .await
        {
            Ok(()) => {
                debug!("Delivered {}", sent.display());
                self.reporter.sent(&sent);
            }
            // The collector has the item already, only housekeeping failed
            Err(e) => self.reporter.report(&e),
        }
    }

    async fn move_item(&self, direction: MoveDirection, from: PathBuf, to: PathBuf) -> Result<()> {
        let arbitrator = Arc::clone(&self.arbitrator);
        let (src, dst) = (from.clone(), to.clone());
        let moved = tokio::task::spawn_blocking(move || {
            let mut apply = rename_item;
            arbitrator.move_exclusive(&src, &dst, &mut apply)
        })
        .await;

        match moved {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ShipError::Move {
                direction,
                from,
                to,
                source,
            }),
            Err(join) => Err(ShipError::Io(io::Error::new(io::ErrorKind::Other, join))),
        }
    }
}

/// The queue state machine.
///
/// Build one with [`QueueMonitor::new`], then [`spawn`](QueueMonitor::spawn)
/// it; drive it through the returned [`MonitorHandle`].
pub struct QueueMonitor {
    layout: StorageLayout,
    retry: RetryStore,
    uploader: Uploader,
    reporter: Reporter,
    stager: Stager,
    commands: mpsc::UnboundedReceiver<MonitorCommand>,
    completions: mpsc::UnboundedReceiver<UploadOutcome>,
}

impl QueueMonitor {
    /// Create a monitor that consumes `completions` from `uploader`
    pub fn new(
        layout: StorageLayout,
        arbitrator: Arc<dyn Arbitrator>,
        uploader: Uploader,
        reporter: Reporter,
        completions: mpsc::UnboundedReceiver<UploadOutcome>,
    ) -> (Self, MonitorHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let stager = Stager {
            layout: layout.clone(),
            arbitrator,
            uploader: uploader.clone(),
            reporter: reporter.clone(),
            commands: commands_tx.clone(),
        };

        let monitor = Self {
            layout,
            retry: RetryStore::new(),
            uploader,
            reporter,
            stager,
            commands,
            completions,
        };
        (monitor, MonitorHandle { commands: commands_tx })
    }

    /// Run the monitor until shutdown
    pub fn spawn(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(command) = self.commands.recv() => self.handle_command(command),
                    Some(outcome) = self.completions.recv() => self.handle_outcome(outcome),
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Queue monitor stopped with {} items pending retry", self.retry.len());
        })
    }

    fn config(&self) -> &ShipperConfig {
        self.reporter.config()
    }

    fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::InboxChanged(path) => {
                trace!("Inbox changed: {}", path.display());
                self.route(path);
            }
            MonitorCommand::RetryTimerFired => self.retry_all(),
            MonitorCommand::Recover => self.recover(),
            MonitorCommand::Retain(path) => {
                self.retry.insert(path);
            }
            MonitorCommand::Snapshot(reply) => {
                let _ = reply.send(self.retry.snapshot());
            }
        }
    }

    fn handle_outcome(&mut self, outcome: UploadOutcome) {
        let UploadOutcome { path, result } = outcome;
        match result {
            UploadResult::Delivered => self.upload_succeeded(path),
            UploadResult::Failed | UploadResult::Deferred => self.upload_failed(path),
        }
    }

    /// Preflight an item and push it one step further along its path
    fn route(&mut self, path: PathBuf) {
        match preflight_in(&path, &self.layout, self.config()) {
            Ok(Stage::Inbox) => self.stager.spawn_to_outbox(path),
            Ok(_) => {
                self.uploader.send(path);
            }
            Err(e) => self.reporter.report(&e.into()),
        }
    }

    fn upload_succeeded(&mut self, path: PathBuf) {
        match preflight_in(&path, &self.layout, self.config()) {
            Ok(Stage::Outbox) => self.stager.spawn_to_sent(path),
            Ok(stage) => debug!("Delivered item {} is in the {}, leaving it", path.display(), stage),
            Err(e) => self.reporter.report(&e.into()),
        }
    }

    fn upload_failed(&mut self, path: PathBuf) {
        if self.uploader.is_busy(&path) {
            // Another attempt for this item is still running and will report
            debug!("{} is still uploading, not retaining", path.display());
            return;
        }
        match preflight_in(&path, &self.layout, self.config()) {
            Ok(_) => {
                self.retry.insert(path);
            }
            Err(e) => self.reporter.report(&e.into()),
        }
    }

    fn retry_all(&mut self) {
        let entries = self.retry.drain();
        if entries.is_empty() {
            return;
        }
        debug!("Retrying {} queued items", entries.len());
        for path in entries {
            self.route(path);
        }
    }

    fn recover(&mut self) {
        let mut found = Vec::new();
        for stage in [Stage::Inbox, Stage::Outbox] {
            match self.layout.list(stage) {
                Ok(items) => found.extend(items),
                Err(e) => self.reporter.report(&ShipError::Io(e)),
            }
        }
        found.retain(|path| !self.uploader.is_busy(path));

        let added = self.retry.merge(found);
        if added > 0 {
            info!("Recovered {} queued items from {}", added, self.layout.root().display());
        }
    }

    #[cfg(test)]
    fn pending(&self) -> Vec<PathBuf> {
        self.retry.snapshot()
    }

    #[cfg(test)]
    fn is_pending(&self, path: &std::path::Path) -> bool {
        self.retry.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::arbitrator::LocalArbitrator;
    use crate::queue::delegate::ErrorDelegate;
    use crate::upload::{Transport, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reqwest::Url;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Notify;

    struct GatedTransport {
        gate: Arc<Notify>,
        status: u16,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn put(&self, _url: Url, _body: Bytes) -> std::result::Result<u16, TransportError> {
            self.gate.notified().await;
            Ok(self.status)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ErrorDelegate for Recorder {
        fn on_error(&self, _config: &ShipperConfig, error: &ShipError) {
            self.0.lock().push(error.to_string());
        }
    }

    struct Fixture {
        _dir: TempDir,
        layout: StorageLayout,
        monitor: QueueMonitor,
        gate: Arc<Notify>,
        errors: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let mut config = ShipperConfig::default();
        config.storage.base_directory = dir.path().to_path_buf();
        config.endpoint.signing_key = Some("secret".to_string());
        let config = Arc::new(config);

        let layout = StorageLayout::from_config(&config);
        layout.ensure_directories().unwrap();

        let errors = Arc::new(Recorder::default());
        let reporter = Reporter::new(config, errors.clone(), None);
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(GatedTransport {
            gate: gate.clone(),
            status: 500,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let uploader = Uploader::new(transport, reporter.clone(), tx).unwrap();
        let (monitor, _handle) = QueueMonitor::new(
            layout.clone(),
            Arc::new(LocalArbitrator::new()),
            uploader,
            reporter,
            rx,
        );

        Fixture {
            _dir: dir,
            layout,
            monitor,
            gate,
            errors,
        }
    }

    fn put(layout: &StorageLayout, stage: Stage, name: &str) -> PathBuf {
        let path = layout.dir(stage).join(name);
        std::fs::write(&path, b"{\"message\":\"boom\"}").unwrap();
        path
    }

    #[tokio::test]
    async fn test_recover_is_idempotent() {
        let mut f = fixture();
        let inbox = put(&f.layout, Stage::Inbox, "a.event.json");
        let outbox = put(&f.layout, Stage::Outbox, "b.event.json");
        put(&f.layout, Stage::Outbox, ".hidden.json");
        put(&f.layout, Stage::Sent, "c.event.json");

        f.monitor.recover();
        let first = f.monitor.pending();
        f.monitor.recover();

        assert_eq!(first, vec![inbox, outbox]);
        assert_eq!(f.monitor.pending(), first);
    }

    #[tokio::test]
    async fn test_recover_skips_items_being_uploaded() {
        let mut f = fixture();
        let outbox = put(&f.layout, Stage::Outbox, "b.event.json");

        f.monitor.uploader.send(outbox.clone());
        while f.monitor.uploader.in_flight_len() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        f.monitor.recover();
        assert!(!f.monitor.is_pending(&outbox));

        f.gate.notify_one();
        let outcome = f.monitor.completions.recv().await.unwrap();
        f.monitor.handle_outcome(outcome);
        assert!(f.monitor.is_pending(&outbox));
    }

    #[tokio::test]
    async fn test_failed_upload_of_vanished_item_is_dropped_silently() {
        let mut f = fixture();
        let gone = f.layout.dir(Stage::Outbox).join("gone.event.json");

        f.monitor.handle_outcome(UploadOutcome {
            path: gone.clone(),
            result: UploadResult::Failed,
        });

        assert!(!f.monitor.is_pending(&gone));
        assert!(f.errors.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_item_is_reported_and_not_retried() {
        let mut f = fixture();
        let wrong = put(&f.layout, Stage::Inbox, "notes.txt");

        f.monitor.handle_command(MonitorCommand::InboxChanged(wrong.clone()));

        assert!(!f.monitor.is_pending(&wrong));
        assert!(wrong.exists());
        assert_eq!(f.errors.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retain_keeps_item_for_next_tick() {
        let mut f = fixture();
        let inbox = put(&f.layout, Stage::Inbox, "a.event.json");

        f.monitor.handle_command(MonitorCommand::Retain(inbox.clone()));
        assert!(f.monitor.is_pending(&inbox));

        f.monitor.handle_command(MonitorCommand::RetryTimerFired);
        assert!(f.monitor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_monitor() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = MonitorHandle { commands: tx };
        drop(rx);

        assert!(!handle.fire_retry_timer());
        assert!(!handle.inbox_changed("/q/Inbox/a.json"));
        assert!(handle.retry_entries().await.is_empty());
    }
}
