//! Change notification: telling the monitor that an Inbox item appeared

use crate::queue::layout::{Stage, StorageLayout};
use crate::queue::monitor::MonitorHandle;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Entry point for whatever observes the Inbox.
///
/// Calling it more than once for the same file is harmless.
#[derive(Debug, Clone)]
pub struct InboxNotifier {
    monitor: MonitorHandle,
}

impl InboxNotifier {
    /// Create a notifier feeding `monitor`
    pub fn new(monitor: MonitorHandle) -> Self {
        Self { monitor }
    }

    /// A new item appeared in the Inbox; false once the monitor has stopped
    pub fn on_inbox_item_appeared(&self, path: &Path) -> bool {
        trace!("Inbox item appeared: {}", path.display());
        self.monitor.inbox_changed(path)
    }
}

/// Polls the Inbox and notifies once per newly seen item.
///
/// For writers outside this process; [`EventWriter`](crate::client::EventWriter)
/// notifies directly.
pub struct InboxPoller {
    layout: StorageLayout,
    notifier: InboxNotifier,
    period: Duration,
    seen: HashSet<PathBuf>,
}

impl InboxPoller {
    /// Create a poller listing the Inbox every `period`
    pub fn new(layout: StorageLayout, notifier: InboxNotifier, period: Duration) -> Self {
        Self {
            layout,
            notifier,
            period,
            seen: HashSet::new(),
        }
    }

    /// List the Inbox once, notifying for every item not seen on the
    /// previous poll. Returns how many were notified.
    pub fn poll(&mut self) -> usize {
        let current: HashSet<PathBuf> = match self.layout.list(Stage::Inbox) {
            Ok(items) => items.into_iter().collect(),
            Err(e) => {
                warn!("Failed to list {}: {}", self.layout.dir(Stage::Inbox).display(), e);
                return 0;
            }
        };

        let mut notified = 0;
        for path in current.difference(&self.seen) {
            self.notifier.on_inbox_item_appeared(path);
            notified += 1;
        }
        self.seen = current;
        notified
    }

    /// Spawn the polling task
    pub fn spawn(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let notified = self.poll();
                        if notified > 0 {
                            debug!("Poller found {} new inbox items", notified);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_poll_notifies_each_item_once() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.ensure_directories().unwrap();

        // The receiving end only needs to stay open
        let (monitor, _commands) = MonitorHandle::detached();
        let mut poller = InboxPoller::new(
            layout.clone(),
            InboxNotifier::new(monitor),
            Duration::from_secs(1),
        );

        std::fs::write(layout.dir(Stage::Inbox).join("a.event.json"), b"{}").unwrap();
        assert_eq!(poller.poll(), 1);
        assert_eq!(poller.poll(), 0);

        std::fs::write(layout.dir(Stage::Inbox).join("b.event.json"), b"{}").unwrap();
        std::fs::write(layout.dir(Stage::Inbox).join(".partial"), b"{").unwrap();
        assert_eq!(poller.poll(), 1);
    }
}
