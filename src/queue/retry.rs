//! Retry bookkeeping: the in-memory retry store and the periodic retry timer

use crate::queue::monitor::MonitorHandle;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Queued items eligible for redelivery on the next timer tick.
///
/// Not persisted: rebuilt from a directory scan on every start. Set semantics,
/// so merging a second scan never duplicates entries. Drain order is
/// unspecified.
#[derive(Debug, Default)]
pub struct RetryStore {
    entries: HashSet<PathBuf>,
}

impl RetryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one path; false if it was already present
    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.entries.insert(path)
    }

    /// Merge scanned paths, returning how many were new
    pub fn merge<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) -> usize {
        paths
            .into_iter()
            .filter(|path| self.entries.insert(path.clone()))
            .count()
    }

    /// Remove and return every entry
    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.entries.drain().collect()
    }

    /// Whether `path` is queued for retry
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains(path)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing awaits retry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted copy of the entries
    pub fn snapshot(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.iter().cloned().collect();
        paths.sort();
        paths
    }
}

/// Periodic driver of [`MonitorHandle::fire_retry_timer`].
///
/// The first sweep is queued by the shipper at start; this task then fires
/// once every `period` until shutdown.
pub struct RetryTimer {
    monitor: MonitorHandle,
    period: Duration,
}

impl RetryTimer {
    /// Create a retry timer for a monitor
    pub fn new(monitor: MonitorHandle, period: Duration) -> Self {
        Self { monitor, period }
    }

    /// Spawn the timer task
    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        trace!("Retry timer fired");
                        if !self.monitor.fire_retry_timer() {
                            debug!("Monitor gone, stopping retry timer");
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }
}
