//! Appends encoded events to the Inbox

use crate::queue::delegate::Reporter;
use crate::queue::layout::{Stage, StorageLayout};
use crate::queue::notifier::InboxNotifier;
use crate::types::Event;
use crate::{Result, ShipError};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Writes events into the Inbox and signals the monitor
#[derive(Debug, Clone)]
pub struct EventWriter {
    layout: StorageLayout,
    extension: String,
    notifier: InboxNotifier,
    reporter: Reporter,
}

impl EventWriter {
    /// Create a writer for `layout`, naming items with the configured extension
    pub fn new(layout: StorageLayout, reporter: Reporter, notifier: InboxNotifier) -> Self {
        let extension = reporter.config().item.normalized_extension().to_string();
        Self {
            layout,
            extension,
            notifier,
            reporter,
        }
    }

    /// Encode `event` and queue it, returning its path in the Inbox.
    ///
    /// The item only becomes visible under its final name once fully
    /// written. Failures are reported to the error delegate and returned.
    pub fn append(&self, event: &Event) -> Result<PathBuf> {
        match self.write(event) {
            Ok(path) => {
                debug!("Queued event {} as {}", event.incident, path.display());
                self.notifier.on_inbox_item_appeared(&path);
                Ok(path)
            }
            Err(e) => {
                self.reporter.report(&e);
                Err(e)
            }
        }
    }

    fn write(&self, event: &Event) -> Result<PathBuf> {
        let bytes = event.to_json()?;

        let name = format!("{}.event.{}", Uuid::new_v4(), self.extension);
        let inbox = self.layout.dir(Stage::Inbox);
        let path = inbox.join(&name);
        let partial = inbox.join(format!(".{}.partial", name));

        let written = std::fs::write(&partial, &bytes).and_then(|_| std::fs::rename(&partial, &path));
        if let Err(source) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(ShipError::Write { path, source });
        }
        Ok(path)
    }
}
