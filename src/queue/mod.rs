//! The durable event queue
//!
//! Items move `Inbox → Outbox → Sent`; the directory an item sits in is its
//! delivery state. [`EventShipper`] wires the pieces together and owns the
//! background tasks.

pub mod arbitrator;
pub mod delegate;
pub mod layout;
pub mod monitor;
pub mod notifier;
pub mod preflight;
pub mod retry;

use crate::client::{EventLogger, EventWriter};
use crate::config::ShipperConfig;
use crate::upload::{HttpTransport, InFlightTable, Transport, Uploader};
use crate::{Result, ShipError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use arbitrator::{Arbitrator, FileLockArbitrator, LocalArbitrator};
pub use delegate::{ErrorDelegate, Reporter, SuccessDelegate, TracingErrorDelegate};
pub use layout::{Stage, StorageLayout};
pub use monitor::{MonitorHandle, QueueMonitor};
pub use notifier::{InboxNotifier, InboxPoller};
pub use preflight::{preflight, PreflightError};
pub use retry::{RetryStore, RetryTimer};

/// Builder for [`EventShipper`]
pub struct EventShipperBuilder {
    config: ShipperConfig,
    transport: Option<Arc<dyn Transport>>,
    arbitrator: Option<Arc<dyn Arbitrator>>,
    error_delegate: Arc<dyn ErrorDelegate>,
    success_delegate: Option<Arc<dyn SuccessDelegate>>,
    poll_interval: Option<Duration>,
}

impl EventShipperBuilder {
    /// Use a custom transport instead of HTTP
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom arbitrator instead of the advisory file lock
    pub fn arbitrator(mut self, arbitrator: Arc<dyn Arbitrator>) -> Self {
        self.arbitrator = Some(arbitrator);
        self
    }

    /// Receive every non-fatal error
    pub fn error_delegate(mut self, delegate: Arc<dyn ErrorDelegate>) -> Self {
        self.error_delegate = delegate;
        self
    }

    /// Be told about every delivered item
    pub fn success_delegate(mut self, delegate: Arc<dyn SuccessDelegate>) -> Self {
        self.success_delegate = Some(delegate);
        self
    }

    /// Also poll the Inbox for items written by other processes
    pub fn poll_inbox(mut self, every: Duration) -> Self {
        self.poll_interval = Some(every);
        self
    }

    /// Create the staging directories and start the background tasks.
    ///
    /// Fails only on invalid configuration or when the staging directories
    /// cannot be set up. Leftover items from a previous run are recovered and
    /// a first retry sweep is queued before this returns.
    pub async fn start(self) -> Result<EventShipper> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let layout = StorageLayout::from_config(&config);
        layout.ensure_directories()?;

        let arbitrator = match self.arbitrator {
            Some(arbitrator) => arbitrator,
            None => Arc::new(FileLockArbitrator::new(layout.root())),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(config.endpoint.timeout())
                    .map_err(|e| ShipError::Config(e.to_string()))?,
            ),
        };

        let reporter = Reporter::new(Arc::clone(&config), self.error_delegate, self.success_delegate);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let uploader = Uploader::new(transport, reporter.clone(), completions_tx)?;
        let (monitor, handle) = QueueMonitor::new(
            layout.clone(),
            arbitrator,
            uploader.clone(),
            reporter.clone(),
            completions_rx,
        );

        // Queued ahead of anything a caller can send
        handle.recover();
        handle.fire_retry_timer();

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = vec![
            monitor.spawn(shutdown_tx.subscribe()),
            RetryTimer::new(handle.clone(), config.retry.interval()).spawn(shutdown_tx.subscribe()),
        ];

        let notifier = InboxNotifier::new(handle.clone());
        if let Some(every) = self.poll_interval {
            tasks.push(
                InboxPoller::new(layout.clone(), notifier.clone(), every).spawn(shutdown_tx.subscribe()),
            );
        }

        let writer = EventWriter::new(layout.clone(), reporter, notifier.clone());
        let logger = EventLogger::new(writer.clone(), Arc::clone(&config));

        info!(
            shipper = %config.identifier,
            "Shipping events from {} to {}",
            layout.root().display(),
            config.endpoint.url
        );

        Ok(EventShipper {
            config,
            layout,
            monitor: handle,
            notifier,
            writer,
            logger,
            uploader,
            shutdown_tx,
            tasks,
        })
    }
}

/// A running queue: monitor, retry timer and uploader
pub struct EventShipper {
    config: Arc<ShipperConfig>,
    layout: StorageLayout,
    monitor: MonitorHandle,
    notifier: InboxNotifier,
    writer: EventWriter,
    logger: EventLogger,
    uploader: Uploader,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl EventShipper {
    /// Start configuring a shipper
    pub fn builder(config: ShipperConfig) -> EventShipperBuilder {
        EventShipperBuilder {
            config,
            transport: None,
            arbitrator: None,
            error_delegate: Arc::new(TracingErrorDelegate),
            success_delegate: None,
            poll_interval: None,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    /// Staging directories
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Writer appending events to the Inbox
    pub fn writer(&self) -> &EventWriter {
        &self.writer
    }

    /// Logger facade over [`writer`](Self::writer)
    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }

    /// Notifier for Inbox items written elsewhere
    pub fn notifier(&self) -> &InboxNotifier {
        &self.notifier
    }

    /// Handle to the queue monitor
    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// Uploads awaiting their outcome
    pub fn in_flight(&self) -> &InFlightTable {
        self.uploader.in_flight()
    }

    /// Stop the background tasks and wait for them to finish.
    ///
    /// Uploads already dispatched are not cancelled; their items stay in the
    /// Outbox and are recovered on the next start if they never complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        debug!(shipper = %self.config.identifier, "Event shipper stopped");
    }
}

impl std::fmt::Debug for EventShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventShipper")
            .field("identifier", &self.config.identifier)
            .field("root", &self.layout.root())
            .field("in_flight", &self.uploader.in_flight_len())
            .finish()
    }
}
