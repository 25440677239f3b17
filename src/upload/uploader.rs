//! Uploader: signs and PUTs queued items, tracking requests in flight

use crate::error::NetworkFailure;
use crate::queue::delegate::Reporter;
use crate::upload::signing;
use crate::upload::transport::Transport;
use crate::{Result, ShipError};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Terminal result of one `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    /// The collector answered 200
    Delivered,
    /// Transport error or any other status
    Failed,
    /// Not dispatched: the same item was already being uploaded
    Deferred,
}

/// Outcome handed back to the queue monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Local path the upload originated from
    pub path: PathBuf,
    /// What happened
    pub result: UploadResult,
}

/// Identity of one dispatched request.
///
/// The URL alone is not unique: unsigned uploads all go to the bare
/// endpoint, and identical bodies sign identically. The dispatch number
/// tells concurrent requests to the same URL apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId {
    /// Full upload URL, signature included
    pub url: String,
    /// Per-uploader dispatch sequence number
    pub dispatch: u64,
}

/// Map from remote request identity to the local item it was dispatched for
pub type InFlightTable = DashMap<RequestId, PathBuf>;

/// Signs and uploads queued items.
///
/// Cheap to clone; clones share the in-flight table.
#[derive(Clone)]
pub struct Uploader {
    endpoint: Url,
    key: Option<Arc<[u8]>>,
    transport: Arc<dyn Transport>,
    in_flight: Arc<InFlightTable>,
    claimed: Arc<DashSet<PathBuf>>,
    dispatches: Arc<AtomicU64>,
    completions: mpsc::UnboundedSender<UploadOutcome>,
    reporter: Reporter,
}

impl Uploader {
    /// Create an uploader reporting outcomes on `completions`
    pub fn new(
        transport: Arc<dyn Transport>,
        reporter: Reporter,
        completions: mpsc::UnboundedSender<UploadOutcome>,
    ) -> Result<Self> {
        let endpoint = reporter.config().endpoint.parsed_url()?;
        let key: Option<Arc<[u8]>> = reporter.config().endpoint.key_bytes().map(Arc::from);
        if key.is_none() {
            warn!("No signing key configured, uploads to {} will be unsigned", endpoint);
        }

        Ok(Self {
            endpoint,
            key,
            transport,
            in_flight: Arc::new(DashMap::new()),
            claimed: Arc::new(DashSet::new()),
            dispatches: Arc::new(AtomicU64::new(0)),
            completions,
            reporter,
        })
    }

    /// Requests currently awaiting their terminal outcome
    pub fn in_flight(&self) -> &InFlightTable {
        &self.in_flight
    }

    /// Number of requests in flight
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether `path` is somewhere between `send` and its outcome
    pub fn is_busy(&self, path: &Path) -> bool {
        self.claimed.contains(path)
    }

    /// Upload one queued item in the background.
    ///
    /// Exactly one [`UploadOutcome`] is delivered per call. A second call for
    /// a path that is still uploading is answered with
    /// [`UploadResult::Deferred`] and sends nothing.
    pub fn send(&self, path: PathBuf) -> JoinHandle<()> {
        let uploader = self.clone();
        if !self.claimed.insert(path.clone()) {
            debug!("{} is already being uploaded", path.display());
            return tokio::spawn(async move {
                uploader.complete(path, UploadResult::Deferred);
            });
        }
        tokio::spawn(async move {
            let result = uploader.deliver(&path).await;
            uploader.claimed.remove(&path);
            if let Some(result) = result {
                uploader.complete(path, result);
            }
        })
    }

    async fn deliver(&self, path: &Path) -> Option<UploadResult> {
        let body = match tokio::fs::read(path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(source) => {
                if source.kind() != std::io::ErrorKind::NotFound {
                    self.reporter.report(&ShipError::Read {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                return Some(UploadResult::Failed);
            }
        };

        let url = signing::signed_url(&self.endpoint, &body, self.key.as_deref());
        if self.key.is_none() {
            debug!("Sending {} without signature", path.display());
        }

        let request = RequestId {
            url: url.to_string(),
            dispatch: self.dispatches.fetch_add(1, Ordering::Relaxed),
        };
        self.in_flight.insert(request.clone(), path.to_path_buf());

        let response = self.transport.put(url, body).await;
        Some(self.finish(&request, response)?.1)
    }

    /// Resolve a finished request back to its local item.
    ///
    /// Returns `None` for a request that is not in the table, which is a
    /// duplicate or unexpected completion and is ignored.
    fn finish(
        &self,
        request: &RequestId,
        response: std::result::Result<u16, crate::upload::transport::TransportError>,
    ) -> Option<(PathBuf, UploadResult)> {
        let Some((_, origin)) = self.in_flight.remove(request) else {
            debug!("Completion for unknown request {} #{}", request.url, request.dispatch);
            return None;
        };

        let failure = match response {
            Ok(200) => return Some((origin, UploadResult::Delivered)),
            Ok(status) => NetworkFailure::Status(status),
            Err(e) => NetworkFailure::Transport(e.0),
        };
        debug!("Upload of {} failed: {}", origin.display(), failure);
        self.reporter.report(&ShipError::Network {
            path: origin.clone(),
            failure,
        });
        Some((origin, UploadResult::Failed))
    }

    fn complete(&self, path: PathBuf, result: UploadResult) {
        if self.completions.send(UploadOutcome { path, result }).is_err() {
            debug!("Monitor gone, dropping upload outcome");
        }
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("endpoint", &self.endpoint.as_str())
            .field("signed", &self.key.is_some())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
