//! # logship - Crash-Resilient Event Shipping
//!
//! logship stages small structured events on local storage and uploads them to
//! a remote collector over a signed HTTP channel. An event is never lost on
//! process crash, restart, or transient network failure: its current staging
//! directory *is* its delivery state, and the in-memory indices are rebuilt from
//! a directory scan on every start.
//!
//! ## Features
//!
//! - **Durable staging**: `Inbox` → `Outbox` → `Sent` directories, moved atomically
//! - **Cross-process safety**: every transition goes through an advisory-lock arbitrator
//! - **Signed uploads**: `PUT {endpoint}?mac=base64(HMAC-SHA256(key, body))`
//! - **Retry and recovery**: periodic retry timer, startup sweep of leftover items
//!
//! ## Quick Start
//!
//! ```no_run
//! use logship::config::ShipperConfig;
//! use logship::queue::EventShipper;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ShipperConfig::default();
//!     config.endpoint.url = "https://collector.example.com/log.cgi".to_string();
//!     config.endpoint.signing_key = Some("shared secret".to_string());
//!
//!     let shipper = EventShipper::builder(config).start().await?;
//!     shipper.logger().error("Checkout failed")?;
//!
//!     shipper.shutdown().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod queue;
pub mod types;
pub mod upload;

/// Common error types used throughout logship
pub mod error {
    use std::path::PathBuf;
    use thiserror::Error;

    pub use crate::queue::arbitrator::ArbitrationError;
    pub use crate::queue::preflight::PreflightError;

    /// Which staging transition a failed move was attempting
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MoveDirection {
        /// Inbox to Outbox, before the first upload attempt
        ToOutbox,
        /// Outbox to Sent, after a confirmed delivery
        ToSent,
        /// Back into the Inbox; the retry-in-place policy never issues it
        ToInbox,
    }

    impl std::fmt::Display for MoveDirection {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                MoveDirection::ToOutbox => write!(f, "outbox"),
                MoveDirection::ToSent => write!(f, "sent"),
                MoveDirection::ToInbox => write!(f, "inbox"),
            }
        }
    }

    /// Why an upload attempt did not succeed
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum NetworkFailure {
        /// The request never produced a response (connect, TLS, timeout, ...)
        Transport(String),
        /// The collector answered with something other than 200
        Status(u16),
    }

    impl std::fmt::Display for NetworkFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                NetworkFailure::Transport(msg) => write!(f, "transport error: {}", msg),
                NetworkFailure::Status(code) => write!(f, "unexpected status {}", code),
            }
        }
    }

    /// logship error types
    #[derive(Debug, Error)]
    pub enum ShipError {
        /// A staging directory could not be created (fatal at startup)
        #[error("Failed to set up staging directory {path}")]
        DirectorySetup {
            /// Directory that could not be created
            path: PathBuf,
            /// Underlying I/O error, absent when a file occupies the path
            #[source]
            source: Option<std::io::Error>,
        },

        /// An event could not be serialized
        #[error("Failed to encode event: {0}")]
        Encode(#[from] serde_json::Error),

        /// An encoded event could not be written into the Inbox
        #[error("Failed to write event to {path}: {source}")]
        Write {
            /// Destination path inside the Inbox
            path: PathBuf,
            /// Underlying I/O error
            source: std::io::Error,
        },

        /// An arbitrated move between staging directories failed
        #[error("Failed to move {from} to {direction}: {source}")]
        Move {
            /// Target stage of the move
            direction: MoveDirection,
            /// Source path
            from: PathBuf,
            /// Destination path
            to: PathBuf,
            /// Arbitration or rename failure
            source: ArbitrationError,
        },

        /// An upload attempt failed
        #[error("Failed to upload {path}: {failure}")]
        Network {
            /// Local path of the queued item
            path: PathBuf,
            /// Failure classification
            failure: NetworkFailure,
        },

        /// A queued item could not be read for upload
        #[error("Failed to read queued item {path}: {source}")]
        Read {
            /// Local path of the queued item
            path: PathBuf,
            /// Underlying I/O error
            source: std::io::Error,
        },

        /// A queued item was rejected before a transition
        #[error(transparent)]
        Preflight(#[from] PreflightError),

        /// Invalid configuration
        #[error("Configuration error: {0}")]
        Config(String),

        /// I/O operation failed
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    impl ShipError {
        /// True for the races the queue expects to lose (the item was already
        /// moved or deleted by another actor). These are never surfaced to the
        /// error delegate.
        pub fn is_expected(&self) -> bool {
            match self {
                ShipError::Preflight(PreflightError::FileNotPresent(_)) => true,
                ShipError::Move { source, .. } => source.is_source_missing(),
                _ => false,
            }
        }
    }

    /// Result type alias for logship operations
    pub type Result<T> = std::result::Result<T, ShipError>;
}

pub use error::{Result, ShipError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{EventLogger, EventWriter};
    pub use crate::config::ShipperConfig;
    pub use crate::queue::{
        ErrorDelegate, EventShipper, InboxNotifier, MonitorHandle, StorageLayout, SuccessDelegate,
    };
    pub use crate::types::{Event, LogLevel};
    pub use crate::upload::{Transport, Uploader};
    pub use crate::{Result, ShipError};
}
