//! Signed uploads to the collector

pub mod signing;
pub mod transport;
pub mod uploader;

pub use transport::{HttpTransport, Transport, TransportError};
pub use uploader::{InFlightTable, RequestId, UploadOutcome, UploadResult, Uploader};
