//! HTTP transport used by the uploader

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

/// A request that never produced a response
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one upload and reports the response status.
///
/// Timeouts are the transport's business and surface as [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// PUT `body` to `url`, returning the HTTP status code
    async fn put(&self, url: Url, body: Bytes) -> Result<u16, TransportError>;
}

/// [`Transport`] over a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("logship/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn put(&self, url: Url, body: Bytes) -> Result<u16, TransportError> {
        let response = self
            .client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}
