//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{DownloadResponse, HttpClient},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// Provides streaming downloads with:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Status codes surfaced as [`BridgeError::Http`]
///
/// Retries are left to the caller.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(120))
    }

    /// Create a new HTTP client whose whole-request timeout (including the
    /// body) is `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent("voice-core/0.1.0")
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self { client }
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// reqwest errors print the request URL, signature included, so it is
    /// dropped before the error is turned into text.
    fn map_request_error(e: reqwest::Error) -> BridgeError {
        let e = e.without_url();
        if e.is_builder() {
            BridgeError::OperationFailed(format!("Invalid request: {}", e))
        } else if e.is_timeout() {
            BridgeError::Network("Request timed out".to_string())
        } else if let Some(status) = e.status() {
            BridgeError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            BridgeError::Network(e.to_string())
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn download_stream(&self, url: &str) -> Result<DownloadResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            warn!(status, "Download rejected by server");
            return Err(BridgeError::from_status(status, url));
        }

        let content_length = response.content_length();
        debug!(status, content_length = ?content_length, "Download stream opened");

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.without_url()));
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(DownloadResponse::new(
            status,
            content_length,
            Box::new(reader),
        ))
    }
}
