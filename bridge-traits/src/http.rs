//! HTTP Client Abstraction
//!
//! Provides streaming downloads of remote audio with status classification.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Streaming response body returned by [`HttpClient::download_stream`].
pub struct DownloadResponse {
    /// HTTP status code of the response (always 2xx when returned as `Ok`).
    pub status: u16,
    /// Value of the `Content-Length` header, when the server sent one.
    pub content_length: Option<u64>,
    /// Response body.
    pub body: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
}

impl DownloadResponse {
    pub fn new(
        status: u16,
        content_length: Option<u64>,
        body: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    ) -> Self {
        Self {
            status,
            content_length,
            body,
        }
    }
}

impl fmt::Debug for DownloadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }

        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    /// Returns `true` if another attempt is allowed after `attempt` failures.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Async HTTP client trait
///
/// This trait abstracts HTTP operations to allow platform-specific implementations.
/// Implementations should handle:
/// - TLS certificate validation
/// - Connection pooling and keep-alive
/// - Mapping non-2xx responses to [`BridgeError::Http`](crate::BridgeError::Http)
///   so callers can tell transient from permanent failures
///
/// Implementations must NOT retry on their own; retry policy belongs to the caller.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::HttpClient;
/// use tokio::io::AsyncReadExt;
///
/// async fn fetch(client: &dyn HttpClient) -> bridge_traits::error::Result<Vec<u8>> {
///     let mut response = client.download_stream("https://cdn.example.com/a.m4a").await?;
///     let mut buf = Vec::new();
///     response.body.read_to_end(&mut buf).await?;
///     Ok(buf)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Start a GET request and return the response body as a stream.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails or times out ([`BridgeError::Network`](crate::BridgeError::Network))
    /// - The server answers with a non-2xx status ([`BridgeError::Http`](crate::BridgeError::Http))
    async fn download_stream(&self, url: &str) -> Result<DownloadResponse>;
}
