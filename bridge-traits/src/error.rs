use crate::logging::redact_url;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    StorageFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` when repeating the same request may succeed.
    ///
    /// Connection failures, timeouts, throttling (429), request timeouts (408)
    /// and server errors (5xx) are transient. Every other HTTP status is
    /// treated as a permanent answer from the server.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Network(_) => true,
            BridgeError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Build the error for a non-success HTTP response. The query string
    /// of `url` is not kept.
    pub fn from_status(status: u16, url: &str) -> Self {
        BridgeError::Http {
            status,
            message: format!("request to {} was rejected", redact_url(url)),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
