//! # Playback Error Types
//!
//! Error types shared by the voice cache and the playback coordinator.

use bridge_traits::BridgeError;
use core_runtime::events::ErrorKind;
use thiserror::Error;

/// Errors that can occur while caching or playing voice messages.
///
/// The type is `Clone` so that one terminal download failure can be
/// delivered to every caller attached to the same task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    // ========================================================================
    // Network Errors
    // ========================================================================
    /// Connection trouble or a retryable server answer.
    #[error("Transient network failure: {0}")]
    NetworkTransient(String),

    /// The server answered with a non-retryable status.
    #[error("Remote resource unavailable: {0}")]
    NetworkPermanent(String),

    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Writing, promoting or recording a cached file failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A cached file no longer matches its recorded size.
    #[error("Corrupted cache file for {message_id}: expected {expected} bytes, found {actual}")]
    CorruptFile {
        message_id: String,
        expected: u64,
        actual: u64,
    },

    /// The message has no local file and no known remote source.
    #[error("Message not cached: {0}")]
    NotCached(String),

    /// The download was cancelled before it completed.
    #[error("Download cancelled: {0}")]
    Cancelled(String),

    // ========================================================================
    // Playback Errors
    // ========================================================================
    /// The audio engine failed to load or control the file.
    #[error("Audio engine error: {0}")]
    Engine(String),

    /// Decoding the file for waveform extraction failed.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// The operation needs a session that was never started.
    #[error("No playback session for message: {0}")]
    NoSession(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// A tunable is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The cache manager was used before `initialize`.
    #[error("Cache manager not initialized")]
    NotInitialized,

    /// The coordinator was disposed and owns no engine any more.
    #[error("Playback coordinator disposed")]
    Disposed,
}

impl PlaybackError {
    /// Classifies a failed download request.
    pub fn from_network(err: BridgeError) -> Self {
        if err.is_transient() {
            PlaybackError::NetworkTransient(err.to_string())
        } else {
            PlaybackError::NetworkPermanent(err.to_string())
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        PlaybackError::Storage(err.to_string())
    }

    pub fn engine(err: impl std::fmt::Display) -> Self {
        PlaybackError::Engine(err.to_string())
    }

    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::NetworkTransient(_))
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::NetworkTransient(_) | PlaybackError::NetworkPermanent(_)
        )
    }

    /// Category reported to observers alongside a state transition.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::NetworkTransient(_) => ErrorKind::NetworkTransient,
            PlaybackError::NetworkPermanent(_) | PlaybackError::NotCached(_) => {
                ErrorKind::NetworkPermanent
            }
            PlaybackError::CorruptFile { .. } => ErrorKind::CorruptFile,
            PlaybackError::Cancelled(_) => ErrorKind::Cancelled,
            PlaybackError::Storage(_)
            | PlaybackError::InvalidConfig(_)
            | PlaybackError::NotInitialized => ErrorKind::Storage,
            PlaybackError::Engine(_)
            | PlaybackError::Decode(_)
            | PlaybackError::NoSession(_)
            | PlaybackError::Disposed => ErrorKind::Engine,
        }
    }
}

impl From<core_runtime::Error> for PlaybackError {
    fn from(err: core_runtime::Error) -> Self {
        PlaybackError::InvalidConfig(err.to_string())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        let transient = PlaybackError::from_network(BridgeError::Http {
            status: 503,
            message: "unavailable".to_string(),
        });
        assert!(transient.is_transient());
        assert_eq!(transient.kind(), ErrorKind::NetworkTransient);

        let permanent = PlaybackError::from_network(BridgeError::Http {
            status: 404,
            message: "missing".to_string(),
        });
        assert!(!permanent.is_transient());
        assert!(permanent.is_network_error());
        assert_eq!(permanent.kind(), ErrorKind::NetworkPermanent);

        let dropped = PlaybackError::from_network(BridgeError::Network("reset".to_string()));
        assert!(dropped.is_transient());
    }

    #[test]
    fn test_kinds_of_local_failures() {
        assert_eq!(PlaybackError::storage("disk full").kind(), ErrorKind::Storage);
        assert_eq!(PlaybackError::engine("bad codec").kind(), ErrorKind::Engine);
        assert_eq!(
            PlaybackError::Cancelled("m1".to_string()).kind(),
            ErrorKind::Cancelled
        );
        let corrupt = PlaybackError::CorruptFile {
            message_id: "m1".to_string(),
            expected: 10,
            actual: 4,
        };
        assert_eq!(corrupt.kind(), ErrorKind::CorruptFile);
        assert!(corrupt.to_string().contains("expected 10 bytes"));
    }

    #[test]
    fn test_logged_network_error_keeps_signature_out() {
        let err = PlaybackError::from_network(BridgeError::from_status(
            404,
            "https://cdn.test/v/a.m4a?sig=SECRET_TOKEN",
        ));
        let logged = core_runtime::logging::redact_field("error", &err.to_string());

        assert!(!logged.contains("SECRET_TOKEN"));
        assert!(logged.starts_with("Remote resource unavailable: HTTP 404"));
    }
}
