//! Host log forwarding.
//!
//! The core logs through `tracing`; a [`LoggerSink`] receives a copy of each
//! event so the host can route it into its own pipeline (OSLog, Logcat, a
//! log file).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One forwarded log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Module path of the emitting code, e.g. `core_playback::cache::manager`.
    pub target: String,
    pub message: String,
    /// Structured fields in name order.
    pub fields: BTreeMap<String, String>,
    /// Name of the innermost span, usually the public operation.
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// The message the event is about, when it carries a `message_id` field.
    pub fn message_id(&self) -> Option<&str> {
        self.fields.get("message_id").map(String::as_str)
    }
}

/// Receives log events on behalf of the host.
///
/// Implementations must not block for long; events are delivered from the
/// thread that emitted them when no Tokio runtime is available.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Events below this level are dropped before they are built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Replacement for values that must not reach a log.
pub const REDACTED: &str = "[REDACTED]";

/// Drop the query string and fragment of a URL.
///
/// Pre-signed download URLs carry their credentials in the query, so every
/// URL that ends up in a log line or an error message goes through here.
///
/// ```
/// use bridge_traits::logging::redact_url;
///
/// assert_eq!(
///     redact_url("https://cdn.example.com/voice/a.m4a?sig=abc&exp=1"),
///     "https://cdn.example.com/voice/a.m4a?[REDACTED]"
/// );
/// ```
pub fn redact_url(url: &str) -> String {
    match url.find(['?', '#']) {
        Some(idx) => format!("{}?{}", &url[..idx], REDACTED),
        None => url.to_string(),
    }
}
