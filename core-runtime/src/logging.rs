//! # Logging
//!
//! Installs the process-wide `tracing` subscriber and mirrors events to a
//! host [`LoggerSink`].
//!
//! Voice message URLs are usually pre-signed and cached files live under
//! the user's home directory, so events forwarded to the host are redacted:
//! URL fields lose their query string, path fields keep only the file name
//! and credential-like fields are masked.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::LogLevel;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug)
//!         .with_logger_sink(host_sink),
//! )?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{LogEntry, LogLevel, LoggerSink};

pub use bridge_traits::logging::{redact_url, REDACTED};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Crates whose level follows [`LoggingConfig::level`]. Everything else
/// logs at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "bridge_desktop",
    "core_runtime",
    "core_playback",
    "core_service",
];


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable
    Pretty,
    /// One JSON object per line
    Json,
    /// Single-line text
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Full `EnvFilter` directive string; replaces the level-based default.
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Redact fields of events forwarded to the sink.
    pub redact: bool,
    /// Log span open/close for `#[instrument]`ed operations.
    pub span_events: bool,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            redact: true,
            span_events: false,
            display_target: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.is_some())
            .field("redact", &self.redact)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.span_events = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    /// Directive string handed to `EnvFilter`.
    pub fn directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let level = self.level.as_str();
        std::iter::once("warn".to_string())
            .chain(
                WORKSPACE_TARGETS
                    .iter()
                    .map(|target| format!("{}={}", target, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber.
///
/// Fails if the filter does not parse or a global subscriber is already
/// set, so call it once at startup.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.directives())
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(&config))
        .with(LoggerSinkLayer::new(config.logger_sink.clone(), config.redact))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn fmt_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let spans = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(config.display_target)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(config.display_target)
            .with_span_events(spans)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(config.display_target)
            .with_span_events(spans)
            .boxed(),
    }
}

// ============================================================================
// Host sink forwarding
// ============================================================================

/// Forwards events to a [`LoggerSink`].
pub struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    redact: bool,
}

impl LoggerSinkLayer {
    pub fn new(sink: Option<Arc<dyn LoggerSink>>, redact: bool) -> Self {
        Self { sink, redact }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let metadata = event.metadata();
        let level = log_level(metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut entry = LogEntry::new(
            level,
            metadata.target(),
            fields.message.unwrap_or_else(|| metadata.name().to_string()),
        );
        for (name, value) in fields.values {
            let value = if self.redact {
                redact_field(&name, &value)
            } else {
                value
            };
            entry = entry.with_field(name, value);
        }
        if let Some(span) = ctx.event_span(event) {
            entry = entry.with_span(span.name());
        }

        deliver(Arc::clone(sink), entry);
    }
}

fn deliver(sink: Arc<dyn LoggerSink>, entry: LogEntry) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = sink.log(entry).await {
                    eprintln!("LoggerSink error: {}", err);
                }
            });
        }
        Err(_) => {
            if let Err(err) = futures::executor::block_on(sink.log(entry)) {
                eprintln!("LoggerSink error: {}", err);
            }
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: BTreeMap<String, String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{:?}", value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, value.to_string());
    }
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.values.insert(field.name().to_string(), value);
        }
    }
}

fn log_level(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

// ============================================================================
// Redaction
// ============================================================================

/// Redact a field value according to its name.
///
/// * `url`, `*_url`: query string and fragment removed
/// * `path`, `*_path`, `file`: file name only
/// * names mentioning a token, signature, secret or authorization: masked
pub fn redact_field(name: &str, value: &str) -> String {
    let name = name.to_ascii_lowercase();
    if ["token", "signature", "secret", "authorization", "password"]
        .iter()
        .any(|marker| name.contains(marker))
    {
        REDACTED.to_string()
    } else if name == "url" || name.ends_with("_url") {
        redact_url(value.trim_matches('"'))
    } else if name == "path" || name.ends_with("_path") || name == "file" {
        strip_path(value.trim_matches('"')).to_string()
    } else {
        value.to_string()
    }
}

/// File name component of a Unix or Windows path.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
