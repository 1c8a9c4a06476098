//! Logging configuration as seen from a host application.

use bridge_traits::LogLevel;
use core_runtime::logging::{redact_field, redact_url, LogFormat, LoggingConfig};

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_redaction(false)
        .with_span_events(true)
        .with_target(false);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact);
    assert!(config.span_events);
    assert!(!config.display_target);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_redaction_is_on_by_default() {
    assert!(LoggingConfig::default().redact);
}

#[test]
fn test_presigned_urls_lose_their_signature() {
    let url = "https://storage.example.com/voice/abc.m4a?X-Amz-Signature=deadbeef&X-Amz-Expires=60";
    let redacted = redact_url(url);

    assert!(redacted.starts_with("https://storage.example.com/voice/abc.m4a"));
    assert!(!redacted.contains("deadbeef"));
    assert_eq!(redact_field("download_url", url), redacted);
}

#[test]
fn test_cache_paths_reduce_to_file_names() {
    assert_eq!(
        redact_field("final_path", "/Users/ana/Library/Caches/voice_messages/4f2a.m4a"),
        "4f2a.m4a"
    );
    assert_eq!(redact_field("file", "4f2a.m4a.9c1e.part"), "4f2a.m4a.9c1e.part");
}

#[test]
fn test_format_default_depends_on_build() {
    let expected = if cfg!(debug_assertions) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    assert_eq!(LoggingConfig::default().format, expected);
}
