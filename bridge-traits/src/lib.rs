//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the voice messaging core and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform
//! (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Streaming downloads with status classification
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Cache directory, atomic renames, streaming writes
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable string records for cache metadata
//!
//! ### Audio
//! - [`AudioEngineAdapter`](playback::AudioEngineAdapter) - The single shared playback engine
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! use core_runtime::error::CoreError;
//!
//! let engine = config.audio_engine
//!     .ok_or_else(|| CoreError::CapabilityMissing {
//!         capability: "AudioEngineAdapter".to_string(),
//!         message: "No audio engine provided. Inject the platform-native player.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Map non-2xx HTTP responses to [`BridgeError::Http`] so the core can
//!   separate transient from permanent failures
//! - Include error context (e.g., file paths, status codes)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod http;
pub mod logging;
pub mod playback;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{DownloadResponse, HttpClient, RetryPolicy};
pub use playback::{AudioEngineAdapter, PreparedMedia};
pub use storage::{FileMetadata, FileSystemAccess, KeyValueStore};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, SystemClock};
