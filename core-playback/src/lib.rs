//! # Voice Message Cache & Playback
//!
//! Turns repeated remote voice message fetches into at-most-once downloads
//! and plays them through one shared audio engine.
//!
//! ## Overview
//!
//! This crate handles:
//! - Local caching of voice messages with LRU eviction and retention
//! - Deduplicated downloads on a bounded worker pool with retry and backoff
//! - Playback sessions per message multiplexed onto one engine
//! - Waveform extraction using symphonia (optional, feature-gated)
//! - Merged per-message state notifications

pub mod cache;
pub mod error;
pub mod notifier;
pub mod session;
pub mod waveform;

pub use cache::{CacheConfig, MessageId, VoiceCacheManager};
pub use error::{PlaybackError, Result};
pub use notifier::StateNotifier;
pub use session::{PlaybackConfig, PlaybackCoordinator, PlaybackSession, PlaybackSpeed};
pub use waveform::{WaveformCache, WaveformExtractor};

#[cfg(feature = "core-decoder")]
pub use waveform::SymphoniaWaveformExtractor;
