//! # Voice Cache Module
//!
//! Downloads voice messages once and keeps them on disk for instant replay.
//!
//! ## Overview
//!
//! - Persistent storage through the `FileSystemAccess` bridge
//! - Metadata records in the host `KeyValueStore`, one JSON record per message
//! - A bounded pool of download workers with retry and backoff
//! - LRU eviction by entry count and total size
//! - Progress streams shared by every caller of the same download
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     VoiceCacheManager                  │
//! │  - request_download()                  │
//! │  - get_cached_path()                   │
//! │  - cancel_download()                   │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> MetadataStore (KeyValueStore)
//!          ├──> WorkerPool ──> Fetcher (HttpClient)
//!          ├──> FileSystemAccess (partial files, rename, delete)
//!          └──> StateNotifier (EventBus)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{DownloadOutcome, MessageId, VoiceCacheManager};
//!
//! # async fn example(manager: &VoiceCacheManager) -> core_playback::Result<()> {
//! let id = MessageId::new("msg-42");
//!
//! let stream = manager.request_download(&id, "https://cdn.example/msg-42.m4a").await?;
//! if let DownloadOutcome::Completed(path) = stream.wait().await {
//!     println!("cached at {}", path.display());
//! }
//!
//! let stats = manager.stats().await;
//! println!("{} messages, {:.1}% of the byte limit", stats.entries, stats.usage_percentage());
//! # Ok(())
//! # }
//! ```

pub mod config;
mod download;
pub mod entry;
pub mod manager;
pub mod metadata;
pub mod stats;
pub mod task;
mod worker;

// Re-export commonly used types
pub use config::CacheConfig;
pub use entry::{CacheEntry, MessageId};
pub use manager::{
    ClearReport, EntryRemovalListener, ReconcileReport, VoiceCacheManager,
    VoiceCacheManagerBuilder,
};
pub use metadata::{LoadReport, MetadataStore};
pub use stats::{CacheStats, DownloadProgress};
pub use task::{DownloadEvent, DownloadOutcome, DownloadState, DownloadTask, ProgressStream};
