//! # Core Configuration Module
//!
//! Provides configuration management for the voice messaging core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all bridges and tunables required by the cache manager
//! and the playback coordinator. Configuration is an explicit value handed to
//! the constructors; nothing is read from ambient global state.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Streaming downloads (desktop default: reqwest)
//! - `FileSystemAccess` - Cache directory and file I/O (desktop default: tokio fs)
//! - `KeyValueStore` - Durable cache metadata (desktop default: SQLite)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults are
//! injected automatically if not provided. Otherwise a missing bridge fails
//! fast with [`Error::CapabilityMissing`].
//!
//! ## Optional Dependencies
//!
//! - `Clock` - Time source (defaults to [`SystemClock`])
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .file_system(Arc::new(MyFileSystem))
//!     .kv_store(Arc::new(MyKeyValueStore))
//!     .max_cache_entries(100)
//!     .max_concurrent_downloads(2)
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, KeyValueStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default maximum number of cached voice messages.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 50;
/// Default maximum total size of cached audio (100 MiB).
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 100 * 1024 * 1024;
/// Default number of parallel download workers.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
/// Default number of attempts per download (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default age after which entries are evicted at startup.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
/// Default number of waveform peaks per message.
pub const DEFAULT_WAVEFORM_SAMPLE_COUNT: usize = 50;

const MAX_CONCURRENT_DOWNLOADS_LIMIT: usize = 16;
const MAX_WAVEFORM_SAMPLE_COUNT: usize = 4096;

/// Core configuration for the voice messaging core.
///
/// This struct holds all dependencies and settings required to initialize
/// the core library. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// HTTP client used by download workers
    pub http_client: Arc<dyn HttpClient>,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Durable key-value storage for cache metadata
    pub kv_store: Arc<dyn KeyValueStore>,

    /// Time source for cache timestamps
    pub clock: Arc<dyn Clock>,

    /// Maximum number of cache entries kept after an eviction pass
    pub max_cache_entries: usize,

    /// Maximum total bytes kept after an eviction pass
    pub max_cache_bytes: u64,

    /// Number of download workers
    pub max_concurrent_downloads: usize,

    /// Attempts per download, including the first one
    pub retry_attempts: u32,

    /// Entries older than this are evicted at startup
    pub retention_days: u32,

    /// Number of waveform peaks produced per message
    pub waveform_sample_count: usize,

    /// Timeout for a single download attempt
    pub download_timeout: Duration,

    /// First retry delay; doubles per attempt
    pub retry_base_delay: Duration,

    /// Upper bound for a retry delay
    pub retry_max_delay: Duration,

    /// Directory for audio files, joined onto the platform cache directory.
    /// An absolute path replaces the platform directory.
    pub cache_directory: PathBuf,

    /// Key prefix for metadata records
    pub metadata_namespace: String,

    /// How often the coordinator samples the engine position
    pub position_poll_interval: Duration,

    /// Maximum drift tolerated on resume before the engine is re-seeked
    pub resume_tolerance: Duration,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("kv_store", &"KeyValueStore { ... }")
            .field("max_cache_entries", &self.max_cache_entries)
            .field("max_cache_bytes", &self.max_cache_bytes)
            .field("max_concurrent_downloads", &self.max_concurrent_downloads)
            .field("retry_attempts", &self.retry_attempts)
            .field("retention_days", &self.retention_days)
            .field("waveform_sample_count", &self.waveform_sample_count)
            .field("download_timeout", &self.download_timeout)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("cache_directory", &self.cache_directory)
            .field("metadata_namespace", &self.metadata_namespace)
            .field("position_poll_interval", &self.position_poll_interval)
            .field("resume_tolerance", &self.resume_tolerance)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache limits are greater than zero
    /// - Worker count is within `1..=16`
    /// - At least one download attempt is allowed
    /// - Retention and waveform settings are usable
    /// - Durations are non-zero and the retry delays are ordered
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_entries == 0 {
            return Err(Error::Config(
                "max_cache_entries must be greater than 0".to_string(),
            ));
        }

        if self.max_cache_bytes == 0 {
            return Err(Error::Config(
                "max_cache_bytes must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_downloads == 0
            || self.max_concurrent_downloads > MAX_CONCURRENT_DOWNLOADS_LIMIT
        {
            return Err(Error::Config(format!(
                "max_concurrent_downloads must be between 1 and {}",
                MAX_CONCURRENT_DOWNLOADS_LIMIT
            )));
        }

        if self.retry_attempts == 0 {
            return Err(Error::Config(
                "retry_attempts must allow at least one attempt".to_string(),
            ));
        }

        if self.retention_days == 0 {
            return Err(Error::Config(
                "retention_days must be greater than 0".to_string(),
            ));
        }

        if self.waveform_sample_count == 0 || self.waveform_sample_count > MAX_WAVEFORM_SAMPLE_COUNT
        {
            return Err(Error::Config(format!(
                "waveform_sample_count must be between 1 and {}",
                MAX_WAVEFORM_SAMPLE_COUNT
            )));
        }

        if self.download_timeout.is_zero() || self.position_poll_interval.is_zero() {
            return Err(Error::Config(
                "download_timeout and position_poll_interval must be non-zero".to_string(),
            ));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(Error::Config(
                "retry_base_delay cannot exceed retry_max_delay".to_string(),
            ));
        }

        if self.cache_directory.as_os_str().is_empty() {
            return Err(Error::Config("cache_directory cannot be empty".to_string()));
        }

        if self.metadata_namespace.is_empty() {
            return Err(Error::Config(
                "metadata_namespace cannot be empty".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str, desktop_default: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: ensure the 'desktop-shims' feature is enabled to use the default {}. \
             Mobile: inject the platform-native adapter.",
            capability, purpose, desktop_default
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::with_timeout(timeout));
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "downloading voice messages",
        "ReqwestHttpClient",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing(
        "FileSystemAccess",
        "storing cached audio",
        "TokioFileSystem",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_kv_store(database_path: Option<PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    use bridge_desktop::{SqliteKeyValueStore, TokioFileSystem};
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let path = database_path.unwrap_or_else(|| TokioFileSystem::new().default_database_path());

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default KeyValueStore: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteKeyValueStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default KeyValueStore: {}", e))
            })
    };

    // block_on panics inside a runtime, so build the store on a helper thread
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default KeyValueStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_kv_store(_database_path: Option<PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    Err(capability_missing(
        "KeyValueStore",
        "persisting cache metadata",
        "SqliteKeyValueStore",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    database_path: Option<PathBuf>,
    max_cache_entries: Option<usize>,
    max_cache_bytes: Option<u64>,
    max_concurrent_downloads: Option<usize>,
    retry_attempts: Option<u32>,
    retention_days: Option<u32>,
    waveform_sample_count: Option<usize>,
    download_timeout: Option<Duration>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    cache_directory: Option<PathBuf>,
    metadata_namespace: Option<String>,
    position_poll_interval: Option<Duration>,
    resume_tolerance: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the key-value store used for cache metadata.
    pub fn kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Database file for the desktop default key-value store.
    ///
    /// Ignored when a store is injected with [`kv_store`](Self::kv_store).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn max_cache_entries(mut self, entries: usize) -> Self {
        self.max_cache_entries = Some(entries);
        self
    }

    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = Some(bytes);
        self
    }

    pub fn max_concurrent_downloads(mut self, workers: usize) -> Self {
        self.max_concurrent_downloads = Some(workers);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn waveform_sample_count(mut self, samples: usize) -> Self {
        self.waveform_sample_count = Some(samples);
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    /// Sets the retry backoff curve (`base * 2^(attempt-1)`, capped at `max`).
    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = Some(base);
        self.retry_max_delay = Some(max);
        self
    }

    pub fn cache_directory<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_directory = Some(dir.into());
        self
    }

    pub fn metadata_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata_namespace = Some(namespace.into());
        self
    }

    pub fn position_poll_interval(mut self, interval: Duration) -> Self {
        self.position_poll_interval = Some(interval);
        self
    }

    pub fn resume_tolerance(mut self, tolerance: Duration) -> Self {
        self.resume_tolerance = Some(tolerance);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A required bridge is missing and no desktop default is available
    /// - A tunable is out of range (see [`CoreConfig::validate`])
    pub fn build(self) -> Result<CoreConfig> {
        let download_timeout = self.download_timeout.unwrap_or(Duration::from_secs(120));

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(download_timeout)?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let kv_store = match self.kv_store {
            Some(store) => store,
            None => provide_default_kv_store(self.database_path)?,
        };

        let config = CoreConfig {
            http_client,
            file_system,
            kv_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            max_cache_entries: self.max_cache_entries.unwrap_or(DEFAULT_MAX_CACHE_ENTRIES),
            max_cache_bytes: self.max_cache_bytes.unwrap_or(DEFAULT_MAX_CACHE_BYTES),
            max_concurrent_downloads: self
                .max_concurrent_downloads
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            retry_attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            retention_days: self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            waveform_sample_count: self
                .waveform_sample_count
                .unwrap_or(DEFAULT_WAVEFORM_SAMPLE_COUNT),
            download_timeout,
            retry_base_delay: self
                .retry_base_delay
                .unwrap_or(Duration::from_millis(500)),
            retry_max_delay: self.retry_max_delay.unwrap_or(Duration::from_secs(8)),
            cache_directory: self
                .cache_directory
                .unwrap_or_else(|| PathBuf::from("voice_messages")),
            metadata_namespace: self
                .metadata_namespace
                .unwrap_or_else(|| "voice_cache".to_string()),
            position_poll_interval: self
                .position_poll_interval
                .unwrap_or(Duration::from_millis(200)),
            resume_tolerance: self.resume_tolerance.unwrap_or(Duration::from_millis(50)),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::DownloadResponse;
    use bridge_traits::storage::FileMetadata;
    use bridge_traits::BridgeError;
    use std::path::Path;

    // Mock implementations for testing
    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn download_stream(&self, _url: &str) -> BridgeResult<DownloadResponse> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    struct MockFileSystem;

    #[async_trait]
    impl FileSystemAccess for MockFileSystem {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/cache"))
        }

        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Err(BridgeError::NotAvailable("metadata".to_string()))
        }

        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }

        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }

        async fn rename(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            Ok(())
        }

        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }

        async fn open_write_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
            Ok(Box::new(tokio::io::sink()))
        }
    }

    struct MockKeyValueStore;

    #[async_trait]
    impl KeyValueStore for MockKeyValueStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn list_keys(&self, _prefix: &str) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn with_mocks() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .file_system(Arc::new(MockFileSystem))
            .kv_store(Arc::new(MockKeyValueStore))
    }

    #[test]
    fn test_defaults() {
        let config = with_mocks().build().unwrap();

        assert_eq!(config.max_cache_entries, 50);
        assert_eq!(config.max_cache_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.waveform_sample_count, 50);
        assert_eq!(config.download_timeout, Duration::from_secs(120));
        assert_eq!(config.retry_base_delay, Duration::from_millis(500));
        assert_eq!(config.retry_max_delay, Duration::from_secs(8));
        assert_eq!(config.cache_directory, PathBuf::from("voice_messages"));
        assert_eq!(config.metadata_namespace, "voice_cache");
        assert_eq!(config.position_poll_interval, Duration::from_millis(200));
        assert_eq!(config.resume_tolerance, Duration::from_millis(50));
        assert_eq!(config.event_buffer_size, 256);
    }

    #[test]
    fn test_builder_overrides() {
        let config = with_mocks()
            .max_cache_entries(10)
            .max_cache_bytes(1024)
            .max_concurrent_downloads(2)
            .retry_attempts(5)
            .retention_days(7)
            .waveform_sample_count(64)
            .retry_backoff(Duration::from_millis(10), Duration::from_millis(40))
            .cache_directory("/tmp/voice")
            .metadata_namespace("vm")
            .build()
            .unwrap();

        assert_eq!(config.max_cache_entries, 10);
        assert_eq!(config.max_cache_bytes, 1024);
        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.waveform_sample_count, 64);
        assert_eq!(config.retry_max_delay, Duration::from_millis(40));
        assert_eq!(config.cache_directory, PathBuf::from("/tmp/voice"));
        assert_eq!(config.metadata_namespace, "vm");
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let err = with_mocks().max_cache_entries(0).build().unwrap_err();
        assert!(err.to_string().contains("max_cache_entries"));

        let err = with_mocks().max_cache_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("max_cache_bytes"));

        let err = with_mocks().retry_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("retry_attempts"));
    }

    #[test]
    fn test_validate_rejects_worker_count_out_of_range() {
        assert!(with_mocks().max_concurrent_downloads(0).build().is_err());
        assert!(with_mocks().max_concurrent_downloads(17).build().is_err());
        assert!(with_mocks().max_concurrent_downloads(16).build().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let err = with_mocks()
            .retry_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("retry_base_delay"));
    }

    #[test]
    fn test_validate_rejects_empty_namespace() {
        let err = with_mocks().metadata_namespace("").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_is_cloneable_and_debug_hides_bridges() {
        let config = with_mocks().build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.max_cache_entries, config.max_cache_entries);

        let debug = format!("{:?}", config);
        assert!(debug.contains("HttpClient { ... }"));
        assert!(debug.contains("max_cache_entries"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridges_fail_fast() {
        let err = CoreConfig::builder()
            .file_system(Arc::new(MockFileSystem))
            .kv_store(Arc::new(MockKeyValueStore))
            .build()
            .unwrap_err();
        match err {
            Error::CapabilityMissing { capability, .. } => assert_eq!(capability, "HttpClient"),
            other => panic!("unexpected error: {other}"),
        }

        let err = CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .file_system(Arc::new(MockFileSystem))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("KeyValueStore"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CoreConfig::builder()
            .database_path(tmp.path().join("voice.db"))
            .build()
            .expect("desktop defaults should succeed");

        let store = config.kv_store.clone();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            store.set_string("voice_cache:x", "{}").await.unwrap();
            assert_eq!(
                store.get_string("voice_cache:x").await.unwrap().as_deref(),
                Some("{}")
            );
        });
    }

    #[cfg(feature = "desktop-shims")]
    #[tokio::test]
    async fn test_build_with_desktop_defaults_inside_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CoreConfig::builder()
            .database_path(tmp.path().join("voice.db"))
            .build()
            .expect("desktop defaults should succeed inside runtime");

        config.kv_store.set_string("k", "v").await.unwrap();
        assert_eq!(
            config.kv_store.get_string("k").await.unwrap().as_deref(),
            Some("v")
        );
    }
}
