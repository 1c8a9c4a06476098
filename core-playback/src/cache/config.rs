//! Cache configuration and policies

use bridge_traits::RetryPolicy;
use core_runtime::config::{
    CoreConfig, DEFAULT_MAX_CACHE_BYTES, DEFAULT_MAX_CACHE_ENTRIES,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_RETENTION_DAYS, DEFAULT_RETRY_ATTEMPTS,
};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the voice cache manager.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached messages (default: 50)
    pub max_entries: usize,

    /// Maximum total size of cached files in bytes (default: 100MiB)
    pub max_bytes: u64,

    /// Number of download workers (default: 3)
    pub max_concurrent_downloads: usize,

    /// Attempts per download, first try included (default: 3)
    pub retry_attempts: u32,

    /// Entries cached longer ago than this are dropped at startup (default: 30)
    pub retention_days: u32,

    /// Timeout for a single download attempt (default: 120s)
    pub download_timeout: Duration,

    /// First retry delay, doubled per attempt (default: 500ms)
    pub retry_base_delay: Duration,

    /// Upper bound of the retry delay (default: 8s)
    pub retry_max_delay: Duration,

    /// Cache directory, relative to the platform cache directory
    pub cache_directory: PathBuf,

    /// Key prefix of metadata records in the key-value store
    pub metadata_namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
            max_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retention_days: DEFAULT_RETENTION_DAYS,
            download_timeout: Duration::from_secs(120),
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(8),
            cache_directory: PathBuf::from("voice_messages"),
            metadata_namespace: "voice_cache".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the cache tunables out of the runtime configuration.
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            max_entries: config.max_cache_entries,
            max_bytes: config.max_cache_bytes,
            max_concurrent_downloads: config.max_concurrent_downloads,
            retry_attempts: config.retry_attempts,
            retention_days: config.retention_days,
            download_timeout: config.download_timeout,
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
            cache_directory: config.cache_directory.clone(),
            metadata_namespace: config.metadata_namespace.clone(),
        }
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn with_max_bytes(mut self, bytes: u64) -> Self {
        self.max_bytes = bytes;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Set the retry backoff window.
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    pub fn with_metadata_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata_namespace = namespace.into();
        self
    }

    /// Retry policy applied by download workers.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            use_exponential_backoff: true,
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    /// Key prefix shared by every metadata record.
    pub fn key_prefix(&self) -> String {
        format!("{}:", self.metadata_namespace)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_bytes == 0 {
            return Err("max_bytes must be greater than 0".to_string());
        }

        if self.max_concurrent_downloads == 0 {
            return Err("max_concurrent_downloads must be at least 1".to_string());
        }

        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }

        if self.download_timeout.is_zero() {
            return Err("download_timeout must be greater than 0".to_string());
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err("retry_base_delay cannot exceed retry_max_delay".to_string());
        }

        if self.cache_directory.as_os_str().is_empty() {
            return Err("cache_directory cannot be empty".to_string());
        }

        if self.metadata_namespace.is_empty() {
            return Err("metadata_namespace cannot be empty".to_string());
        }

        Ok(())
    }
}
