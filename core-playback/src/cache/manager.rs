//! # Voice Cache Manager
//!
//! Main orchestrator for downloading and managing cached voice messages.
//!
//! This module provides:
//! - A bounded worker pool fed by a FIFO download queue
//! - De-duplication of concurrent requests for the same message
//! - Retry with exponential backoff for transient network failures
//! - Atomic promotion of finished downloads (partial file, then rename)
//! - LRU eviction by entry count and total size, sparing entries in use
//! - Startup reconciliation of metadata, files and retention
//! - Lazy detection of corrupted files

use crate::cache::{
    config::CacheConfig,
    download::Fetcher,
    entry::{cache_file_name, is_partial_file, partial_file_name, CacheEntry, MessageId},
    metadata::MetadataStore,
    stats::{CacheStats, DownloadProgress},
    task::{DownloadEvent, DownloadState, DownloadTask, ProgressStream},
    worker::{JobRunner, WorkerPool},
};
use crate::error::{PlaybackError, Result};
use crate::notifier::StateNotifier;
use async_trait::async_trait;
use bridge_traits::{
    http::HttpClient,
    storage::{FileSystemAccess, KeyValueStore},
    time::{Clock, SystemClock},
};
use core_runtime::config::CoreConfig;
use core_runtime::logging::redact_url;
use core_runtime::events::{CacheEvent, CacheState, ErrorKind, EvictionReason};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Result of startup reconciliation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub loaded: usize,
    pub malformed: usize,
    pub dropped_missing: usize,
    pub expired: usize,
    pub orphans_removed: usize,
    pub evicted: usize,
}

/// Result of [`VoiceCacheManager::clear_cache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearReport {
    pub removed: usize,
    pub freed_bytes: u64,
    /// Entries kept because they were playing or downloading.
    pub skipped: usize,
}

/// Told when a cache entry and its file are gone, so state derived from
/// the file can be dropped.
pub trait EntryRemovalListener: Send + Sync {
    fn entry_removed(&self, message_id: &MessageId);
}

enum FileCheck {
    Intact,
    Missing,
    Corrupt { actual: u64 },
}

/// Cache manager for downloading and managing voice message files.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct VoiceCacheManager {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    metadata: MetadataStore,
    fetcher: Fetcher,
    notifier: Arc<StateNotifier>,
    pool: WorkerPool,
    tasks: Mutex<HashMap<MessageId, Arc<DownloadTask>>>,
    pins: SyncMutex<HashMap<MessageId, usize>>,
    sources: SyncMutex<HashMap<MessageId, String>>,
    removal_listeners: SyncMutex<Vec<Weak<dyn EntryRemovalListener>>>,
    cache_dir: RwLock<Option<PathBuf>>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    eviction_lock: Mutex<()>,
}

/// Builder for [`VoiceCacheManager`].
pub struct VoiceCacheManagerBuilder {
    config: CacheConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<StateNotifier>>,
}

impl VoiceCacheManagerBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn kv_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Time source for access and retention timestamps (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share state publication with a playback coordinator.
    pub fn notifier(mut self, notifier: Arc<StateNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<VoiceCacheManager> {
        self.config
            .validate()
            .map_err(|e| PlaybackError::InvalidConfig(format!("Invalid cache configuration: {}", e)))?;

        let http = self
            .http_client
            .ok_or_else(|| PlaybackError::InvalidConfig("http client is required".to_string()))?;
        let fs = self
            .file_system
            .ok_or_else(|| PlaybackError::InvalidConfig("file system is required".to_string()))?;
        let kv = self
            .kv_store
            .ok_or_else(|| PlaybackError::InvalidConfig("key-value store is required".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifier = self.notifier.unwrap_or_default();

        let fetcher = Fetcher::new(
            http,
            fs.clone(),
            notifier.clone(),
            self.config.retry_policy(),
            self.config.download_timeout,
        );

        Ok(VoiceCacheManager {
            inner: Arc::new(CacheInner {
                metadata: MetadataStore::new(kv, self.config.key_prefix()),
                config: self.config,
                fs,
                clock,
                fetcher,
                notifier,
                pool: WorkerPool::new(),
                tasks: Mutex::new(HashMap::new()),
                pins: SyncMutex::new(HashMap::new()),
                sources: SyncMutex::new(HashMap::new()),
                removal_listeners: SyncMutex::new(Vec::new()),
                cache_dir: RwLock::new(None),
                initialized: AtomicBool::new(false),
                init_lock: Mutex::new(()),
                eviction_lock: Mutex::new(()),
            }),
        })
    }
}

impl VoiceCacheManager {
    /// Start building a manager with the given configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let manager = VoiceCacheManager::builder(CacheConfig::default())
    ///     .http_client(http)
    ///     .file_system(fs)
    ///     .kv_store(kv)
    ///     .build()?;
    /// manager.initialize().await?;
    /// ```
    pub fn builder(config: CacheConfig) -> VoiceCacheManagerBuilder {
        VoiceCacheManagerBuilder {
            config,
            http_client: None,
            file_system: None,
            kv_store: None,
            clock: None,
            notifier: None,
        }
    }

    /// Build a manager from the runtime configuration and its bridges.
    pub fn from_core_config(config: &CoreConfig, notifier: Arc<StateNotifier>) -> Result<Self> {
        Self::builder(CacheConfig::from_core(config))
            .http_client(config.http_client.clone())
            .file_system(config.file_system.clone())
            .kv_store(config.kv_store.clone())
            .clock(config.clock.clone())
            .notifier(notifier)
            .build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &Arc<StateNotifier> {
        &self.inner.notifier
    }

    /// Directory holding cached files, once initialized.
    pub fn cache_directory(&self) -> Option<PathBuf> {
        self.inner.cache_dir.read().clone()
    }

    /// Load metadata, reconcile it with the files on disk and start workers.
    ///
    /// Entries whose file is missing are dropped, entries older than the
    /// retention window are evicted, files without an entry are deleted and
    /// the limits are enforced. Calling it again is a no-op.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<ReconcileReport> {
        let Some(report) = self.inner.initialize().await? else {
            return Ok(ReconcileReport::default());
        };
        self.inner.pool.start(
            self.inner.config.max_concurrent_downloads,
            Arc::downgrade(&self.inner),
        );
        Ok(report)
    }

    /// Returns `true` if the message has a registered, present file.
    pub async fn is_cached(&self, message_id: &MessageId) -> Result<bool> {
        self.inner.ensure_initialized()?;
        let Some(entry) = self.inner.metadata.get(message_id).await else {
            return Ok(false);
        };

        let present = self.inner.fs.exists(&entry.local_path).await.unwrap_or(false);
        if !present {
            self.inner.forget_missing(&entry).await;
        }
        Ok(present)
    }

    /// Local path of a cached message, refreshing its access time.
    ///
    /// A file whose size no longer matches its entry is treated as corrupted:
    /// the file and entry are removed and `None` is returned.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn get_cached_path(&self, message_id: &MessageId) -> Result<Option<PathBuf>> {
        self.inner.ensure_initialized()?;
        self.inner.cached_path(message_id).await
    }

    /// Check a cached file against its entry, discarding it if corrupted.
    ///
    /// Returns `false` when the message is not (or no longer) cached.
    pub async fn check_integrity(&self, message_id: &MessageId) -> Result<bool> {
        match self.ensure_intact(message_id).await {
            Ok(()) => Ok(true),
            Err(PlaybackError::NotCached(_)) | Err(PlaybackError::CorruptFile { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Like [`check_integrity`](Self::check_integrity), but reports why the
    /// file is unusable: `NotCached` or `CorruptFile`.
    pub async fn ensure_intact(&self, message_id: &MessageId) -> Result<()> {
        self.inner.ensure_initialized()?;
        let Some(entry) = self.inner.metadata.get(message_id).await else {
            return Err(PlaybackError::NotCached(message_id.to_string()));
        };
        match self.inner.inspect(&entry).await {
            FileCheck::Intact => Ok(()),
            FileCheck::Missing => {
                self.inner.forget_missing(&entry).await;
                Err(PlaybackError::NotCached(message_id.to_string()))
            }
            FileCheck::Corrupt { actual } => {
                self.inner.discard_corrupt(&entry, actual).await;
                Err(PlaybackError::CorruptFile {
                    message_id: message_id.to_string(),
                    expected: entry.size_bytes,
                    actual,
                })
            }
        }
    }

    /// Request a download, attaching to an in-flight one if present.
    ///
    /// Cached messages yield a single `Completed` event without network
    /// access.
    #[instrument(skip(self, url), fields(message_id = %message_id))]
    pub async fn request_download(
        &self,
        message_id: &MessageId,
        url: &str,
    ) -> Result<ProgressStream> {
        self.inner.ensure_initialized()?;
        self.register_source(message_id, url);

        if let Some(path) = self.inner.cached_path(message_id).await? {
            debug!("Message already cached");
            return Ok(ProgressStream::completed(message_id.clone(), path));
        }

        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.get(message_id) {
            debug!(task_id = %task.id(), "Attaching to in-flight download");
            return Ok(task.subscribe());
        }

        // A download may have been promoted between the check above and
        // taking the task lock.
        if let Some(entry) = self.inner.metadata.get(message_id).await {
            return Ok(ProgressStream::completed(message_id.clone(), entry.local_path));
        }

        let task = Arc::new(DownloadTask::new(message_id.clone(), url));
        let stream = task.subscribe();
        tasks.insert(message_id.clone(), task.clone());
        drop(tasks);

        self.inner.notifier.update(message_id, |state| {
            state.cache_state = CacheState::Queued;
            state.download_pct = 0;
            state.error_kind = None;
        });
        info!(task_id = %task.id(), url = %redact_url(url), "Queued download");
        self.inner.pool.enqueue(task);

        Ok(stream)
    }

    /// Download using the source registered for the message.
    pub async fn download(&self, message_id: &MessageId) -> Result<ProgressStream> {
        let url = self
            .source_url(message_id)
            .ok_or_else(|| PlaybackError::NotCached(message_id.to_string()))?;
        self.request_download(message_id, &url).await
    }

    /// Cancel a queued or running download.
    ///
    /// Every attached observer receives `Cancelled`; no partial file and no
    /// entry are left behind. Returns `false` if nothing was in flight.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn cancel_download(&self, message_id: &MessageId) -> Result<bool> {
        let task = self.inner.tasks.lock().await.remove(message_id);
        let Some(task) = task else {
            return Ok(false);
        };

        task.cancel();
        if self.inner.pool.remove_queued(&task) {
            task.settle();
        }
        task.finish(DownloadEvent::Cancelled);
        task.wait_settled().await;

        if let Some(dir) = self.cache_directory() {
            self.inner
                .discard_partial(&dir.join(partial_file_name(message_id, &task.id())))
                .await;
        }

        self.inner.notifier.update(message_id, |state| {
            state.cache_state = CacheState::NotCached;
            state.download_pct = 0;
        });
        info!(task_id = %task.id(), "Cancelled download");
        Ok(true)
    }

    /// Remember where a message can be downloaded from.
    pub fn register_source(&self, message_id: &MessageId, url: &str) {
        self.inner
            .sources
            .lock()
            .insert(message_id.clone(), url.to_string());
    }

    pub fn source_url(&self, message_id: &MessageId) -> Option<String> {
        self.inner.sources.lock().get(message_id).cloned()
    }

    /// Call `listener` whenever an entry is evicted, removed, cleared or
    /// discarded. Dropped listeners are forgotten.
    pub fn add_removal_listener(&self, listener: Weak<dyn EntryRemovalListener>) {
        self.inner.removal_listeners.lock().push(listener);
    }

    /// Protect a message from eviction and clearing. Pins are counted.
    pub fn pin(&self, message_id: &MessageId) {
        *self
            .inner
            .pins
            .lock()
            .entry(message_id.clone())
            .or_insert(0) += 1;
    }

    /// Release one pin taken with [`pin`](Self::pin).
    pub fn unpin(&self, message_id: &MessageId) {
        let mut pins = self.inner.pins.lock();
        if let Some(count) = pins.get_mut(message_id) {
            *count -= 1;
            if *count == 0 {
                pins.remove(message_id);
            }
        }
    }

    pub fn is_pinned(&self, message_id: &MessageId) -> bool {
        self.inner.pins.lock().contains_key(message_id)
    }

    /// Evict entries until both limits hold. Returns the number evicted.
    pub async fn enforce_limits(&self) -> Result<usize> {
        self.inner.ensure_initialized()?;
        self.inner.enforce_limits().await
    }

    /// Delete every cached file that is neither playing nor downloading.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<ClearReport> {
        self.inner.ensure_initialized()?;
        let protected = self.inner.protected_ids().await;
        let mut report = ClearReport::default();

        for entry in self.inner.metadata.entries().await {
            if protected.contains(&entry.message_id) {
                report.skipped += 1;
                continue;
            }
            if self.inner.remove_entry(&entry).await? {
                report.removed += 1;
                report.freed_bytes += entry.size_bytes;
            }
        }

        self.inner.notifier.publish_cache_event(CacheEvent::Cleared {
            removed: report.removed,
            freed_bytes: report.freed_bytes,
            skipped: report.skipped,
        });
        info!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            skipped = report.skipped,
            "Cache cleared"
        );
        Ok(report)
    }

    /// Remove one cached message unless it is playing or downloading.
    pub async fn remove_cached(&self, message_id: &MessageId) -> Result<bool> {
        self.inner.ensure_initialized()?;
        if self.inner.protected_ids().await.contains(message_id) {
            debug!(message_id = %message_id, "Refusing to remove message in use");
            return Ok(false);
        }
        match self.inner.metadata.get(message_id).await {
            Some(entry) => self.inner.remove_entry(&entry).await,
            None => Ok(false),
        }
    }

    /// All entries, least recently accessed first.
    pub async fn list_entries(&self) -> Vec<CacheEntry> {
        self.inner.metadata.entries().await
    }

    pub async fn entry(&self, message_id: &MessageId) -> Option<CacheEntry> {
        self.inner.metadata.get(message_id).await
    }

    pub async fn stats(&self) -> CacheStats {
        let (entries, total_bytes) = self.inner.metadata.totals().await;
        let (mut queued, mut downloading) = (0, 0);
        for task in self.inner.tasks.lock().await.values() {
            match task.state() {
                DownloadState::Queued => queued += 1,
                DownloadState::Downloading { .. } => downloading += 1,
                _ => {}
            }
        }

        CacheStats {
            entries,
            total_bytes,
            queued,
            downloading,
            pinned: self.inner.pins.lock().len(),
            max_entries: self.inner.config.max_entries,
            max_bytes: self.inner.config.max_bytes,
            calculated_at: self.inner.clock.unix_timestamp(),
        }
    }

    /// Progress of every download currently transferring bytes.
    pub async fn active_downloads(&self) -> Vec<DownloadProgress> {
        self.inner
            .tasks
            .lock()
            .await
            .values()
            .filter(|task| matches!(task.state(), DownloadState::Downloading { .. }))
            .map(|task| task.progress())
            .collect()
    }

    /// State of the in-flight download for a message, if any.
    pub async fn download_state(&self, message_id: &MessageId) -> Option<DownloadState> {
        self.inner
            .tasks
            .lock()
            .await
            .get(message_id)
            .map(|task| task.state())
    }

    /// Stop the workers. Queued tasks stay queued and are dropped with the
    /// manager.
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
    }
}

impl std::fmt::Debug for VoiceCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCacheManager")
            .field("config", &self.inner.config)
            .field("cache_dir", &self.cache_directory())
            .finish()
    }
}

impl CacheInner {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlaybackError::NotInitialized)
        }
    }

    fn cache_dir(&self) -> Result<PathBuf> {
        self.cache_dir.read().clone().ok_or(PlaybackError::NotInitialized)
    }

    /// Resolve the cache directory, reconcile metadata with the files on
    /// disk and enforce the limits. Returns `None` if already initialized.
    async fn initialize(&self) -> Result<Option<ReconcileReport>> {
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            debug!("Cache manager already initialized");
            return Ok(None);
        }

        info!("Initializing voice cache manager");

        let base = self.fs.get_cache_directory().await.map_err(|e| {
            PlaybackError::Storage(format!("Failed to get cache directory: {}", e))
        })?;
        let dir = base.join(&self.config.cache_directory);
        self.fs.create_dir_all(&dir).await.map_err(|e| {
            PlaybackError::Storage(format!("Failed to create cache directory: {}", e))
        })?;
        *self.cache_dir.write() = Some(dir.clone());

        let load = self.metadata.load().await?;
        let mut report = ReconcileReport {
            loaded: load.loaded,
            malformed: load.malformed,
            ..Default::default()
        };

        let now = self.clock.now();
        let retention = self.config.retention();
        for entry in self.metadata.entries().await {
            if !self.fs.exists(&entry.local_path).await.unwrap_or(false) {
                debug!(message_id = %entry.message_id, "Dropping entry without file");
                self.metadata.remove(&entry.message_id).await?;
                report.dropped_missing += 1;
            } else if entry.is_expired(now, retention) {
                self.evict(&entry, EvictionReason::Retention).await?;
                report.expired += 1;
            }
        }

        report.orphans_removed = self.remove_orphans(&dir).await?;
        report.evicted = self.enforce_limits().await?;
        self.initialized.store(true, Ordering::SeqCst);

        self.notifier.publish_cache_event(CacheEvent::Reconciled {
            loaded: report.loaded,
            dropped_missing: report.dropped_missing,
            expired: report.expired,
            orphans_removed: report.orphans_removed,
        });
        info!(
            loaded = report.loaded,
            malformed = report.malformed,
            dropped_missing = report.dropped_missing,
            expired = report.expired,
            orphans_removed = report.orphans_removed,
            evicted = report.evicted,
            "Voice cache reconciled"
        );
        Ok(Some(report))
    }

    /// Delete files in the cache directory that no entry refers to.
    async fn remove_orphans(&self, dir: &Path) -> Result<usize> {
        let known: HashSet<PathBuf> = self
            .metadata
            .entries()
            .await
            .into_iter()
            .map(|entry| entry.local_path)
            .collect();

        let files = self
            .fs
            .list_directory(dir)
            .await
            .map_err(PlaybackError::storage)?;

        let mut removed = 0;
        for path in files {
            if known.contains(&path) {
                continue;
            }
            match self.fs.metadata(&path).await {
                Ok(meta) if meta.is_directory => continue,
                _ => {}
            }
            match self.fs.delete_file(&path).await {
                Ok(()) => {
                    debug!(path = ?path, partial = is_partial_file(&path), "Removed orphaned file");
                    removed += 1;
                }
                Err(e) => warn!(path = ?path, error = %e, "Failed to remove orphaned file"),
            }
        }
        Ok(removed)
    }

    async fn cached_path(&self, message_id: &MessageId) -> Result<Option<PathBuf>> {
        let Some(entry) = self.metadata.get(message_id).await else {
            return Ok(None);
        };
        if !self.verify(&entry).await {
            return Ok(None);
        }

        if let Err(e) = self.metadata.touch(message_id, self.clock.now()).await {
            warn!(message_id = %message_id, error = %e, "Failed to record access time");
        }
        Ok(Some(entry.local_path))
    }

    async fn inspect(&self, entry: &CacheEntry) -> FileCheck {
        match self.fs.metadata(&entry.local_path).await {
            Ok(meta) if meta.size == entry.size_bytes => FileCheck::Intact,
            Ok(meta) => FileCheck::Corrupt { actual: meta.size },
            Err(_) => FileCheck::Missing,
        }
    }

    /// Returns `true` if the entry's file is intact; otherwise the entry is
    /// dropped.
    async fn verify(&self, entry: &CacheEntry) -> bool {
        match self.inspect(entry).await {
            FileCheck::Intact => true,
            FileCheck::Missing => {
                self.forget_missing(entry).await;
                false
            }
            FileCheck::Corrupt { actual } => {
                self.discard_corrupt(entry, actual).await;
                false
            }
        }
    }

    async fn forget_missing(&self, entry: &CacheEntry) {
        warn!(message_id = %entry.message_id, path = ?entry.local_path, "Cached file disappeared");
        if let Err(e) = self.metadata.remove(&entry.message_id).await {
            warn!(message_id = %entry.message_id, error = %e, "Failed to drop cache entry");
        }
        self.entry_removed(&entry.message_id);
        self.notifier.update(&entry.message_id, |state| {
            state.cache_state = CacheState::NotCached;
            state.download_pct = 0;
        });
    }

    async fn discard_corrupt(&self, entry: &CacheEntry, actual: u64) {
        warn!(
            message_id = %entry.message_id,
            expected = entry.size_bytes,
            actual,
            "Cached file is corrupted, discarding"
        );
        if let Err(e) = self.fs.remove_if_exists(&entry.local_path).await {
            warn!(message_id = %entry.message_id, error = %e, "Failed to delete corrupted file");
        }
        if let Err(e) = self.metadata.remove(&entry.message_id).await {
            warn!(message_id = %entry.message_id, error = %e, "Failed to drop cache entry");
        }
        self.entry_removed(&entry.message_id);

        self.notifier.publish_cache_event(CacheEvent::CorruptionDetected {
            message_id: entry.message_id.to_string(),
            expected_bytes: entry.size_bytes,
            actual_bytes: actual,
        });
        self.notifier.update(&entry.message_id, |state| {
            state.cache_state = CacheState::NotCached;
            state.download_pct = 0;
            state.error_kind = Some(ErrorKind::CorruptFile);
        });
    }

    async fn discard_partial(&self, path: &Path) {
        if let Err(e) = self.fs.remove_if_exists(path).await {
            warn!(path = ?path, error = %e, "Failed to remove partial download");
        }
    }

    /// Ids that must not be evicted: downloading or pinned by playback.
    async fn protected_ids(&self) -> HashSet<MessageId> {
        let mut ids: HashSet<MessageId> = self.tasks.lock().await.keys().cloned().collect();
        ids.extend(self.pins.lock().keys().cloned());
        ids
    }

    async fn enforce_limits(&self) -> Result<usize> {
        let _guard = self.eviction_lock.lock().await;
        let protected = self.protected_ids().await;
        let mut evicted = 0;

        loop {
            let (count, bytes) = self.metadata.totals().await;
            let reason = if count > self.config.max_entries {
                EvictionReason::CountLimit
            } else if bytes > self.config.max_bytes {
                EvictionReason::SizeLimit
            } else {
                break;
            };

            let Some(victim) = self.metadata.least_recently_used(&protected).await else {
                warn!(count, bytes, "Cache over limits but every entry is in use");
                break;
            };
            if self.evict(&victim, reason).await? {
                evicted += 1;
            }
        }

        Ok(evicted)
    }

    async fn evict(&self, entry: &CacheEntry, reason: EvictionReason) -> Result<bool> {
        if !self.remove_entry(entry).await? {
            return Ok(false);
        }

        self.notifier.publish_cache_event(CacheEvent::Evicted {
            message_id: entry.message_id.to_string(),
            size_bytes: entry.size_bytes,
            reason,
        });
        info!(
            message_id = %entry.message_id,
            size_bytes = entry.size_bytes,
            reason = ?reason,
            "Evicted cached message"
        );
        Ok(true)
    }

    /// Drop the entry, then its file. A file left behind by a failed delete
    /// is collected as an orphan on the next start.
    async fn remove_entry(&self, entry: &CacheEntry) -> Result<bool> {
        if self.metadata.remove(&entry.message_id).await?.is_none() {
            return Ok(false);
        }
        if let Err(e) = self.fs.remove_if_exists(&entry.local_path).await {
            warn!(message_id = %entry.message_id, error = %e, "Failed to delete cached file");
        }
        self.entry_removed(&entry.message_id);
        self.notifier.update(&entry.message_id, |state| {
            state.cache_state = CacheState::NotCached;
            state.download_pct = 0;
        });
        Ok(true)
    }

    fn entry_removed(&self, message_id: &MessageId) {
        let listeners: Vec<_> = {
            let mut registered = self.removal_listeners.lock();
            registered.retain(|listener| listener.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.entry_removed(message_id);
        }
    }

    fn owns(tasks: &HashMap<MessageId, Arc<DownloadTask>>, task: &Arc<DownloadTask>) -> bool {
        tasks
            .get(task.message_id())
            .map_or(false, |current| Arc::ptr_eq(current, task))
    }

    /// Promote a finished partial file and record its entry.
    async fn commit(&self, task: &Arc<DownloadTask>, part: &Path, target: &Path, size: u64) {
        let message_id = task.message_id();
        let mut tasks = self.tasks.lock().await;
        if !Self::owns(&tasks, task) {
            // Cancelled while the last bytes were written.
            drop(tasks);
            self.discard_partial(part).await;
            return;
        }

        if let Err(e) = self.fs.rename(part, target).await {
            tasks.remove(message_id);
            drop(tasks);
            self.discard_partial(part).await;
            let error = PlaybackError::Storage(format!("Failed to promote download: {}", e));
            self.report_failure(task, error);
            return;
        }

        let entry = CacheEntry::new(
            message_id.clone(),
            target.to_path_buf(),
            size,
            self.clock.now(),
        );
        if let Err(e) = self.metadata.insert(entry).await {
            tasks.remove(message_id);
            drop(tasks);
            self.discard_partial(target).await;
            self.report_failure(task, e);
            return;
        }

        tasks.remove(message_id);
        drop(tasks);

        self.notifier.update(message_id, |state| {
            state.cache_state = CacheState::Cached;
            state.download_pct = 100;
            state.error_kind = None;
        });
        task.finish(DownloadEvent::Completed {
            path: target.to_path_buf(),
        });
        info!(message_id = %message_id, size_bytes = size, "Download cached");

        if let Err(e) = self.enforce_limits().await {
            warn!(error = %e, "Failed to enforce cache limits");
        }
    }

    async fn fail(&self, task: &Arc<DownloadTask>, error: PlaybackError) {
        let owned = {
            let mut tasks = self.tasks.lock().await;
            let owned = Self::owns(&tasks, task);
            if owned {
                tasks.remove(task.message_id());
            }
            owned
        };

        if owned {
            self.report_failure(task, error);
        }
    }

    fn report_failure(&self, task: &DownloadTask, error: PlaybackError) {
        if let PlaybackError::Cancelled(_) = error {
            task.finish(DownloadEvent::Cancelled);
            return;
        }

        warn!(message_id = %task.message_id(), error = %error, "Download failed");
        let kind = error.kind();
        self.notifier.update(task.message_id(), |state| {
            state.cache_state = CacheState::Failed;
            state.error_kind = Some(kind);
        });
        task.finish(DownloadEvent::Failed { error });
    }
}

#[async_trait]
impl JobRunner for CacheInner {
    async fn run(&self, task: Arc<DownloadTask>) {
        let dir = match self.cache_dir() {
            Ok(dir) => dir,
            Err(e) => {
                self.fail(&task, e).await;
                task.settle();
                return;
            }
        };

        let part = dir.join(partial_file_name(task.message_id(), &task.id()));
        let target = dir.join(cache_file_name(task.message_id(), task.url()));
        debug!(message_id = %task.message_id(), task_id = %task.id(), "Starting download");

        match self.fetcher.fetch(&task, &part).await {
            Ok(size) => self.commit(&task, &part, &target, size).await,
            Err(error) => {
                self.discard_partial(&part).await;
                self.fail(&task, error).await;
            }
        }
        task.settle();
    }
}
