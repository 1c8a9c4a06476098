//! File system and key-value storage.
//!
//! The cache keeps audio files under a host-provided directory and one small
//! JSON record per file in a [`KeyValueStore`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// What the cache needs to know about a path: its size for integrity
/// checks and whether to skip it during orphan cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub is_directory: bool,
}

/// File operations used by the download pipeline.
///
/// Downloads are written to a temporary file through
/// [`open_write_stream`](Self::open_write_stream) and promoted with
/// [`rename`](Self::rename), so a reader never sees a half-written file.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn voice_dir(fs: &dyn FileSystemAccess) -> Result<PathBuf> {
///     let dir = fs.get_cache_directory().await?.join("voice_messages");
///     fs.create_dir_all(&dir).await?;
///     Ok(dir)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Application-private cache directory, created on first use.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Atomically move `from` to `to`, replacing `to` if it exists.
    ///
    /// Both paths must be on the same volume.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Direct children of `path`, files and directories alike.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Create or truncate `path` (and its parent directories) for writing.
    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>;

    /// Delete `path` if present. Returns whether a file was removed.
    async fn remove_if_exists(&self, path: &Path) -> Result<bool> {
        if self.exists(path).await? {
            self.delete_file(path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Durable string records that survive a restart.
///
/// Hosts typically back this with UserDefaults, DataStore or SQLite. Keys
/// are namespaced by the caller, e.g. `voice_cache:<message id>`, and
/// [`list_keys`](Self::list_keys) enumerates one namespace.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn save(store: &dyn KeyValueStore) -> Result<()> {
///     store.set_string("voice_cache:msg-1", "{...}").await?;
///     let keys = store.list_keys("voice_cache:").await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert or replace.
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a record (no-op when absent)
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all keys starting with `prefix`, sorted
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}
