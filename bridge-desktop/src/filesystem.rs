//! `tokio::fs` backed [`FileSystemAccess`].

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR_NAME: &str = "voice-core";

/// Files live under the platform cache directory (`dirs::cache_dir()`,
/// falling back to the temp directory) unless a directory is given.
pub struct TokioFileSystem {
    cache_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor rooted in the user cache directory
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);

        Self { cache_dir }
    }

    /// Create a new file system accessor with a custom cache directory
    pub fn with_cache_directory(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Location of the SQLite database used by the desktop key-value store
    pub fn default_database_path(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| self.cache_dir.clone())
            .join(APP_DIR_NAME)
            .join("voice_core.db")
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.cache_dir).await.unwrap_or(false) {
            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.cache_dir, "Created cache directory");
        }
        Ok(self.cache_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Renamed file");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        let file = fs::File::create(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Opened file for writing");
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_custom_cache_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("nested").join("cache");
        let fs = TokioFileSystem::with_cache_directory(cache.clone());

        let dir = fs.get_cache_directory().await.unwrap();
        assert_eq!(dir, cache);
        assert!(fs.exists(&cache).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_rename_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_cache_directory(tmp.path().to_path_buf());
        let part = tmp.path().join("voice").join("abc.part");
        let fin = tmp.path().join("voice").join("abc.m4a");

        let mut writer = fs.open_write_stream(&part).await.unwrap();
        writer.write_all(b"voice-bytes").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        fs.rename(&part, &fin).await.unwrap();
        assert!(!fs.exists(&part).await.unwrap());
        assert_eq!(fs.metadata(&fin).await.unwrap().size, 11);

        let listed = fs.list_directory(&tmp.path().join("voice")).await.unwrap();
        assert_eq!(listed, vec![fin.clone()]);

        assert!(fs.remove_if_exists(&fin).await.unwrap());
        assert!(!fs.remove_if_exists(&fin).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_metadata_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_cache_directory(tmp.path().to_path_buf());

        let err = fs.metadata(&tmp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
