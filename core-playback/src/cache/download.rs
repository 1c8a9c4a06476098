//! Streaming downloader with retry and cancellation

use crate::cache::task::DownloadTask;
use crate::error::{PlaybackError, Result};
use crate::notifier::StateNotifier;
use bridge_traits::http::{HttpClient, RetryPolicy};
use bridge_traits::storage::FileSystemAccess;
use bytes::BytesMut;
use core_runtime::events::CacheState;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams a remote file into a partial file on disk.
pub(crate) struct Fetcher {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    notifier: Arc<StateNotifier>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        notifier: Arc<StateNotifier>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            fs,
            notifier,
            retry,
            timeout,
        }
    }

    /// Download `task` into `part_path`, retrying transient failures.
    ///
    /// Returns the number of bytes written. On error the partial file may
    /// still exist; the caller removes it.
    pub async fn fetch(&self, task: &DownloadTask, part_path: &Path) -> Result<u64> {
        let mut attempt = 1;

        loop {
            task.start_attempt(attempt);
            self.publish_percent(task, task.progress().percent);

            let result = tokio::select! {
                biased;
                _ = task.cancelled() => Err(PlaybackError::Cancelled(task.message_id().to_string())),
                result = tokio::time::timeout(self.timeout, self.attempt(task, part_path)) => {
                    result.unwrap_or_else(|_| {
                        Err(PlaybackError::NetworkTransient(format!(
                            "download timed out after {:?}",
                            self.timeout
                        )))
                    })
                }
            };

            match result {
                Ok(size) => return Ok(size),
                Err(e) if e.is_transient() && self.retry.allows_retry_after(attempt) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        message_id = %task.message_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download attempt failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = task.cancelled() => {
                            return Err(PlaybackError::Cancelled(task.message_id().to_string()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, task: &DownloadTask, part_path: &Path) -> Result<u64> {
        let response = self
            .http
            .download_stream(task.url())
            .await
            .map_err(PlaybackError::from_network)?;

        let expected = response.content_length;
        task.set_content_length(expected);

        let mut writer = self
            .fs
            .open_write_stream(part_path)
            .await
            .map_err(PlaybackError::storage)?;
        let mut body = response.body;
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        let mut downloaded: u64 = 0;

        loop {
            buffer.clear();
            let read = body
                .read_buf(&mut buffer)
                .await
                .map_err(|e| PlaybackError::NetworkTransient(format!("body read failed: {}", e)))?;
            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer)
                .await
                .map_err(PlaybackError::storage)?;
            downloaded += read as u64;
            if let Some(percent) = task.record_bytes(downloaded) {
                self.publish_percent(task, percent);
            }
        }

        writer.flush().await.map_err(PlaybackError::storage)?;
        writer.shutdown().await.map_err(PlaybackError::storage)?;

        if let Some(expected) = expected {
            if downloaded != expected {
                return Err(PlaybackError::NetworkTransient(format!(
                    "body ended after {} of {} bytes",
                    downloaded, expected
                )));
            }
        }

        debug!(message_id = %task.message_id(), bytes = downloaded, "Download attempt finished");
        Ok(downloaded)
    }

    fn publish_percent(&self, task: &DownloadTask, percent: u8) {
        self.notifier.update(task.message_id(), |state| {
            state.cache_state = CacheState::Downloading;
            state.download_pct = percent;
            state.error_kind = None;
        });
    }

    /// Exponential delay with equal jitter: half fixed, half random.
    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.retry.delay_for_attempt(attempt);
        let half = delay / 2;
        let jitter_ms = half.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        half + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::DownloadResponse;
    use bridge_traits::storage::FileMetadata;
    use crate::cache::entry::MessageId;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Body(Vec<u8>),
        Short { announced: u64, body: Vec<u8> },
        Status(u16),
    }

    struct ScriptedHttp {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedHttp {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn download_stream(&self, url: &str) -> BridgeResult<DownloadResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().pop_front() {
                Some(Reply::Body(body)) => Ok(DownloadResponse::new(
                    200,
                    Some(body.len() as u64),
                    Box::new(std::io::Cursor::new(body)),
                )),
                Some(Reply::Short { announced, body }) => Ok(DownloadResponse::new(
                    200,
                    Some(announced),
                    Box::new(std::io::Cursor::new(body)),
                )),
                Some(Reply::Status(status)) => Err(BridgeError::from_status(status, url)),
                None => Err(BridgeError::Network("no scripted reply".to_string())),
            }
        }
    }

    /// Collects written bytes in memory.
    #[derive(Default)]
    struct MemoryFs {
        written: Arc<Mutex<Vec<u8>>>,
    }

    struct MemoryWriter(Arc<Mutex<Vec<u8>>>);

    impl tokio::io::AsyncWrite for MemoryWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.0.lock().extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[async_trait]
    impl FileSystemAccess for MemoryFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/mem"))
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
            self.written.lock().clear();
            Ok(Box::new(MemoryWriter(self.written.clone())))
        }
    }

    fn fetcher(http: Arc<ScriptedHttp>, fs: Arc<MemoryFs>, attempts: u32) -> Fetcher {
        Fetcher::new(
            http,
            fs,
            Arc::new(StateNotifier::default()),
            RetryPolicy {
                max_attempts: attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                use_exponential_backoff: true,
            },
            Duration::from_secs(5),
        )
    }

    fn task() -> DownloadTask {
        DownloadTask::new(MessageId::new("m1"), "https://cdn.test/m1.m4a")
    }

    #[tokio::test]
    async fn test_successful_download() {
        let http = ScriptedHttp::new(vec![Reply::Body(vec![7u8; 1000])]);
        let fs = Arc::new(MemoryFs::default());
        let fetcher = fetcher(http.clone(), fs.clone(), 3);

        let size = fetcher.fetch(&task(), Path::new("/mem/m1.part")).await.unwrap();
        assert_eq!(size, 1000);
        assert_eq!(fs.written.lock().len(), 1000);
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let http = ScriptedHttp::new(vec![
            Reply::Status(503),
            Reply::Short {
                announced: 10,
                body: vec![1, 2, 3],
            },
            Reply::Body(vec![1u8; 10]),
        ]);
        let fs = Arc::new(MemoryFs::default());
        let fetcher = fetcher(http.clone(), fs.clone(), 3);
        let task = task();

        assert_eq!(fetcher.fetch(&task, Path::new("/mem/p")).await.unwrap(), 10);
        assert_eq!(http.calls.load(Ordering::SeqCst), 3);
        assert_eq!(task.progress().attempt, 3);
        assert_eq!(fs.written.lock().len(), 10);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let http = ScriptedHttp::new(vec![Reply::Status(404), Reply::Body(vec![1])]);
        let fetcher = fetcher(http.clone(), Arc::new(MemoryFs::default()), 3);

        let err = fetcher.fetch(&task(), Path::new("/mem/p")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NetworkPermanent(_)));
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_ceiling() {
        let http = ScriptedHttp::new(vec![
            Reply::Status(500),
            Reply::Status(502),
            Reply::Status(503),
            Reply::Body(vec![1]),
        ]);
        let fetcher = fetcher(http.clone(), Arc::new(MemoryFs::default()), 3);

        let err = fetcher.fetch(&task(), Path::new("/mem/p")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(http.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_task_stops() {
        let http = ScriptedHttp::new(vec![Reply::Body(vec![1])]);
        let fetcher = fetcher(http, Arc::new(MemoryFs::default()), 3);
        let task = task();
        task.cancel();

        let err = fetcher.fetch(&task, Path::new("/mem/p")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Cancelled(_)));
    }

    #[test]
    fn test_backoff_stays_within_window() {
        let http = ScriptedHttp::new(vec![]);
        let fetcher = Fetcher::new(
            http,
            Arc::new(MemoryFs::default()),
            Arc::new(StateNotifier::default()),
            RetryPolicy::default(),
            Duration::from_secs(1),
        );

        for attempt in 1..6 {
            let full = RetryPolicy::default().delay_for_attempt(attempt);
            let delay = fetcher.backoff(attempt);
            assert!(delay >= full / 2 && delay <= full);
        }
    }
}
