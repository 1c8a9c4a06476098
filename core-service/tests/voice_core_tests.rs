//! End-to-end tests of the service façade over the desktop bridges.

use async_trait::async_trait;
use bridge_desktop::{SqliteKeyValueStore, TokioFileSystem};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{AudioEngineAdapter, DownloadResponse, HttpClient, PreparedMedia};
use core_service::{CoreConfig, MessageId, VoiceCore, WaveformExtractor};
use core_runtime::events::{CacheState, PlaybackState};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const URL: &str = "https://cdn.example.com/voice/hello.m4a";

#[derive(Default)]
struct StaticHttpClient {
    requests: AtomicUsize,
}

#[async_trait]
impl HttpClient for StaticHttpClient {
    async fn download_stream(&self, url: &str) -> BridgeResult<DownloadResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if url != URL {
            return Err(BridgeError::from_status(404, url));
        }
        let body = vec![9u8; 2048];
        Ok(DownloadResponse::new(
            200,
            Some(body.len() as u64),
            Box::new(std::io::Cursor::new(body)),
        ))
    }
}

#[derive(Default)]
struct EngineLog {
    loaded: Option<PathBuf>,
    playing: bool,
    disposed: bool,
}

#[derive(Default)]
struct RecordingEngine {
    log: Mutex<EngineLog>,
}

#[async_trait]
impl AudioEngineAdapter for RecordingEngine {
    async fn prepare(&self, path: &Path) -> BridgeResult<PreparedMedia> {
        self.log.lock().loaded = Some(path.to_path_buf());
        Ok(PreparedMedia::new(Duration::from_secs(20)))
    }

    async fn play(&self) -> BridgeResult<()> {
        self.log.lock().playing = true;
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.log.lock().playing = false;
        Ok(())
    }

    async fn seek(&self, _position: Duration) -> BridgeResult<()> {
        Ok(())
    }

    async fn set_speed(&self, _speed: f32) -> BridgeResult<()> {
        Ok(())
    }

    async fn current_position(&self) -> BridgeResult<Duration> {
        Ok(Duration::from_secs(1))
    }

    async fn dispose(&self) -> BridgeResult<()> {
        let mut log = self.log.lock();
        log.disposed = true;
        log.playing = false;
        Ok(())
    }
}

struct FlatExtractor;

#[async_trait]
impl WaveformExtractor for FlatExtractor {
    async fn extract(&self, _path: &Path, sample_count: usize) -> core_playback::Result<Vec<f32>> {
        Ok(vec![0.5; sample_count])
    }
}

async fn config(dir: &TempDir, http: Arc<StaticHttpClient>) -> CoreConfig {
    let kv = SqliteKeyValueStore::new(dir.path().join("core.db"))
        .await
        .unwrap();
    CoreConfig::builder()
        .http_client(http)
        .file_system(Arc::new(TokioFileSystem::with_cache_directory(
            dir.path().to_path_buf(),
        )))
        .kv_store(Arc::new(kv))
        .waveform_sample_count(16)
        .position_poll_interval(Duration::from_millis(20))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_play_remote_through_core() {
    let dir = tempfile::tempdir().unwrap();
    let http = Arc::new(StaticHttpClient::default());
    let engine = Arc::new(RecordingEngine::default());

    let core = VoiceCore::builder(config(&dir, http.clone()).await, engine.clone())
        .waveform_extractor(Arc::new(FlatExtractor))
        .build()
        .await
        .unwrap();
    let id = MessageId::new("hello");

    core.playback().play_remote(&id, URL).await.unwrap();

    let state = core.state(&id);
    assert_eq!(state.playback_state, PlaybackState::Playing);
    assert_eq!(state.cache_state, CacheState::Cached);
    assert_eq!(state.duration_ms, 20_000);
    assert_eq!(state.waveform_samples, vec![0.5; 16]);
    assert!(engine.log.lock().playing);
    assert!(engine.log.lock().loaded.is_some());
    assert_eq!(core.stats().await.entries, 1);

    core.shutdown().await.unwrap();
    assert!(engine.log.lock().disposed);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let http = Arc::new(StaticHttpClient::default());
    let id = MessageId::new("hello");

    {
        let core = VoiceCore::builder(
            config(&dir, http.clone()).await,
            Arc::new(RecordingEngine::default()),
        )
        .without_waveforms()
        .build()
        .await
        .unwrap();
        core.cache()
            .request_download(&id, URL)
            .await
            .unwrap()
            .wait()
            .await
            .into_result(&id)
            .unwrap();
        core.shutdown().await.unwrap();
    }

    let core = VoiceCore::builder(
        config(&dir, http.clone()).await,
        Arc::new(RecordingEngine::default()),
    )
    .without_waveforms()
    .build()
    .await
    .unwrap();

    assert_eq!(core.startup_report().loaded, 1);
    assert!(core.cache().is_cached(&id).await.unwrap());
    core.playback().play(&id).await.unwrap();
    assert_eq!(core.state(&id).playback_state, PlaybackState::Playing);
    assert_eq!(http.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_message_reports_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let core = VoiceCore::builder(
        config(&dir, Arc::new(StaticHttpClient::default())).await,
        Arc::new(RecordingEngine::default()),
    )
    .without_waveforms()
    .build()
    .await
    .unwrap();

    let state = core.state(&MessageId::new("never-seen"));
    assert_eq!(state.cache_state, CacheState::NotCached);
    assert_eq!(state.playback_state, PlaybackState::Idle);
    assert_eq!(state.speed, 1.0);
    assert!(state.error_kind.is_none());
}
