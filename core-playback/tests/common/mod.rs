//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{
    AudioEngineAdapter, Clock, DownloadResponse, HttpClient, KeyValueStore, PreparedMedia,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_playback::cache::{CacheConfig, VoiceCacheManager};
use core_playback::StateNotifier;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::io::StreamReader;

// ============================================================================
// HTTP
// ============================================================================

#[derive(Default)]
struct Route {
    body: Vec<u8>,
    failures: VecDeque<u16>,
    gate: Option<Arc<Semaphore>>,
    stall: Option<(usize, Arc<Semaphore>)>,
    announced_len: Option<u64>,
}

/// Serves scripted bodies per URL and records every request.
#[derive(Default)]
pub struct FakeHttpClient {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.routes.lock().entry(url.to_string()).or_default().body = body;
    }

    /// Answer the next `times` requests for `url` with `status`.
    pub fn fail_next(&self, url: &str, status: u16, times: usize) {
        let mut routes = self.routes.lock();
        let route = routes.entry(url.to_string()).or_default();
        route.failures.extend(std::iter::repeat(status).take(times));
    }

    /// Announce a content length that differs from the body.
    pub fn announce_length(&self, url: &str, length: u64) {
        self.routes.lock().entry(url.to_string()).or_default().announced_len = Some(length);
    }

    /// Hold requests for `url` until permits are added to the returned gate.
    pub fn gate(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.routes.lock().entry(url.to_string()).or_default().gate = Some(gate.clone());
        gate
    }

    /// Deliver the first `bytes` of the body, then hold the rest until a
    /// permit is added to the returned gate.
    pub fn stall_after(&self, url: &str, bytes: usize) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.routes.lock().entry(url.to_string()).or_default().stall = Some((bytes, gate.clone()));
        gate
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    /// Highest number of requests that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn download_stream(&self, url: &str) -> BridgeResult<DownloadResponse> {
        self.requests.lock().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let (gate, failure) = {
            let mut routes = self.routes.lock();
            match routes.get_mut(url) {
                Some(route) => (route.gate.clone(), route.failures.pop_front()),
                None => return Err(BridgeError::from_status(404, url)),
            }
        };

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(status) = failure {
            return Err(BridgeError::from_status(status, url));
        }

        let (body, length, stall) = {
            let routes = self.routes.lock();
            let route = routes
                .get(url)
                .ok_or_else(|| BridgeError::from_status(404, url))?;
            let length = route.announced_len.unwrap_or(route.body.len() as u64);
            (route.body.clone(), length, route.stall.clone())
        };

        let body: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match stall {
            Some((split, gate)) => {
                let split = split.min(body.len());
                let head = Bytes::copy_from_slice(&body[..split]);
                let tail = Bytes::copy_from_slice(&body[split..]);
                let chunks = futures::stream::once(async move { Ok::<_, std::io::Error>(head) })
                    .chain(futures::stream::once(async move {
                        if let Ok(permit) = gate.acquire().await {
                            permit.forget();
                        }
                        Ok(tail)
                    }));
                Box::new(StreamReader::new(Box::pin(chunks)))
            }
            None => Box::new(std::io::Cursor::new(body)),
        };

        Ok(DownloadResponse::new(200, Some(length), body))
    }
}

// ============================================================================
// Key-value store
// ============================================================================

#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::StorageFailed("disk full".to_string()));
        }
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        Ok(self
            .values
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Audio engine
// ============================================================================

#[derive(Default)]
struct EngineInner {
    loaded: Option<PathBuf>,
    position: Duration,
    playing: bool,
    speed: f32,
    prepares: Vec<PathBuf>,
    seeks: Vec<Duration>,
    play_calls: usize,
    disposed: bool,
    fail_prepare: bool,
    fail_play: bool,
}

/// In-memory engine whose position only moves through [`FakeEngine::advance`].
pub struct FakeEngine {
    inner: Mutex<EngineInner>,
    duration: Duration,
    /// Position change the engine applies on pause, like engines that do
    /// not keep the exact position.
    pause_drift: Mutex<Duration>,
    busy: AtomicBool,
    overlaps: AtomicUsize,
}

impl FakeEngine {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(EngineInner {
                speed: 1.0,
                ..Default::default()
            }),
            duration,
            pause_drift: Mutex::new(Duration::ZERO),
            busy: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
        })
    }

    /// Move the playhead forward if playing.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock();
        if inner.playing {
            inner.position = (inner.position + by).min(self.duration);
        }
    }

    pub fn set_pause_drift(&self, drift: Duration) {
        *self.pause_drift.lock() = drift;
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.inner.lock().fail_prepare = fail;
    }

    pub fn fail_play(&self, fail: bool) {
        self.inner.lock().fail_play = fail;
    }

    pub fn position(&self) -> Duration {
        self.inner.lock().position
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    pub fn speed(&self) -> f32 {
        self.inner.lock().speed
    }

    pub fn loaded(&self) -> Option<PathBuf> {
        self.inner.lock().loaded.clone()
    }

    pub fn prepare_count(&self) -> usize {
        self.inner.lock().prepares.len()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.inner.lock().seeks.clone()
    }

    pub fn play_calls(&self) -> usize {
        self.inner.lock().play_calls
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Number of engine calls that started while another was running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> BusyGuard<'_> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        BusyGuard(&self.busy)
    }

    fn check_usable(inner: &EngineInner) -> BridgeResult<()> {
        if inner.disposed {
            Err(BridgeError::NotAvailable("engine disposed".to_string()))
        } else {
            Ok(())
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioEngineAdapter for FakeEngine {
    async fn prepare(&self, path: &Path) -> BridgeResult<PreparedMedia> {
        let _busy = self.enter().await;
        let mut inner = self.inner.lock();
        Self::check_usable(&inner)?;
        inner.prepares.push(path.to_path_buf());
        if inner.fail_prepare {
            inner.loaded = None;
            return Err(BridgeError::OperationFailed("unsupported codec".to_string()));
        }
        inner.loaded = Some(path.to_path_buf());
        inner.position = Duration::ZERO;
        inner.playing = false;
        Ok(PreparedMedia::new(self.duration))
    }

    async fn play(&self) -> BridgeResult<()> {
        let _busy = self.enter().await;
        let mut inner = self.inner.lock();
        Self::check_usable(&inner)?;
        if inner.loaded.is_none() {
            return Err(BridgeError::OperationFailed("nothing loaded".to_string()));
        }
        if inner.fail_play {
            return Err(BridgeError::OperationFailed("output device lost".to_string()));
        }
        inner.play_calls += 1;
        inner.playing = true;
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        let _busy = self.enter().await;
        let drift = *self.pause_drift.lock();
        let mut inner = self.inner.lock();
        Self::check_usable(&inner)?;
        inner.playing = false;
        inner.position = (inner.position + drift).min(self.duration);
        Ok(())
    }

    async fn seek(&self, position: Duration) -> BridgeResult<()> {
        let _busy = self.enter().await;
        let mut inner = self.inner.lock();
        Self::check_usable(&inner)?;
        inner.seeks.push(position);
        inner.position = position.min(self.duration);
        Ok(())
    }

    async fn set_speed(&self, speed: f32) -> BridgeResult<()> {
        let _busy = self.enter().await;
        let mut inner = self.inner.lock();
        Self::check_usable(&inner)?;
        inner.speed = speed;
        Ok(())
    }

    async fn current_position(&self) -> BridgeResult<Duration> {
        let _busy = self.enter().await;
        let inner = self.inner.lock();
        Self::check_usable(&inner)?;
        Ok(inner.position)
    }

    async fn dispose(&self) -> BridgeResult<()> {
        let _busy = self.enter().await;
        let mut inner = self.inner.lock();
        inner.disposed = true;
        inner.playing = false;
        inner.loaded = None;
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Cache manager over a temporary directory with fake network and store.
pub struct CacheHarness {
    pub dir: TempDir,
    pub http: Arc<FakeHttpClient>,
    pub kv: Arc<MemoryKeyValueStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<StateNotifier>,
    pub manager: VoiceCacheManager,
}

impl CacheHarness {
    pub async fn new(config: CacheConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let http = FakeHttpClient::new();
        let kv = MemoryKeyValueStore::new();
        let clock = ManualClock::new();
        let notifier = Arc::new(StateNotifier::default());
        let manager = build_manager(&dir, &http, &kv, &clock, &notifier, config);
        manager.initialize().await.unwrap();
        Self {
            dir,
            http,
            kv,
            clock,
            notifier,
            manager,
        }
    }

    /// A second manager over the same directory and store, as after a
    /// process restart. Not initialized.
    pub fn restart(&self, config: CacheConfig) -> VoiceCacheManager {
        self.manager.shutdown();
        build_manager(
            &self.dir,
            &self.http,
            &self.kv,
            &self.clock,
            &Arc::new(StateNotifier::default()),
            config,
        )
    }

    /// Serve `body` for `id` and download it to completion.
    pub async fn cache_message(&self, id: &str, body: Vec<u8>) -> PathBuf {
        let url = url_for(id);
        self.http.serve(&url, body);
        let stream = self
            .manager
            .request_download(&id.into(), &url)
            .await
            .unwrap();
        stream.wait().await.into_result(&id.into()).unwrap()
    }

    pub fn voice_dir(&self) -> PathBuf {
        self.dir.path().join("voice_messages")
    }
}

pub fn url_for(id: &str) -> String {
    format!("https://cdn.example.com/voice/{}.m4a", id)
}

/// Cache settings with fast retries.
pub fn test_config() -> CacheConfig {
    CacheConfig::default()
        .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(4))
        .with_download_timeout(Duration::from_secs(5))
}

fn build_manager(
    dir: &TempDir,
    http: &Arc<FakeHttpClient>,
    kv: &Arc<MemoryKeyValueStore>,
    clock: &Arc<ManualClock>,
    notifier: &Arc<StateNotifier>,
    config: CacheConfig,
) -> VoiceCacheManager {
    VoiceCacheManager::builder(config)
        .http_client(http.clone())
        .file_system(Arc::new(TokioFileSystem::with_cache_directory(
            dir.path().to_path_buf(),
        )))
        .kv_store(kv.clone())
        .clock(clock.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Async variant of [`wait_until`].
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
