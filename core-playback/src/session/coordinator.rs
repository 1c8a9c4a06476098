//! # Playback Session Coordinator
//!
//! Multiplexes any number of per-message sessions onto the single
//! [`AudioEngineAdapter`]. Every engine call happens while holding the
//! coordinator lock, so engine operations never overlap and ownership
//! transfers are strictly sequential.
//!
//! ## State machine
//!
//! ```text
//! Idle ─play─> Preparing ─prepare ok─> Ready ─> Playing <──pause/play──> Paused
//!                  │                              │
//!                  └──────── failure ─> Error <───┘
//!                                                 │ position >= duration
//!                                                 v
//!                                             Completed ─> Idle
//! ```
//!
//! Only the session whose file is loaded into the engine can be `Playing`.
//! Loading another file first pauses the current owner and stores its
//! position, which is restored when that message is played again.
//!
//! A session pins its cache entry against eviction while it is preparing or
//! loaded. Paused sessions that lost the engine keep their position but not
//! their pin.

use super::config::PlaybackConfig;
use super::state::{PlaybackSession, PlaybackSpeed};
use crate::cache::{EntryRemovalListener, MessageId, VoiceCacheManager};
use crate::error::{PlaybackError, Result};
use crate::notifier::StateNotifier;
use crate::waveform::{WaveformCache, WaveformExtractor};
use bridge_traits::AudioEngineAdapter;
use core_runtime::events::{MessageState, PlaybackState};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Bookkeeping around the public session view.
struct Slot {
    view: PlaybackSession,
    /// Cleared by `pause` while the session is still preparing.
    pending_play: bool,
    /// Whether this session holds a pin on its cache entry. Only a session
    /// that is preparing or loaded into the engine holds one.
    pinned: bool,
    /// Identifies the `play` call that owns the current preparation.
    preparation: Option<u64>,
}

impl Slot {
    fn new(message_id: MessageId) -> Self {
        Self {
            view: PlaybackSession::new(message_id),
            pending_play: false,
            pinned: false,
            preparation: None,
        }
    }
}

#[derive(Default)]
struct EngineState {
    /// Message whose file is loaded into the engine.
    loaded: Option<MessageId>,
    sessions: HashMap<MessageId, Slot>,
    next_preparation: u64,
    disposed: bool,
}

impl EngineState {
    fn is_loaded(&self, message_id: &MessageId) -> bool {
        self.loaded.as_ref() == Some(message_id)
    }
}

struct CoordinatorInner {
    config: PlaybackConfig,
    engine: Arc<dyn AudioEngineAdapter>,
    cache: VoiceCacheManager,
    notifier: Arc<StateNotifier>,
    waveforms: Option<Arc<WaveformCache>>,
    state: Mutex<EngineState>,
    ticker: SyncMutex<Option<JoinHandle<()>>>,
}

/// Owns the audio engine and the playback sessions of all messages.
///
/// Cloning is cheap; clones share the same engine and sessions.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PlaybackCoordinator {
    /// Create a coordinator that exclusively owns `engine`.
    ///
    /// When `config.auto_tick` is set and a Tokio runtime is available, a
    /// background task polls the engine position every
    /// `position_poll_interval`.
    pub fn new(
        config: PlaybackConfig,
        engine: Arc<dyn AudioEngineAdapter>,
        cache: VoiceCacheManager,
        extractor: Option<Arc<dyn WaveformExtractor>>,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let notifier = cache.notifier().clone();
        let waveforms = extractor.map(|extractor| {
            let waveforms = Arc::new(WaveformCache::new(extractor, config.waveform_sample_count));
            let listener: Weak<dyn EntryRemovalListener> = Arc::downgrade(&waveforms) as Weak<WaveformCache>;
            cache.add_removal_listener(listener);
            waveforms
        });

        let inner = Arc::new(CoordinatorInner {
            config,
            engine,
            cache,
            notifier,
            waveforms,
            state: Mutex::new(EngineState::default()),
            ticker: SyncMutex::new(None),
        });

        if inner.config.auto_tick {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let ticker = handle.spawn(run_ticker(
                    Arc::downgrade(&inner),
                    inner.config.position_poll_interval,
                ));
                *inner.ticker.lock() = Some(ticker);
            } else {
                debug!("No Tokio runtime; position polling left to the host");
            }
        }

        Ok(Self { inner })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &VoiceCacheManager {
        &self.inner.cache
    }

    /// Memoised waveforms, when extraction is enabled.
    pub fn waveforms(&self) -> Option<&WaveformCache> {
        self.inner.waveforms.as_deref()
    }

    /// Start or resume playback of `message_id`.
    ///
    /// A paused session whose file is still loaded resumes in place. Any
    /// other session is prepared first: the file is resolved through the
    /// cache (downloading it from the registered source if needed), loaded
    /// into the engine and started from the stored position.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn play(&self, message_id: &MessageId) -> Result<()> {
        let inner = &self.inner;

        let preparation = {
            let mut state = inner.state.lock().await;
            ensure_usable(&state)?;

            if state.is_loaded(message_id) {
                let current = state.sessions.get(message_id).map(|slot| slot.view.state);
                match current {
                    Some(PlaybackState::Playing) => return Ok(()),
                    Some(PlaybackState::Paused) | Some(PlaybackState::Ready) => {
                        return inner.resume_loaded(&mut state, message_id).await;
                    }
                    _ => {}
                }
            }

            state.next_preparation += 1;
            let preparation = state.next_preparation;

            let slot = state
                .sessions
                .entry(message_id.clone())
                .or_insert_with(|| Slot::new(message_id.clone()));
            if slot.view.state == PlaybackState::Preparing {
                slot.pending_play = true;
                return Ok(());
            }

            slot.view.state = PlaybackState::Preparing;
            slot.view.error = None;
            slot.pending_play = true;
            slot.preparation = Some(preparation);
            if !slot.pinned {
                inner.cache.pin(message_id);
                slot.pinned = true;
            }
            inner.publish(slot);
            preparation
        };

        // The lock is released while the file is resolved so other sessions
        // stay controllable during a download.
        let resolved = inner.resolve(message_id).await;

        let mut state = inner.state.lock().await;
        let still_ours = state
            .sessions
            .get(message_id)
            .map(|slot| slot.preparation == Some(preparation))
            .unwrap_or(false);
        ensure_usable(&state)?;
        if !still_ours {
            debug!("Preparation superseded");
            return Ok(());
        }

        match resolved {
            Ok((path, waveform)) => inner.load_and_play(&mut state, message_id, path, waveform).await,
            Err(PlaybackError::Cancelled(_)) => {
                inner.reset_to_idle(&mut state, message_id);
                Err(PlaybackError::Cancelled(message_id.to_string()))
            }
            Err(err) => inner.fail(&mut state, message_id, err),
        }
    }

    /// Register `url` as the source of `message_id` and play it.
    pub async fn play_remote(&self, message_id: &MessageId, url: &str) -> Result<()> {
        self.inner.cache.register_source(message_id, url);
        self.play(message_id).await
    }

    /// Pause `message_id`, capturing the engine position first.
    ///
    /// Pausing a session that is still preparing makes it end up `Paused`
    /// instead of `Playing`.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn pause(&self, message_id: &MessageId) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        ensure_usable(&state)?;

        let current = state
            .sessions
            .get(message_id)
            .map(|slot| slot.view.state)
            .ok_or_else(|| PlaybackError::NoSession(message_id.to_string()))?;

        match current {
            PlaybackState::Playing => {
                if let Err(err) = inner.pause_owner(&mut state, message_id).await {
                    return inner.fail(&mut state, message_id, err);
                }
                Ok(())
            }
            PlaybackState::Preparing => {
                if let Some(slot) = state.sessions.get_mut(message_id) {
                    slot.pending_play = false;
                }
                Ok(())
            }
            PlaybackState::Ready => {
                if let Some(slot) = state.sessions.get_mut(message_id) {
                    slot.view.state = PlaybackState::Paused;
                    inner.publish(slot);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Move the playhead of `message_id`.
    ///
    /// The position is clamped to the known duration. Sessions that are not
    /// loaded store it for their next start.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn seek(&self, message_id: &MessageId, position: Duration) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        ensure_usable(&state)?;

        let loaded = state.is_loaded(message_id);
        let slot = state
            .sessions
            .entry(message_id.clone())
            .or_insert_with(|| Slot::new(message_id.clone()));
        let position = slot.view.clamp(position);
        let engine_owned = loaded
            && matches!(
                slot.view.state,
                PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Ready
            );

        if engine_owned {
            if let Err(err) = inner.engine.seek(position).await {
                return inner.fail(&mut state, message_id, PlaybackError::engine(err));
            }
        }

        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.position = position;
            inner.publish(slot);
        }
        Ok(())
    }

    /// Set the playback speed of `message_id`.
    ///
    /// Applied to the engine immediately while playing, otherwise stored for
    /// the next start.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn set_speed(&self, message_id: &MessageId, speed: PlaybackSpeed) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        ensure_usable(&state)?;

        let loaded = state.is_loaded(message_id);
        let slot = state
            .sessions
            .entry(message_id.clone())
            .or_insert_with(|| Slot::new(message_id.clone()));
        let playing = loaded && slot.view.state == PlaybackState::Playing;

        if playing {
            if let Err(err) = inner.engine.set_speed(speed.value()).await {
                return inner.fail(&mut state, message_id, PlaybackError::engine(err));
            }
        }

        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.speed = speed;
            inner.publish(slot);
        }
        Ok(())
    }

    /// Advance `message_id` to the next speed (1x, 1.5x, 2x, 1x, ...).
    pub async fn cycle_speed(&self, message_id: &MessageId) -> Result<PlaybackSpeed> {
        let current = self
            .session(message_id)
            .await
            .map(|session| session.speed)
            .unwrap_or_default();
        let next = current.next();
        self.set_speed(message_id, next).await?;
        Ok(next)
    }

    /// Discard the session of `message_id`, releasing the engine if it owns
    /// it. Returns `false` if no session existed.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn stop(&self, message_id: &MessageId) -> Result<bool> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        ensure_usable(&state)?;

        if state.is_loaded(message_id) {
            let playing = state
                .sessions
                .get(message_id)
                .map(|slot| slot.view.state == PlaybackState::Playing)
                .unwrap_or(false);
            if playing {
                if let Err(err) = inner.engine.pause().await {
                    warn!(error = %err, "Engine pause failed while stopping");
                }
            }
            state.loaded = None;
        }

        let Some(slot) = state.sessions.remove(message_id) else {
            return Ok(false);
        };
        if slot.pinned {
            inner.cache.unpin(message_id);
        }
        inner.notifier.update(message_id, |published| {
            PlaybackSession::new(message_id.clone()).apply_to(published)
        });
        info!("Playback stopped");
        Ok(true)
    }

    /// Poll the engine once.
    ///
    /// Updates the position of the playing session and completes it when the
    /// position reaches the duration. Returns the state of the polled
    /// session, or `None` when nothing is playing.
    pub async fn tick(&self) -> Result<Option<PlaybackState>> {
        self.inner.tick().await
    }

    /// Pause and release the engine. Every later call fails with
    /// [`PlaybackError::Disposed`].
    #[instrument(skip(self))]
    pub async fn dispose(&self) -> Result<()> {
        let inner = &self.inner;
        if let Some(ticker) = inner.ticker.lock().take() {
            ticker.abort();
        }

        let mut state = inner.state.lock().await;
        if state.disposed {
            return Ok(());
        }

        if let Some(owner) = state.loaded.clone() {
            let playing = state
                .sessions
                .get(&owner)
                .map(|slot| slot.view.state == PlaybackState::Playing)
                .unwrap_or(false);
            if playing {
                if let Err(err) = inner.pause_owner(&mut state, &owner).await {
                    warn!(message_id = %owner, error = %err, "Pause before dispose failed");
                }
            }
        }

        state.loaded = None;
        state.disposed = true;
        for slot in state.sessions.values_mut() {
            if slot.pinned {
                inner.cache.unpin(&slot.view.message_id);
                slot.pinned = false;
            }
        }

        inner.engine.dispose().await.map_err(PlaybackError::engine)?;
        info!(sessions = state.sessions.len(), "Playback coordinator disposed");
        Ok(())
    }

    /// Merged cache and playback state of `message_id`.
    pub fn snapshot(&self, message_id: &MessageId) -> MessageState {
        self.inner.notifier.snapshot(message_id)
    }

    pub async fn session(&self, message_id: &MessageId) -> Option<PlaybackSession> {
        let state = self.inner.state.lock().await;
        state.sessions.get(message_id).map(|slot| slot.view.clone())
    }

    /// Message currently playing, if any.
    pub async fn active_message(&self) -> Option<MessageId> {
        let state = self.inner.state.lock().await;
        state
            .sessions
            .values()
            .find(|slot| slot.view.state == PlaybackState::Playing)
            .map(|slot| slot.view.message_id.clone())
    }

    /// Message whose file is loaded into the engine, if any.
    pub async fn loaded_message(&self) -> Option<MessageId> {
        self.inner.state.lock().await.loaded.clone()
    }
}

impl CoordinatorInner {
    fn publish(&self, slot: &Slot) {
        self.notifier
            .update(&slot.view.message_id, |published| slot.view.apply_to(published));
    }

    /// Local path and waveform for `message_id`, downloading if needed.
    async fn resolve(&self, message_id: &MessageId) -> Result<(PathBuf, Option<Arc<Vec<f32>>>)> {
        let path = match self.cache.get_cached_path(message_id).await? {
            Some(path) => path,
            None => {
                let progress = self.cache.download(message_id).await?;
                progress.wait().await.into_result(message_id)?
            }
        };

        let waveform = match &self.waveforms {
            Some(waveforms) => {
                let size_bytes = self
                    .cache
                    .entry(message_id)
                    .await
                    .map(|entry| entry.size_bytes)
                    .unwrap_or(0);
                match waveforms.samples(message_id, &path, size_bytes).await {
                    Ok(samples) => Some(samples),
                    Err(err) => {
                        warn!(message_id = %message_id, error = %err, "Waveform extraction failed");
                        None
                    }
                }
            }
            None => None,
        };

        Ok((path, waveform))
    }

    /// Resume the session whose file is still loaded.
    async fn resume_loaded(&self, state: &mut EngineState, message_id: &MessageId) -> Result<()> {
        let (stored, speed) = match state.sessions.get(message_id) {
            Some(slot) => (slot.view.position, slot.view.speed),
            None => return Err(PlaybackError::NoSession(message_id.to_string())),
        };

        let result = async {
            let engine_position = self.engine.current_position().await?;
            let drift = if engine_position > stored {
                engine_position - stored
            } else {
                stored - engine_position
            };
            if drift > self.config.resume_tolerance {
                debug!(
                    stored_ms = stored.as_millis() as u64,
                    engine_ms = engine_position.as_millis() as u64,
                    "Correcting engine position before resume"
                );
                self.engine.seek(stored).await?;
            }
            self.engine.set_speed(speed.value()).await?;
            self.engine.play().await
        }
        .await;

        if let Err(err) = result {
            return self.fail(state, message_id, PlaybackError::engine(err));
        }

        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.state = PlaybackState::Playing;
            slot.pending_play = false;
            self.publish(slot);
        }
        debug!(position_ms = stored.as_millis() as u64, "Resumed without reload");
        Ok(())
    }

    /// Finish a preparation: take over the engine and start playback.
    async fn load_and_play(
        &self,
        state: &mut EngineState,
        message_id: &MessageId,
        path: PathBuf,
        waveform: Option<Arc<Vec<f32>>>,
    ) -> Result<()> {
        let pending_play = match state.sessions.get_mut(message_id) {
            Some(slot) => {
                slot.preparation = None;
                if let Some(samples) = waveform {
                    slot.view.waveform = samples;
                }
                slot.pending_play
            }
            None => return Ok(()),
        };

        if !pending_play {
            if let Some(slot) = state.sessions.get_mut(message_id) {
                slot.view.state = PlaybackState::Paused;
                self.publish(slot);
            }
            self.release_pin(state, message_id);
            debug!("Paused while preparing; engine left untouched");
            return Ok(());
        }

        if let Some(owner) = state.loaded.take() {
            let owner_playing = state
                .sessions
                .get(&owner)
                .map(|slot| slot.view.state == PlaybackState::Playing)
                .unwrap_or(false);
            if owner_playing {
                state.loaded = Some(owner.clone());
                if let Err(err) = self.pause_owner(state, &owner).await {
                    warn!(message_id = %owner, error = %err, "Forced pause failed");
                    self.mark_failed(state, &owner, &err);
                }
                state.loaded = None;
                info!(previous = %owner, "Took over engine from playing session");
            }
            if &owner != message_id {
                self.release_pin(state, &owner);
            }
        }

        let media = match self.engine.prepare(&path).await {
            Ok(media) => media,
            Err(err) => {
                // A load failure only implicates the cache entry when the
                // file no longer matches it.
                if let Err(corrupt @ PlaybackError::CorruptFile { .. }) =
                    self.cache.ensure_intact(message_id).await
                {
                    return self.fail(state, message_id, corrupt);
                }
                return self.fail(state, message_id, PlaybackError::engine(err));
            }
        };
        state.loaded = Some(message_id.clone());

        let (start, speed) = match state.sessions.get_mut(message_id) {
            Some(slot) => {
                slot.view.duration = media.duration;
                let mut start = slot.view.clamp(slot.view.position);
                if !media.duration.is_zero() && start >= media.duration {
                    start = Duration::ZERO;
                }
                slot.view.position = start;
                slot.view.state = PlaybackState::Ready;
                self.publish(slot);
                (start, slot.view.speed)
            }
            None => return Ok(()),
        };

        let result = async {
            if !start.is_zero() {
                self.engine.seek(start).await?;
            }
            self.engine.set_speed(speed.value()).await?;
            self.engine.play().await
        }
        .await;

        if let Err(err) = result {
            return self.fail(state, message_id, PlaybackError::engine(err));
        }

        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.state = PlaybackState::Playing;
            slot.pending_play = false;
            self.publish(slot);
        }
        info!(
            duration_ms = media.duration.as_millis() as u64,
            start_ms = start.as_millis() as u64,
            "Playback started"
        );
        Ok(())
    }

    /// Capture the position of the loaded, playing session and pause it.
    async fn pause_owner(&self, state: &mut EngineState, message_id: &MessageId) -> Result<()> {
        let position = self
            .engine
            .current_position()
            .await
            .map_err(PlaybackError::engine)?;
        self.engine.pause().await.map_err(PlaybackError::engine)?;

        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.position = slot.view.clamp(position);
            slot.view.state = PlaybackState::Paused;
            slot.pending_play = false;
            self.publish(slot);
            debug!(
                message_id = %message_id,
                position_ms = slot.view.position.as_millis() as u64,
                "Paused"
            );
        }
        Ok(())
    }

    /// Move the session to `Error`, releasing the engine and its pin.
    fn fail(&self, state: &mut EngineState, message_id: &MessageId, err: PlaybackError) -> Result<()> {
        self.mark_failed(state, message_id, &err);
        Err(err)
    }

    fn mark_failed(&self, state: &mut EngineState, message_id: &MessageId, err: &PlaybackError) {
        if state.is_loaded(message_id) {
            state.loaded = None;
        }
        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.state = PlaybackState::Error;
            slot.view.error = Some(err.kind());
            slot.pending_play = false;
            slot.preparation = None;
            if slot.pinned {
                self.cache.unpin(message_id);
                slot.pinned = false;
            }
            self.publish(slot);
        }
        warn!(message_id = %message_id, error = %err, "Playback failed");
    }

    /// Let the cache evict `message_id` again.
    fn release_pin(&self, state: &mut EngineState, message_id: &MessageId) {
        if let Some(slot) = state.sessions.get_mut(message_id) {
            if slot.pinned {
                self.cache.unpin(message_id);
                slot.pinned = false;
            }
        }
    }

    fn reset_to_idle(&self, state: &mut EngineState, message_id: &MessageId) {
        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.state = PlaybackState::Idle;
            slot.view.error = None;
            slot.pending_play = false;
            slot.preparation = None;
            if slot.pinned {
                self.cache.unpin(message_id);
                slot.pinned = false;
            }
            self.publish(slot);
        }
    }

    async fn tick(&self) -> Result<Option<PlaybackState>> {
        let mut state = self.state.lock().await;
        if state.disposed {
            return Ok(None);
        }
        let Some(owner) = state.loaded.clone() else {
            return Ok(None);
        };
        let (current, duration) = match state.sessions.get(&owner) {
            Some(slot) => (slot.view.state, slot.view.duration),
            None => return Ok(None),
        };
        if current != PlaybackState::Playing {
            return Ok(Some(current));
        }

        let position = match self.engine.current_position().await {
            Ok(position) => position,
            Err(err) => {
                return self
                    .fail(&mut state, &owner, PlaybackError::engine(err))
                    .map(|_| Some(PlaybackState::Error));
            }
        };

        if !duration.is_zero() && position >= duration {
            self.complete(&mut state, &owner);
            return Ok(Some(PlaybackState::Idle));
        }

        if let Some(slot) = state.sessions.get_mut(&owner) {
            slot.view.position = position;
            self.publish(slot);
        }
        Ok(Some(PlaybackState::Playing))
    }

    /// Natural end of playback: report `Completed`, then reset to `Idle`.
    fn complete(&self, state: &mut EngineState, message_id: &MessageId) {
        state.loaded = None;
        if let Some(slot) = state.sessions.get_mut(message_id) {
            slot.view.state = PlaybackState::Completed;
            slot.view.position = Duration::ZERO;
            slot.view.speed = PlaybackSpeed::Normal;
            slot.pending_play = false;
            self.publish(slot);

            if slot.pinned {
                self.cache.unpin(message_id);
                slot.pinned = false;
            }
            slot.view.state = PlaybackState::Idle;
            self.publish(slot);
        }
        info!(message_id = %message_id, "Playback completed");
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

fn ensure_usable(state: &EngineState) -> Result<()> {
    if state.disposed {
        Err(PlaybackError::Disposed)
    } else {
        Ok(())
    }
}

async fn run_ticker(inner: Weak<CoordinatorInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(err) = inner.tick().await {
            debug!(error = %err, "Position poll failed");
        }
    }
}
