//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridges (HTTP, file system, key-value
//! store, audio engine) into the voice message core. Desktop apps typically
//! enable the `desktop-shims` feature, which lets [`CoreConfig`] fall back to
//! the adapters from `bridge-desktop` for every bridge except the audio
//! engine.
//!
//! ```ignore
//! use core_service::{bootstrap_desktop, MessageId};
//!
//! let core = bootstrap_desktop(engine).await?;
//! let mut events = core.subscribe();
//! core.playback()
//!     .play_remote(&MessageId::new("msg-1"), "https://cdn.example.com/msg-1.m4a")
//!     .await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_playback::cache::{CacheStats, MessageId};
pub use core_playback::{
    PlaybackConfig, PlaybackCoordinator, PlaybackSpeed, VoiceCacheManager, WaveformExtractor,
};
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};
pub use core_runtime::events::{CoreEvent, EventStream, MessageState};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};

use bridge_traits::AudioEngineAdapter;
use core_playback::cache::ReconcileReport;
use core_playback::StateNotifier;
use core_runtime::events::{EventBus, Receiver};
use std::sync::Arc;
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
///
/// Owns the cache manager and the playback coordinator, which share one
/// state notifier. Cloning is cheap.
#[derive(Clone)]
pub struct VoiceCore {
    notifier: Arc<StateNotifier>,
    cache: VoiceCacheManager,
    playback: PlaybackCoordinator,
    startup: ReconcileReport,
}

impl std::fmt::Debug for VoiceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCore")
            .field("cache", &self.cache)
            .field("startup", &self.startup)
            .finish()
    }
}

/// Assembles a [`VoiceCore`] from a [`CoreConfig`] and an engine.
pub struct VoiceCoreBuilder {
    config: CoreConfig,
    engine: Arc<dyn AudioEngineAdapter>,
    extractor: Option<Arc<dyn WaveformExtractor>>,
    use_default_extractor: bool,
}

impl VoiceCoreBuilder {
    /// Use `extractor` for waveforms instead of the built-in decoder.
    pub fn waveform_extractor(mut self, extractor: Arc<dyn WaveformExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Skip waveform extraction entirely.
    pub fn without_waveforms(mut self) -> Self {
        self.extractor = None;
        self.use_default_extractor = false;
        self
    }

    /// Build the components and reconcile the cache with the disk.
    #[instrument(skip(self))]
    pub async fn build(self) -> Result<VoiceCore> {
        let VoiceCoreBuilder {
            config,
            engine,
            extractor,
            use_default_extractor,
        } = self;

        config.validate()?;

        let notifier = Arc::new(StateNotifier::new(EventBus::new(config.event_buffer_size)));
        let cache = VoiceCacheManager::from_core_config(&config, notifier.clone())?;
        let startup = cache.initialize().await?;

        let extractor = match extractor {
            Some(extractor) => Some(extractor),
            None if use_default_extractor => default_extractor(),
            None => None,
        };

        let playback =
            PlaybackCoordinator::new(PlaybackConfig::from_core(&config), engine, cache.clone(), extractor)?;

        info!(
            entries = startup.loaded,
            dropped = startup.dropped_missing,
            expired = startup.expired,
            "Voice core ready"
        );

        Ok(VoiceCore {
            notifier,
            cache,
            playback,
            startup,
        })
    }
}

#[cfg(feature = "waveform")]
fn default_extractor() -> Option<Arc<dyn WaveformExtractor>> {
    Some(Arc::new(core_playback::SymphoniaWaveformExtractor::new()))
}

#[cfg(not(feature = "waveform"))]
fn default_extractor() -> Option<Arc<dyn WaveformExtractor>> {
    None
}

impl VoiceCore {
    pub fn builder(config: CoreConfig, engine: Arc<dyn AudioEngineAdapter>) -> VoiceCoreBuilder {
        VoiceCoreBuilder {
            config,
            engine,
            extractor: None,
            use_default_extractor: true,
        }
    }

    /// Build a core with the default waveform extractor.
    pub async fn new(config: CoreConfig, engine: Arc<dyn AudioEngineAdapter>) -> Result<Self> {
        Self::builder(config, engine).build().await
    }

    pub fn cache(&self) -> &VoiceCacheManager {
        &self.cache
    }

    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.playback
    }

    /// Outcome of the startup reconciliation.
    pub fn startup_report(&self) -> ReconcileReport {
        self.startup
    }

    /// Every state change and cache event.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.notifier.subscribe()
    }

    /// State changes of a single message.
    pub fn subscribe_message(&self, message_id: &MessageId) -> EventStream {
        self.notifier.subscribe_message(message_id)
    }

    /// Latest merged state of `message_id`; defaults for unknown messages.
    pub fn state(&self, message_id: &MessageId) -> MessageState {
        self.notifier.snapshot(message_id)
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Release the engine and stop the download workers.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let disposed = self.playback.dispose().await;
        self.cache.shutdown();
        disposed?;
        info!("Voice core shut down");
        Ok(())
    }
}

/// Build a core with desktop defaults for every bridge but the engine.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(engine: Arc<dyn AudioEngineAdapter>) -> Result<VoiceCore> {
    let config = CoreConfig::builder().build()?;
    VoiceCore::new(config, engine).await
}
