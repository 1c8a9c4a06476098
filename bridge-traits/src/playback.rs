//! Audio engine bridge trait and supporting types.
//!
//! The core owns exactly one engine instance and drives it through
//! [`AudioEngineAdapter`]. Host applications provide the concrete engine
//! (AVAudioPlayer, ExoPlayer, rodio, ...) behind this trait.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Information reported by the engine after loading a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedMedia {
    /// Total duration of the loaded audio.
    pub duration: Duration,
}

impl PreparedMedia {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

/// Single shared audio engine.
///
/// The engine holds at most one loaded file at a time. Calling
/// [`prepare`](AudioEngineAdapter::prepare) replaces whatever was loaded
/// before. Implementations should report decode and device failures as
/// [`BridgeError::OperationFailed`](crate::BridgeError::OperationFailed).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::playback::AudioEngineAdapter;
///
/// async fn play_from(engine: &dyn AudioEngineAdapter, path: &Path) -> Result<()> {
///     let media = engine.prepare(path).await?;
///     engine.seek(media.duration / 2).await?;
///     engine.play().await
/// }
/// ```
#[async_trait]
pub trait AudioEngineAdapter: Send + Sync {
    /// Load a local audio file, replacing the current one.
    async fn prepare(&self, path: &Path) -> Result<PreparedMedia>;

    /// Start or continue output of the loaded file.
    async fn play(&self) -> Result<()>;

    /// Pause output, keeping the current position.
    async fn pause(&self) -> Result<()>;

    /// Move the playhead of the loaded file.
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Change the playback rate (1.0 is normal speed).
    async fn set_speed(&self, speed: f32) -> Result<()>;

    /// Current playhead position of the loaded file.
    async fn current_position(&self) -> Result<Duration>;

    /// Release engine resources. The engine is unusable afterwards.
    async fn dispose(&self) -> Result<()>;
}
