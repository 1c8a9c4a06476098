//! # Playback Sessions
//!
//! One logical session per voice message, all backed by a single audio
//! engine owned by [`PlaybackCoordinator`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::MessageId;
//! use core_playback::session::{PlaybackCoordinator, PlaybackSpeed};
//!
//! # async fn example(coordinator: &PlaybackCoordinator) -> core_playback::Result<()> {
//! let id = MessageId::new("msg-42");
//! coordinator.play_remote(&id, "https://cdn.example/msg-42.m4a").await?;
//! coordinator.set_speed(&id, PlaybackSpeed::OneAndHalf).await?;
//! coordinator.pause(&id).await?;
//!
//! // Resumes at the paused position without reloading the file.
//! coordinator.play(&id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod state;

pub use config::PlaybackConfig;
pub use coordinator::PlaybackCoordinator;
pub use state::{PlaybackSession, PlaybackSpeed};
