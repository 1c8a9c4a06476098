//! Workspace umbrella crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-playback`). Host applications can
//! depend on `voice-core-workspace` and enable the documented features
//! without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "waveform")]
pub use core_playback as playback;
