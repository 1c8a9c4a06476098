//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the voice messaging core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system and the shared per-message state vocabulary
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the cache manager and the
//! playback coordinator depend on. It establishes the logging conventions,
//! the fail-fast configuration builder, and the event broadcasting mechanism
//! through which every per-message state transition reaches the UI layer.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
