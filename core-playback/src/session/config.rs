//! Playback coordinator configuration

use core_runtime::config::{CoreConfig, DEFAULT_WAVEFORM_SAMPLE_COUNT};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Waveform samples computed per message (default: 50)
    pub waveform_sample_count: usize,

    /// How often the engine position is polled while playing (default: 200ms)
    pub position_poll_interval: Duration,

    /// Drift between stored and engine position tolerated on resume
    /// before seeking (default: 50ms)
    pub resume_tolerance: Duration,

    /// Poll the engine from a background task (default: true).
    ///
    /// When disabled, the host drives completion detection by calling
    /// `PlaybackCoordinator::tick`.
    pub auto_tick: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            waveform_sample_count: DEFAULT_WAVEFORM_SAMPLE_COUNT,
            position_poll_interval: Duration::from_millis(200),
            resume_tolerance: Duration::from_millis(50),
            auto_tick: true,
        }
    }
}

impl PlaybackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            waveform_sample_count: config.waveform_sample_count,
            position_poll_interval: config.position_poll_interval,
            resume_tolerance: config.resume_tolerance,
            auto_tick: true,
        }
    }

    pub fn with_waveform_sample_count(mut self, samples: usize) -> Self {
        self.waveform_sample_count = samples;
        self
    }

    pub fn with_position_poll_interval(mut self, interval: Duration) -> Self {
        self.position_poll_interval = interval;
        self
    }

    pub fn with_resume_tolerance(mut self, tolerance: Duration) -> Self {
        self.resume_tolerance = tolerance;
        self
    }

    pub fn with_auto_tick(mut self, enabled: bool) -> Self {
        self.auto_tick = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.waveform_sample_count == 0 {
            return Err("waveform_sample_count must be at least 1".to_string());
        }

        if self.position_poll_interval.is_zero() {
            return Err("position_poll_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlaybackConfig::default();
        assert_eq!(config.waveform_sample_count, 50);
        assert_eq!(config.resume_tolerance, Duration::from_millis(50));
        assert!(config.auto_tick);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(PlaybackConfig::new()
            .with_waveform_sample_count(0)
            .validate()
            .is_err());
        assert!(PlaybackConfig::new()
            .with_position_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
