//! Per-message playback session state

use crate::cache::entry::MessageId;
use core_runtime::events::{ErrorKind, MessageState, PlaybackState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Playback rate. Cycles 1x, 1.5x, 2x, back to 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlaybackSpeed {
    #[default]
    Normal,
    OneAndHalf,
    Double,
}

impl PlaybackSpeed {
    pub const ALL: [PlaybackSpeed; 3] = [
        PlaybackSpeed::Normal,
        PlaybackSpeed::OneAndHalf,
        PlaybackSpeed::Double,
    ];

    pub fn value(self) -> f32 {
        match self {
            PlaybackSpeed::Normal => 1.0,
            PlaybackSpeed::OneAndHalf => 1.5,
            PlaybackSpeed::Double => 2.0,
        }
    }

    /// Next speed in the cycle.
    pub fn next(self) -> Self {
        match self {
            PlaybackSpeed::Normal => PlaybackSpeed::OneAndHalf,
            PlaybackSpeed::OneAndHalf => PlaybackSpeed::Double,
            PlaybackSpeed::Double => PlaybackSpeed::Normal,
        }
    }

    /// Speed for an exact rate, if it is one of the supported ones.
    pub fn from_value(value: f32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|speed| (speed.value() - value).abs() < f32::EPSILON)
    }
}

/// Playback view of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub message_id: MessageId,
    pub state: PlaybackState,
    pub position: Duration,
    pub duration: Duration,
    pub speed: PlaybackSpeed,
    pub waveform: Arc<Vec<f32>>,
    pub error: Option<ErrorKind>,
}

impl PlaybackSession {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            state: PlaybackState::Idle,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            speed: PlaybackSpeed::Normal,
            waveform: Arc::new(Vec::new()),
            error: None,
        }
    }

    /// Clamp `position` into `[0, duration]` once the duration is known.
    pub fn clamp(&self, position: Duration) -> Duration {
        if self.duration.is_zero() {
            position
        } else {
            position.min(self.duration)
        }
    }

    /// Copy the playback fields into a published state.
    pub(crate) fn apply_to(&self, state: &mut MessageState) {
        state.playback_state = self.state;
        state.position_ms = self.position.as_millis() as u64;
        state.duration_ms = self.duration.as_millis() as u64;
        state.speed = self.speed.value();
        state.waveform_samples = self.waveform.as_ref().clone();
        state.error_kind = self.error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_cycle() {
        let mut speed = PlaybackSpeed::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(speed.value());
            speed = speed.next();
        }
        assert_eq!(seen, vec![1.0, 1.5, 2.0, 1.0]);
    }

    #[test]
    fn test_speed_from_value() {
        assert_eq!(PlaybackSpeed::from_value(1.5), Some(PlaybackSpeed::OneAndHalf));
        assert_eq!(PlaybackSpeed::from_value(3.0), None);
    }

    #[test]
    fn test_clamp() {
        let mut session = PlaybackSession::new(MessageId::new("m1"));
        assert_eq!(session.clamp(Duration::from_secs(9)), Duration::from_secs(9));

        session.duration = Duration::from_secs(5);
        assert_eq!(session.clamp(Duration::from_secs(9)), Duration::from_secs(5));
        assert_eq!(session.clamp(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_apply_to_state() {
        let mut session = PlaybackSession::new(MessageId::new("m1"));
        session.state = PlaybackState::Paused;
        session.position = Duration::from_millis(1500);
        session.duration = Duration::from_secs(30);
        session.speed = PlaybackSpeed::Double;

        let mut state = MessageState::new("m1");
        session.apply_to(&mut state);
        assert_eq!(state.playback_state, PlaybackState::Paused);
        assert_eq!(state.position_ms, 1500);
        assert_eq!(state.duration_ms, 30_000);
        assert_eq!(state.speed, 2.0);
    }
}
