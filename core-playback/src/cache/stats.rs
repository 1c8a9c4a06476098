//! Cache statistics and download progress tracking

use crate::cache::entry::MessageId;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached messages
    pub entries: usize,

    /// Total size of cached files in bytes
    pub total_bytes: u64,

    /// Download tasks currently waiting for a worker
    pub queued: usize,

    /// Download tasks currently transferring bytes
    pub downloading: usize,

    /// Entries protected from eviction by a playback session
    pub pinned: usize,

    /// Configured entry limit
    pub max_entries: usize,

    /// Configured byte limit
    pub max_bytes: u64,

    /// Calculation timestamp (unix seconds)
    pub calculated_at: i64,
}

impl CacheStats {
    /// Percentage of the byte limit in use.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        (self.total_bytes as f64 / self.max_bytes as f64) * 100.0
    }

    /// Bytes that must be freed to get back under the byte limit.
    pub fn bytes_over(&self) -> u64 {
        self.total_bytes.saturating_sub(self.max_bytes)
    }

    /// Entries that must be removed to get back under the entry limit.
    pub fn entries_over(&self) -> usize {
        self.entries.saturating_sub(self.max_entries)
    }

    /// Returns true if either limit is exceeded.
    ///
    /// Only possible while every entry above the limit is pinned.
    pub fn is_over_limits(&self) -> bool {
        self.bytes_over() > 0 || self.entries_over() > 0
    }

    /// Average cached file size.
    pub fn average_entry_size(&self) -> u64 {
        if self.entries == 0 {
            return 0;
        }
        self.total_bytes / self.entries as u64
    }
}

/// Progress of one in-flight download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub message_id: MessageId,

    /// Total size announced by the server, if any
    pub total_bytes: Option<u64>,

    /// Bytes written during the current attempt
    pub downloaded_bytes: u64,

    /// Progress percentage (0-100), never decreasing across attempts
    pub percent: u8,

    /// Current attempt, starting at 1
    pub attempt: u32,

    /// Current download speed in bytes/second
    pub speed_bytes_per_sec: u64,

    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

impl DownloadProgress {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            total_bytes: None,
            downloaded_bytes: 0,
            percent: 0,
            attempt: 0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
        }
    }

    /// Reset the per-attempt counters for a new attempt.
    ///
    /// `percent` is kept so observers never see progress move backwards.
    pub fn begin_attempt(&mut self, attempt: u32, total_bytes: Option<u64>) {
        self.attempt = attempt;
        self.total_bytes = total_bytes;
        self.downloaded_bytes = 0;
        self.speed_bytes_per_sec = 0;
        self.eta_seconds = None;
    }

    /// Update progress with new downloaded bytes.
    ///
    /// Returns `true` when the visible percentage advanced.
    pub fn update(&mut self, downloaded_bytes: u64, started: Instant) -> bool {
        self.downloaded_bytes = downloaded_bytes;

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.speed_bytes_per_sec = (downloaded_bytes as f64 / elapsed) as u64;
        }

        let Some(total) = self.total_bytes.filter(|t| *t > 0) else {
            self.eta_seconds = None;
            return false;
        };

        self.eta_seconds = (self.speed_bytes_per_sec > 0)
            .then(|| total.saturating_sub(downloaded_bytes) / self.speed_bytes_per_sec);

        let percent = ((downloaded_bytes as f64 / total as f64) * 100.0).min(100.0) as u8;
        if percent > self.percent {
            self.percent = percent;
            true
        } else {
            false
        }
    }

    /// Returns true once every announced byte arrived.
    pub fn is_complete(&self) -> bool {
        self.total_bytes
            .map_or(false, |total| self.downloaded_bytes >= total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_limits() {
        let stats = CacheStats {
            entries: 52,
            total_bytes: 150,
            max_entries: 50,
            max_bytes: 100,
            ..Default::default()
        };

        assert_eq!(stats.entries_over(), 2);
        assert_eq!(stats.bytes_over(), 50);
        assert!(stats.is_over_limits());
        assert_eq!(stats.usage_percentage(), 150.0);
        assert_eq!(stats.average_entry_size(), 2);

        let under = CacheStats {
            entries: 3,
            total_bytes: 30,
            max_entries: 50,
            max_bytes: 100,
            ..Default::default()
        };
        assert!(!under.is_over_limits());
        assert_eq!(under.usage_percentage(), 30.0);
    }

    #[test]
    fn test_download_progress() {
        let mut progress = DownloadProgress::new(MessageId::new("m1"));
        let started = Instant::now();
        progress.begin_attempt(1, Some(1000));

        assert!(progress.update(500, started));
        assert_eq!(progress.percent, 50);
        assert!(!progress.is_complete());

        assert!(!progress.update(505, started));
        assert!(progress.update(1000, started));
        assert_eq!(progress.percent, 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_percent_survives_retry() {
        let mut progress = DownloadProgress::new(MessageId::new("m1"));
        let started = Instant::now();
        progress.begin_attempt(1, Some(100));
        progress.update(60, started);

        progress.begin_attempt(2, Some(100));
        assert_eq!(progress.percent, 60);
        assert_eq!(progress.downloaded_bytes, 0);
        assert!(!progress.update(30, started));
        assert!(progress.update(70, started));
        assert_eq!(progress.percent, 70);
    }

    #[test]
    fn test_unknown_length_has_no_percentage() {
        let mut progress = DownloadProgress::new(MessageId::new("m1"));
        progress.begin_attempt(1, None);
        assert!(!progress.update(4096, Instant::now()));
        assert_eq!(progress.percent, 0);
        assert_eq!(progress.eta_seconds, None);
    }
}
