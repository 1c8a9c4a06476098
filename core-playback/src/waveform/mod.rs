//! # Waveform Extraction
//!
//! Peak amplitudes for rendering a voice message waveform. Extraction is
//! delegated to a [`WaveformExtractor`]; [`WaveformCache`] makes sure it runs
//! at most once per cached file.

#[cfg(feature = "core-decoder")]
mod symphonia;

#[cfg(feature = "core-decoder")]
pub use self::symphonia::SymphoniaWaveformExtractor;

use crate::cache::entry::MessageId;
use crate::cache::manager::EntryRemovalListener;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Computes normalised peak amplitudes for an audio file.
#[async_trait]
pub trait WaveformExtractor: Send + Sync {
    /// Return exactly `sample_count` values in `[0, 1]`.
    async fn extract(&self, path: &Path, sample_count: usize) -> Result<Vec<f32>>;
}

/// Reduce per-packet peaks to `count` buckets, normalised so the loudest
/// bucket is `1.0`.
///
/// Each bucket takes the maximum of the peaks that fall into it. When there
/// are fewer peaks than buckets, peaks are stretched across buckets.
pub fn downsample_peaks(peaks: &[f32], count: usize) -> Vec<f32> {
    if count == 0 {
        return Vec::new();
    }
    if peaks.is_empty() {
        return vec![0.0; count];
    }

    let len = peaks.len();
    let mut buckets: Vec<f32> = (0..count)
        .map(|i| {
            let start = i * len / count;
            let end = ((i + 1) * len / count).max(start + 1).min(len);
            peaks[start..end]
                .iter()
                .fold(0.0_f32, |max, peak| max.max(peak.abs()))
        })
        .collect();

    let loudest = buckets.iter().cloned().fold(0.0_f32, f32::max);
    if loudest > 0.0 {
        for value in &mut buckets {
            *value = (*value / loudest).clamp(0.0, 1.0);
        }
    }
    buckets
}

struct Memo {
    path: PathBuf,
    size_bytes: u64,
    samples: Arc<Vec<f32>>,
}

/// Memoises extraction results per message.
///
/// A result is reused while the message resolves to the same file path and
/// size, so a re-downloaded file is extracted again.
pub struct WaveformCache {
    extractor: Arc<dyn WaveformExtractor>,
    sample_count: usize,
    memo: Mutex<HashMap<MessageId, Memo>>,
}

impl WaveformCache {
    pub fn new(extractor: Arc<dyn WaveformExtractor>, sample_count: usize) -> Self {
        Self {
            extractor,
            sample_count,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Samples for `message_id`, extracting them on first use.
    pub async fn samples(
        &self,
        message_id: &MessageId,
        path: &Path,
        size_bytes: u64,
    ) -> Result<Arc<Vec<f32>>> {
        if let Some(memo) = self.memo.lock().get(message_id) {
            if memo.path == path && memo.size_bytes == size_bytes {
                return Ok(memo.samples.clone());
            }
        }

        let samples = Arc::new(self.extractor.extract(path, self.sample_count).await?);
        debug!(message_id = %message_id, samples = samples.len(), "Extracted waveform");

        self.memo.lock().insert(
            message_id.clone(),
            Memo {
                path: path.to_path_buf(),
                size_bytes,
                samples: samples.clone(),
            },
        );
        Ok(samples)
    }

    pub fn invalidate(&self, message_id: &MessageId) {
        self.memo.lock().remove(message_id);
    }

    /// Number of messages with memoised samples.
    pub fn len(&self) -> usize {
        self.memo.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntryRemovalListener for WaveformCache {
    fn entry_removed(&self, message_id: &MessageId) {
        self.invalidate(message_id);
    }
}
