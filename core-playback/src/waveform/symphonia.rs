//! # Symphonia Waveform Extractor
//!
//! Decodes a cached file with Symphonia and records the peak amplitude of
//! every decoded packet, then reduces the peaks to the requested count.

use super::{downsample_peaks, WaveformExtractor};
use crate::error::{PlaybackError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, instrument, warn};

const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// Waveform extractor backed by Symphonia's format and codec registry.
///
/// Decoding runs on the blocking thread pool.
#[derive(Debug, Default, Clone)]
pub struct SymphoniaWaveformExtractor;

impl SymphoniaWaveformExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Per-packet peak amplitudes of the first audio track.
    fn packet_peaks(path: &Path) -> Result<Vec<f32>> {
        let file = std::fs::File::open(path)
            .map_err(|e| PlaybackError::Decode(format!("Failed to open file: {}", e)))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlaybackError::Decode(format!("Failed to probe format: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::Decode("No supported audio tracks".to_string()))?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut peaks = Vec::new();
        let mut buffer: Option<SampleBuffer<f32>> = None;
        let mut consecutive_errors = 0;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(PlaybackError::Decode(format!("Failed to read packet: {}", e)));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    consecutive_errors = 0;
                    let samples = buffer.get_or_insert_with(|| {
                        SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                    });
                    samples.copy_interleaved_ref(decoded);
                    let peak = samples
                        .samples()
                        .iter()
                        .fold(0.0_f32, |max, s| max.max(s.abs()));
                    peaks.push(peak);
                }
                Err(err @ (SymphoniaError::DecodeError(_) | SymphoniaError::IoError(_))) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(PlaybackError::Decode(format!(
                            "Stream corruption after {} failed packets: {}",
                            MAX_CONSECUTIVE_ERRORS, err
                        )));
                    }
                    warn!(error = %err, "Skipping undecodable packet");
                }
                Err(e) => {
                    return Err(PlaybackError::Decode(format!("Failed to decode packet: {}", e)));
                }
            }
        }

        debug!(path = ?path, packets = peaks.len(), "Decoded waveform peaks");
        Ok(peaks)
    }
}

#[async_trait]
impl WaveformExtractor for SymphoniaWaveformExtractor {
    #[instrument(skip(self))]
    async fn extract(&self, path: &Path, sample_count: usize) -> Result<Vec<f32>> {
        let path: PathBuf = path.to_path_buf();
        let peaks = tokio::task::spawn_blocking(move || Self::packet_peaks(&path))
            .await
            .map_err(|e| PlaybackError::Decode(format!("Waveform task failed: {}", e)))??;

        Ok(downsample_peaks(&peaks, sample_count))
    }
}
