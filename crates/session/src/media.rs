//! Wire framing for media chunks: little-endian PCM16 wrapped in base64.

use crate::protocol::{Audio, MediaChunk};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

impl MediaChunk {
    /// Wraps raw bytes of the given MIME type.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Encodes mono PCM16 samples as `audio/pcm;rate=<sample_rate>`.
    pub fn pcm16(samples: &[i16], sample_rate: u32) -> Self {
        let bytes: Vec<u8> = samples
            .iter()
            .flat_map(|&sample| sample.to_le_bytes())
            .collect();
        Self::from_bytes(format!("audio/pcm;rate={}", sample_rate), &bytes)
    }

    /// Encodes normalized `[-1.0, 1.0]` samples as PCM16. Out-of-range values are clamped.
    pub fn pcm16_from_f32(samples: &[f32], sample_rate: u32) -> Self {
        let pcm16: Vec<i16> = samples
            .iter()
            .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        Self::pcm16(&pcm16, sample_rate)
    }
}

impl Audio {
    /// Decodes the payload as PCM16. Invalid base64 yields no samples; a
    /// trailing odd byte is ignored.
    pub fn pcm16_samples(&self) -> Vec<i16> {
        match STANDARD.decode(&self.audio_data) {
            Ok(bytes) => bytes
                .chunks_exact(2)
                .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode audio payload");
                Vec::new()
            }
        }
    }

    /// Sample rate from a `audio/pcm;rate=N` MIME type.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}
