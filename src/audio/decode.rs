//! Audio chunk decoding.
//!
//! The service delivers base64 text of interleaved little-endian 16-bit PCM.
//! Decoding is two steps, matching the two halves of the boundary:
//!
//! 1. [`decode_chunk_bytes`]: base64 text → raw sample bytes.
//! 2. [`pcm16_to_buffer`]: raw bytes → [`DecodedBuffer`] of `f32` samples.
//!
//! [`ChunkDecoder`] runs both with the stream's fixed rate and channel count.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::session::AudioChunk;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("chunk is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("chunk of {len} bytes is not a whole number of {frame_bytes}-byte frames")]
    Misaligned { len: usize, frame_bytes: usize },

    #[error("chunk contains no samples")]
    Empty,

    #[error("invalid stream format: {sample_rate} Hz, {channels} channel(s)")]
    Format { sample_rate: u32, channels: u16 },
}

// ---------------------------------------------------------------------------
// DecodedBuffer
// ---------------------------------------------------------------------------

/// Interleaved `f32` PCM in `[-1.0, 1.0]` with its format.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Wrap interleaved samples.  `samples.len()` must be a multiple of
    /// `channels`.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self, DecodeError> {
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::Format {
                sample_rate,
                channels,
            });
        }
        if samples.len() % channels as usize != 0 {
            return Err(DecodeError::Misaligned {
                len: samples.len(),
                frame_bytes: channels as usize,
            });
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// A buffer of silence lasting `secs` seconds.
    pub fn silence(secs: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = (secs * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; frames * channels.max(1) as usize],
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Decoding steps
// ---------------------------------------------------------------------------

/// Base64 text → raw bytes.
pub fn decode_chunk_bytes(data: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(data.trim())?)
}

/// Little-endian signed 16-bit interleaved PCM → [`DecodedBuffer`].
pub fn pcm16_to_buffer(
    raw: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<DecodedBuffer, DecodeError> {
    if channels == 0 || sample_rate == 0 {
        return Err(DecodeError::Format {
            sample_rate,
            channels,
        });
    }
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }
    let frame_bytes = 2 * channels as usize;
    if raw.len() % frame_bytes != 0 {
        return Err(DecodeError::Misaligned {
            len: raw.len(),
            frame_bytes,
        });
    }

    let samples = raw
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect();
    DecodedBuffer::new(samples, channels, sample_rate)
}

// ---------------------------------------------------------------------------
// ChunkDecoder
// ---------------------------------------------------------------------------

/// Decodes chunks of a stream with a fixed, known-ahead format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDecoder {
    pub sample_rate: u32,
    pub channels: u16,
}

impl ChunkDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn decode(&self, chunk: &AudioChunk) -> Result<DecodedBuffer, DecodeError> {
        let raw = decode_chunk_bytes(&chunk.data)?;
        pcm16_to_buffer(&raw, self.sample_rate, self.channels)
    }
}

impl Default for ChunkDecoder {
    /// 48 kHz stereo, the service's output format.
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    #[test]
    fn decodes_interleaved_pcm16() {
        let chunk = AudioChunk {
            data: encode(&[0, 16_384, -32_768, 32_767]),
            mime_type: None,
        };
        let buf = ChunkDecoder::new(48_000, 2).decode(&chunk).unwrap();
        assert_eq!(buf.frames(), 2);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.samples()[0], 0.0);
        assert!((buf.samples()[1] - 0.5).abs() < 1e-6);
        assert_eq!(buf.samples()[2], -1.0);
        assert!(buf.samples()[3] < 1.0);
    }

    #[test]
    fn duration_follows_frames_and_rate() {
        let raw = vec![0u8; 48_000 * 2 * 2];
        let buf = pcm16_to_buffer(&raw, 48_000, 2).unwrap();
        assert!((buf.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_partial_frames() {
        let err = pcm16_to_buffer(&[0, 0, 0], 48_000, 2).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Misaligned {
                len: 3,
                frame_bytes: 4
            }
        );
    }

    #[test]
    fn rejects_bad_base64_and_empty_payloads() {
        assert!(matches!(
            decode_chunk_bytes("not base64!"),
            Err(DecodeError::Base64(_))
        ));
        assert_eq!(pcm16_to_buffer(&[], 48_000, 2), Err(DecodeError::Empty));
    }

    #[test]
    fn silence_has_requested_length() {
        let buf = DecodedBuffer::silence(0.5, 2, 48_000);
        assert_eq!(buf.frames(), 24_000);
        assert!((buf.duration() - 0.5).abs() < 1e-9);
    }
}
