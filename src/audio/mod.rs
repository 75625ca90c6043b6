//! Audio path from chunk decoding through scheduling to device output.
//!
//! # Pipeline
//!
//! ```text
//! AudioChunk (base64 PCM16) → ChunkDecoder → DecodedBuffer
//!           → AudioScheduler (next_start_time) → AudioOutput::schedule
//!           → CpalOutput timeline → remap_channels / resample_interleaved
//!           → cpal callback
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use promptdj::audio::{AudioScheduler, ChunkDecoder, CpalOutput};
//! use promptdj::session::AudioChunk;
//!
//! let (output, _stream) = CpalOutput::open(Duration::from_millis(100)).unwrap();
//! let mut scheduler = AudioScheduler::new(Duration::from_secs(2), ChunkDecoder::default());
//!
//! let chunk = AudioChunk { data: "AAAAAA==".into(), mime_type: None };
//! let placed = scheduler.accept(&chunk, &output).unwrap();
//! println!("plays at {:.3}s for {:.3}s", placed.start, placed.duration);
//! ```

pub mod decode;
pub mod output;
pub mod resample;
pub mod scheduler;

pub use decode::{decode_chunk_bytes, pcm16_to_buffer, ChunkDecoder, DecodeError, DecodedBuffer};
pub use output::{CpalOutput, OutputError, OutputStream};
pub use resample::{remap_channels, resample_interleaved, resample_to_frames};
pub use scheduler::{AudioOutput, AudioScheduler, ScheduleKind, Scheduled};
