//! Gap-free scheduling of decoded audio on the output clock.
//!
//! [`AudioScheduler`] keeps one cursor, `next_start_time`, marking the end of
//! the scheduled timeline in output-clock seconds.  `0.0` means nothing is
//! scheduled.
//!
//! ```text
//! accept(chunk)
//!   ├─ next_start_time == 0      ─▶ FirstFill   start = now + buffer_time
//!   ├─ next_start_time < now     ─▶ Underrun    start = now + buffer_time
//!   └─ otherwise                 ─▶ Contiguous  start = next_start_time
//! next_start_time = start + duration
//! ```
//!
//! The scheduler does not own playback state.  The engine reads the returned
//! [`ScheduleKind`] to move into `Loading` and arm the look-ahead timer.

use std::time::Duration;

use crate::audio::decode::{ChunkDecoder, DecodeError, DecodedBuffer};
use crate::session::AudioChunk;

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// A device that plays buffers at absolute times on its own clock.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds.
    fn now(&self) -> f64;

    /// Queue `buffer` to begin playing at `start` seconds.
    fn schedule(&self, buffer: DecodedBuffer, start: f64);

    /// Drop everything queued, fading out whatever is audible.
    fn flush(&self);

    /// Fade back in after a flush.
    fn resume(&self) {}

    fn sample_rate(&self) -> u32;
}

// ---------------------------------------------------------------------------
// Scheduled
// ---------------------------------------------------------------------------

/// Why a buffer landed where it did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleKind {
    /// First buffer since a reset.
    FirstFill,
    /// The timeline had drained; `gap` seconds of silence were heard.
    Underrun { gap: f64 },
    /// Appended directly after the previous buffer.
    Contiguous,
}

impl ScheduleKind {
    /// Whether playback has to build up look-ahead again.
    pub fn needs_lookahead(&self) -> bool {
        !matches!(self, ScheduleKind::Contiguous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub start: f64,
    pub duration: f64,
    pub kind: ScheduleKind,
}

impl Scheduled {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

// ---------------------------------------------------------------------------
// AudioScheduler
// ---------------------------------------------------------------------------

pub struct AudioScheduler {
    decoder: ChunkDecoder,
    buffer_time: Duration,
    next_start_time: f64,
}

impl AudioScheduler {
    /// * `buffer_time`: look-ahead placed in front of the first buffer and
    ///   after every under-run.
    pub fn new(buffer_time: Duration, decoder: ChunkDecoder) -> Self {
        Self {
            decoder,
            buffer_time,
            next_start_time: 0.0,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn buffer_time(&self) -> Duration {
        self.buffer_time
    }

    pub fn decoder(&self) -> &ChunkDecoder {
        &self.decoder
    }

    /// Forget the timeline.  Called on entering paused or stopped.
    pub fn reset(&mut self) {
        if self.next_start_time != 0.0 {
            log::debug!("scheduler: timeline reset at {:.3}s", self.next_start_time);
        }
        self.next_start_time = 0.0;
    }

    /// Decode `chunk` and schedule it.
    pub fn accept(
        &mut self,
        chunk: &AudioChunk,
        output: &dyn AudioOutput,
    ) -> Result<Scheduled, DecodeError> {
        let buffer = self.decoder.decode(chunk)?;
        Ok(self.schedule(buffer, output))
    }

    /// Place an already decoded buffer on the timeline.
    pub fn schedule(&mut self, buffer: DecodedBuffer, output: &dyn AudioOutput) -> Scheduled {
        let now = output.now();
        let horizon = now + self.buffer_time.as_secs_f64();

        let (start, kind) = if self.next_start_time == 0.0 {
            (horizon, ScheduleKind::FirstFill)
        } else if self.next_start_time < now {
            let gap = now - self.next_start_time;
            log::debug!("scheduler: under-run, {gap:.3}s of silence");
            (horizon, ScheduleKind::Underrun { gap })
        } else {
            (self.next_start_time, ScheduleKind::Contiguous)
        };

        let duration = buffer.duration();
        output.schedule(buffer, start);
        self.next_start_time = start + duration;

        Scheduled {
            start,
            duration,
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
