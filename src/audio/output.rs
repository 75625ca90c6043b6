//! Speaker output via `cpal`.
//!
//! [`CpalOutput`] implements [`AudioOutput`] on top of a cpal output stream.
//! Buffers are converted to the device's rate and channel count when they are
//! scheduled, then placed on a frame-indexed timeline that the cpal callback
//! reads from.  The output clock is the number of frames the callback has
//! rendered, so it only advances while the device is pulling audio.
//!
//! [`CpalOutput::open`] returns an [`OutputStream`] alongside the output.  It
//! is a RAII guard: dropping it stops the hardware stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::decode::DecodedBuffer;
use crate::audio::resample::{remap_channels, resample_to_frames};
use crate::audio::scheduler::AudioOutput;

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// OutputStream
// ---------------------------------------------------------------------------

/// Keeps the cpal stream alive.  `cpal::Stream` is not `Send` on every
/// platform, so this stays on the thread that opened it.
pub struct OutputStream {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

struct Segment {
    start_frame: u64,
    samples: Vec<f32>,
    /// Flush generation the segment was scheduled in.
    generation: u64,
}

impl Segment {
    fn end_frame(&self, channels: usize) -> u64 {
        self.start_frame + (self.samples.len() / channels) as u64
    }
}

/// State shared with the cpal callback.
struct Timeline {
    channels: usize,
    fade_frames: u64,
    frames_played: u64,
    segments: VecDeque<Segment>,
    generation: u64,
    /// Segments from older generations are silent from this frame on.
    cutoff_frame: u64,
    /// Newer segments ramp in from this frame.
    fade_in_from: u64,
    /// `(generation, end frame)` of the latest segment scheduled.
    tail: Option<(u64, u64)>,
}

impl Timeline {
    fn new(channels: u16, fade_frames: u64) -> Self {
        Self {
            channels: channels.max(1) as usize,
            fade_frames: fade_frames.max(1),
            frames_played: 0,
            segments: VecDeque::new(),
            generation: 0,
            cutoff_frame: 0,
            fade_in_from: 0,
            tail: None,
        }
    }

    /// Pull a start that rounded to within one frame of the current tail
    /// onto it.
    fn snap(&self, start_frame: u64) -> u64 {
        match self.tail {
            Some((generation, end))
                if generation == self.generation && start_frame.abs_diff(end) <= 1 =>
            {
                end
            }
            _ => start_frame,
        }
    }

    fn insert(&mut self, segment: Segment) {
        let end = segment.end_frame(self.channels);
        self.tail = match self.tail {
            Some((generation, prev)) if generation == segment.generation => {
                Some((generation, prev.max(end)))
            }
            _ => Some((segment.generation, end)),
        };
        let at = self
            .segments
            .iter()
            .position(|s| s.start_frame > segment.start_frame)
            .unwrap_or(self.segments.len());
        self.segments.insert(at, segment);
    }

    fn flush(&mut self) {
        self.generation += 1;
        self.cutoff_frame = self.frames_played + self.fade_frames;
        let (generation, cutoff) = (self.generation, self.cutoff_frame);
        // Anything that would only start after the fade can go right away.
        self.segments
            .retain(|s| s.generation == generation || s.start_frame < cutoff);
    }

    fn resume(&mut self) {
        self.fade_in_from = self.frames_played;
    }

    fn gain(&self, segment: &Segment, frame: u64) -> f32 {
        if segment.generation < self.generation {
            let left = self.cutoff_frame.saturating_sub(frame);
            left as f32 / self.fade_frames as f32
        } else {
            let done = frame.saturating_sub(self.fade_in_from);
            (done as f32 / self.fade_frames as f32).min(1.0)
        }
    }

    /// Fill one callback buffer and advance the clock.
    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let ch = self.channels;

        for (i, frame_out) in out.chunks_mut(ch).enumerate() {
            let frame = self.frames_played + i as u64;
            for seg in &self.segments {
                if seg.start_frame > frame {
                    break;
                }
                let offset = (frame - seg.start_frame) as usize * ch;
                if offset >= seg.samples.len() {
                    continue;
                }
                let gain = self.gain(seg, frame);
                if gain <= 0.0 {
                    continue;
                }
                for (c, sample) in frame_out.iter_mut().enumerate() {
                    *sample += seg.samples[offset + c] * gain;
                }
            }
        }

        self.frames_played += (out.len() / ch) as u64;
        let (now, generation, cutoff) = (self.frames_played, self.generation, self.cutoff_frame);
        self.segments.retain(|s| {
            s.end_frame(ch) > now && (s.generation == generation || now < cutoff)
        });
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Output device wrapper built on top of `cpal`.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use promptdj::audio::{AudioOutput, CpalOutput};
///
/// let (output, _stream) = CpalOutput::open(Duration::from_millis(100)).unwrap();
/// println!("device clock at {:.3}s", output.now());
/// // `_stream` keeps the device running; drop it to stop.
/// ```
#[derive(Clone)]
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    /// Open the system default output device at its preferred format.
    ///
    /// `fade` is the length of the ramp applied on flush and resume.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::NoDevice`] when no output device is available,
    /// or a cpal error when the stream cannot be configured or started.
    pub fn open(fade: std::time::Duration) -> Result<(Self, OutputStream), OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        let supported = device.default_output_config()?;
        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let fade_frames = (fade.as_secs_f64() * sample_rate as f64).round() as u64;
        let output = Self::with_timeline(Timeline::new(channels, fade_frames), sample_rate, channels);

        let timeline = Arc::clone(&output.timeline);
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                lock(&timeline).render(data);
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )?;
        stream.play()?;

        log::info!(
            "scheduler: output device at {sample_rate} Hz, {channels} channel(s)"
        );
        Ok((output, OutputStream { _stream: stream }))
    }

    fn with_timeline(timeline: Timeline, sample_rate: u32, channels: u16) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(timeline)),
            sample_rate,
            channels,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        lock(&self.timeline).frames_played as f64 / self.sample_rate as f64
    }

    /// Both ends of the buffer are rounded to device frames from absolute
    /// time, so back-to-back buffers tile the timeline exactly.
    fn schedule(&self, buffer: DecodedBuffer, start: f64) {
        let rate = self.sample_rate as f64;
        let start = start.max(0.0);
        let end_frame = ((start + buffer.duration()) * rate).round() as u64;
        let (start_frame, generation) = {
            let timeline = lock(&self.timeline);
            (timeline.snap((start * rate).round() as u64), timeline.generation)
        };

        let frames = end_frame.saturating_sub(start_frame) as usize;
        let mapped = remap_channels(buffer.samples(), buffer.channels(), self.channels);
        let samples = resample_to_frames(
            &mapped,
            self.channels,
            buffer.sample_rate(),
            self.sample_rate,
            frames,
        );

        lock(&self.timeline).insert(Segment {
            start_frame,
            samples,
            generation,
        });
    }

    fn flush(&self) {
        lock(&self.timeline).flush();
    }

    fn resume(&self) {
        lock(&self.timeline).resume();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
