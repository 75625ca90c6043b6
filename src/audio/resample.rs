//! Format adaptation between the stream and the output device.
//!
//! The service produces 48 kHz stereo; output devices may run at another
//! rate or channel count.  Two conversion steps:
//!
//! 1. [`remap_channels`]: up- or down-mix interleaved frames.
//! 2. [`resample_interleaved`]: change the sample rate of interleaved audio.
//!    [`resample_to_frames`] does the same to an exact output length.
//!
//! The resampler uses per-channel linear interpolation.  Chunks are resampled
//! independently; the output sizes each one from its absolute position on the
//! device timeline so consecutive chunks stay contiguous.

// ---------------------------------------------------------------------------
// remap_channels
// ---------------------------------------------------------------------------

/// Convert interleaved audio from `from` channels to `to` channels.
///
/// * Same count: returned unchanged.
/// * To mono: each frame is averaged.
/// * From mono: the sample is copied into every output channel.
/// * Otherwise: the first `min(from, to)` channels are kept and any extra
///   output channels are silent.
///
/// ```rust
/// use promptdj::audio::remap_channels;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = remap_channels(&stereo, 2, 1);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == 0 || to == 0 {
        return Vec::new();
    }
    if from == to {
        return samples.to_vec();
    }
    let (from, to) = (from as usize, to as usize);
    let frames = samples.chunks_exact(from);

    if to == 1 {
        return frames
            .map(|frame| frame.iter().sum::<f32>() / from as f32)
            .collect();
    }

    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in frames {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            out.extend((0..to).map(|c| frame.get(c).copied().unwrap_or(0.0)));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// resample_interleaved
// ---------------------------------------------------------------------------

/// Resample interleaved audio from `from_rate` to `to_rate` Hz.
///
/// * Equal rates: the input is cloned unchanged.
/// * Empty input or zero channels: empty output.
///
/// The output has `ceil(frames * to_rate / from_rate)` frames.
///
/// ```rust
/// use promptdj::audio::resample_interleaved;
///
/// // 10 ms of stereo at 48 kHz → 10 ms at 44.1 kHz
/// let hi = vec![0.25_f32; 480 * 2];
/// let lo = resample_interleaved(&hi, 2, 48_000, 44_100);
/// assert_eq!(lo.len(), 441 * 2);
/// ```
pub fn resample_interleaved(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    let ch = channels as usize;
    if samples.is_empty() || ch == 0 || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    let in_frames = samples.len() / ch;
    let out_frames = (in_frames as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
    resample_to_frames(samples, channels, from_rate, to_rate, out_frames)
}

/// Like [`resample_interleaved`], but the output has exactly `out_frames`
/// frames.  Callers placing consecutive buffers on a frame grid use this to
/// size each one from its absolute start and end, so rounding never
/// accumulates.  Frames past the end of the input hold the last input frame;
/// surplus input is cut.
///
/// ```rust
/// use promptdj::audio::resample_to_frames;
///
/// let hi = vec![1.0_f32; 1000];
/// assert_eq!(resample_to_frames(&hi, 1, 48_000, 44_100, 918).len(), 918);
/// assert_eq!(resample_to_frames(&hi, 1, 48_000, 44_100, 919).len(), 919);
/// ```
pub fn resample_to_frames(
    samples: &[f32],
    channels: u16,
    from_rate: u32,
    to_rate: u32,
    out_frames: usize,
) -> Vec<f32> {
    let ch = channels as usize;
    let in_frames = if ch == 0 { 0 } else { samples.len() / ch };
    if in_frames == 0 || from_rate == 0 || to_rate == 0 {
        return vec![0.0; out_frames * ch];
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let mut output = Vec::with_capacity(out_frames * ch);

    for i in 0..out_frames {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        for c in 0..ch {
            let at = |frame: usize| samples[frame * ch + c];
            let sample = if idx + 1 < in_frames {
                // Linear interpolation between adjacent frames
                at(idx) * (1.0 - frac) + at(idx + 1) * frac
            } else {
                at(idx.min(in_frames - 1))
            };
            output.push(sample);
        }
    }

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
