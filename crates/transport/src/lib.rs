use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

pub mod clock;

pub use clock::{BeatClock, BeatSnapshot, TimeSignature, compute_beat};

/// Channel count of every buffer the player handles (interleaved stereo).
pub const CHANNELS: u16 = 2;

/// Fully decoded, immutable interleaved-stereo 16-bit PCM.
///
/// `SampleBuffer` stores its samples in an `Arc<[i16]>`, so cloning only bumps a
/// reference count. The decoder builds one per track, and the render callback,
/// the controller and the click voices all hold clones of the same data.
///
/// # Memory Layout
///
/// ```text
/// SampleBuffer (24 bytes on stack)
/// ├─ samples: Arc<[i16]> (16 bytes) ────> Heap: [L0, R0, L1, R1, ...]
/// └─ sample_rate: u32 (4 bytes)
/// ```
///
/// # Examples
///
/// ```
/// use metro_transport::SampleBuffer;
///
/// let buffer = SampleBuffer::new(vec![0, 100, -100, 0], 44100);
/// assert_eq!(buffer.frames(), 2);
/// assert_eq!(buffer.frame(1), Some((-100, 0)));
/// ```
#[derive(Clone)]
pub struct SampleBuffer {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer from owned interleaved stereo samples.
    ///
    /// # Panics
    ///
    /// Panics if `sample_rate` is 0 or if `samples.len()` is odd.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self::from_arc(Arc::from(samples), sample_rate)
    }

    /// Create a buffer from an existing `Arc<[i16]>` without copying.
    ///
    /// # Panics
    ///
    /// Panics if `sample_rate` is 0 or if `samples.len()` is odd.
    pub fn from_arc(samples: Arc<[i16]>, sample_rate: u32) -> Self {
        assert!(sample_rate > 0, "sample_rate must be greater than 0");
        assert_eq!(
            samples.len() % CHANNELS as usize,
            0,
            "samples.len() must be a multiple of the channel count"
        );
        Self {
            samples,
            sample_rate,
        }
    }

    /// A buffer of `frames` frames of digital silence.
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; frames * CHANNELS as usize], sample_rate)
    }

    /// All interleaved samples, `[L, R, L, R, ...]`.
    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[i16]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames.
    #[inline]
    pub fn frames(&self) -> u64 {
        (self.samples.len() / CHANNELS as usize) as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The `(left, right)` pair at `frame`, or `None` past the end.
    #[inline]
    pub fn frame(&self, frame: u64) -> Option<(i16, i16)> {
        let idx = usize::try_from(frame).ok()? * CHANNELS as usize;
        match (self.samples.get(idx), self.samples.get(idx + 1)) {
            (Some(&l), Some(&r)) => Some((l, r)),
            _ => None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames_to_secs(self.frames())
    }

    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }

    /// Map a fraction of the track length to a frame, clamping into `[0, frames]`.
    pub fn fraction_to_frame(&self, fraction: f64) -> u64 {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        ((fraction * self.frames() as f64).round() as u64).min(self.frames())
    }

    /// Resample to `target_sample_rate`.
    ///
    /// Returns a cheap clone when the rate already matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the resampler rejects the parameters.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }

        resample_buffer(self, target_sample_rate)
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

/// Convert a signed 16-bit sample to the `[-1.0, 1.0)` range the device expects.
#[inline]
pub fn sample_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

#[inline]
fn f32_to_sample(value: f32) -> i16 {
    (value * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Resample a `SampleBuffer` with sinc interpolation.
///
/// Used for click sounds recorded at a rate other than the track's; the track
/// itself is never resampled.
pub fn resample_buffer(buffer: &SampleBuffer, target_sample_rate: u32) -> anyhow::Result<SampleBuffer> {
    if buffer.sample_rate == target_sample_rate {
        return Ok(buffer.clone());
    }
    anyhow::ensure!(target_sample_rate > 0, "target sample rate must be greater than 0");

    let channels = CHANNELS as usize;
    let input_frames = buffer.frames() as usize;
    if input_frames == 0 {
        return Ok(SampleBuffer::silence(0, target_sample_rate));
    }

    let resample_ratio = target_sample_rate as f64 / buffer.sample_rate as f64;
    let output_frames = (input_frames as f64 * resample_ratio).ceil() as usize;

    let mut input_channels = vec![Vec::with_capacity(input_frames); channels];
    for frame in buffer.samples().chunks_exact(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            input_channels[ch].push(sample_to_f32(sample));
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;
    // The sinc filter shifts everything later by this many output frames.
    let delay = resampler.output_delay();
    let mut output_channels = resampler.process(&input_channels, None)?;

    // Flush the filter so trimming the delay does not cut the tail short.
    while output_channels[0].len() < delay + output_frames {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if tail[0].is_empty() {
            break;
        }
        for (channel, extra) in output_channels.iter_mut().zip(tail) {
            channel.extend(extra);
        }
    }

    let available = output_channels[0].len().saturating_sub(delay);
    let frames = output_frames.min(available);
    let mut output_samples = Vec::with_capacity(frames * channels);
    for frame_idx in delay..delay + frames {
        for channel in &output_channels {
            output_samples.push(f32_to_sample(channel[frame_idx]));
        }
    }

    Ok(SampleBuffer::new(output_samples, target_sample_rate))
}

/// Which metronome sound a beat boundary triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    /// First beat of a bar.
    Bar,
    /// Any other beat.
    Beat,
}

/// Metronome click sounds, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ClickConfig {
    pub enabled: bool,
    pub bar_sound: SampleBuffer,
    pub beat_sound: SampleBuffer,
}

impl ClickConfig {
    pub fn new(bar_sound: SampleBuffer, beat_sound: SampleBuffer, enabled: bool) -> Self {
        Self {
            enabled,
            bar_sound,
            beat_sound,
        }
    }

    pub fn sound(&self, kind: ClickKind) -> &SampleBuffer {
        match kind {
            ClickKind::Bar => &self.bar_sound,
            ClickKind::Beat => &self.beat_sound,
        }
    }

    /// Bring both sounds to the track's sample rate so they can be mixed frame for frame.
    pub fn matched_to(&self, sample_rate: u32) -> anyhow::Result<Self> {
        Ok(Self {
            enabled: self.enabled,
            bar_sound: self.bar_sound.resample(sample_rate)?,
            beat_sound: self.beat_sound.resample(sample_rate)?,
        })
    }
}

/// Events the render callback publishes to the controller thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The track ran out mid-callback; the engine is now stopped at frame 0.
    EndOfTrack,
    /// A click was triggered at `frame`.
    Click { kind: ClickKind, frame: u64 },
}
