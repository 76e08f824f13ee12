use std::fs::File;
use std::path::{Path, PathBuf};

use metro_transport::{CHANNELS, ClickConfig, SampleBuffer};
use symphonia::core::audio::SampleBuffer as DecodedBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported or corrupt audio: {0}")]
    Format(#[from] SymphoniaError),
    #[error("no decodable audio track")]
    NoTrack,
    #[error("unknown sample rate")]
    UnknownSampleRate,
    #[error("unsupported channel count {0}, expected mono or stereo")]
    UnsupportedChannels(usize),
}

/// Resolve `path` as given, or relative to `root` if it does not exist as-is.
pub fn resolve_path(path: &Path, root: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let with_root = root.join(path);
    if with_root.exists() {
        return Some(with_root);
    }

    None
}

/// Decode a whole file into interleaved 16-bit stereo at its native sample rate.
///
/// Mono sources are duplicated onto both channels. The sample rate is left
/// untouched.
pub fn load_track(path: &Path) -> Result<SampleBuffer, DecodeError> {
    if !path.exists() {
        return Err(DecodeError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::UnknownSampleRate)?;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<i16> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                debug!("skipping corrupt packet in {}: {msg}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let mut buf = DecodedBuffer::<i16>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);

        match channels {
            1 => {
                for &s in buf.samples() {
                    samples.extend_from_slice(&[s, s]);
                }
            }
            2 => samples.extend_from_slice(buf.samples()),
            n => return Err(DecodeError::UnsupportedChannels(n)),
        }
    }

    debug_assert_eq!(samples.len() % CHANNELS as usize, 0);
    let buffer = SampleBuffer::new(samples, sample_rate);
    debug!("decoded {}: {:?}", path.display(), buffer);
    Ok(buffer)
}

/// Load the bar and beat click sounds, matched to the track's sample rate.
///
/// Returns `None` (silent metronome) if either sound is missing or unusable.
pub fn load_click_config(
    bar_sound: &Path,
    beat_sound: &Path,
    track_sample_rate: u32,
    enabled: bool,
) -> Option<ClickConfig> {
    let load = |path: &Path| match load_track(path) {
        Ok(buffer) => Some(buffer),
        Err(e) => {
            warn!("click sound {} unavailable: {e}", path.display());
            None
        }
    };

    let bar = load(bar_sound)?;
    let beat = load(beat_sound)?;

    match ClickConfig::new(bar, beat, enabled).matched_to(track_sample_rate) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("failed to resample click sounds to {track_sample_rate} Hz: {e}");
            None
        }
    }
}
