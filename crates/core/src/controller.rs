use std::path::Path;

use metro_engine::{AudioOutput, PlaybackEngine, PositionReader, RunState};
use metro_transport::{BeatSnapshot, ClickConfig, SampleBuffer, Status, TimeSignature};
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::error::{ErrorKind, PlayerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Scrubbing,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

/// What the presentation layer shows. Cheap to compute, never fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub elapsed_seconds: f64,
    pub total_seconds: f64,
    pub position_frames: u64,
    pub beat: BeatSnapshot,
    pub state: TransportState,
    pub clicks_enabled: bool,
}

pub type ErrorHandler = Box<dyn FnMut(ErrorKind, &str) + Send>;

#[derive(Debug, Clone, Copy)]
struct Scrub {
    /// Restore to `Playing` on `scrub_end`, otherwise `Paused`.
    resume_playing: bool,
    /// Pending target shown in snapshots; the engine is not touched until `scrub_end`.
    target: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Stopped,
    Playing,
    Paused,
    Scrubbing(Scrub),
}

/// Turns presentation commands into engine operations.
///
/// Owns the transport state machine. Every method runs on the controller
/// thread; only the engine's position is shared with the audio thread.
pub struct TransportController {
    engine: PlaybackEngine,
    mode: Mode,
    /// `PlaybackEngine::tracks_ended` as of the last `sync`.
    ended_seen: u64,
    on_error: Option<ErrorHandler>,
}

impl TransportController {
    pub fn new(engine: PlaybackEngine) -> Self {
        Self {
            ended_seen: engine.tracks_ended(),
            engine,
            mode: Mode::Stopped,
            on_error: None,
        }
    }

    pub fn from_config(
        track: SampleBuffer,
        clicks: Option<ClickConfig>,
        config: &PlayerConfig,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        let time_signature = TimeSignature::new(config.beats_per_bar, 4);
        Self::new(PlaybackEngine::new(track, config.bpm, time_signature, clicks, output))
    }

    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: FnMut(ErrorKind, &str) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
    }

    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.sync();
        match self.mode {
            Mode::Playing => Ok(()),
            Mode::Scrubbing(ref mut scrub) => {
                scrub.resume_playing = true;
                Ok(())
            }
            Mode::Stopped | Mode::Paused => self.start_engine(),
        }
    }

    pub fn pause(&mut self) {
        self.sync();
        match self.mode {
            Mode::Playing => {
                self.engine.pause();
                self.mode = Mode::Paused;
                // The last callback may have hit the end while we were pausing.
                self.sync();
                info!("paused at frame {}", self.engine.current_position());
            }
            Mode::Scrubbing(ref mut scrub) => scrub.resume_playing = false,
            Mode::Stopped | Mode::Paused => {}
        }
    }

    pub fn toggle_play_pause(&mut self) -> Result<(), PlayerError> {
        self.sync();
        match self.mode {
            Mode::Playing => {
                self.pause();
                Ok(())
            }
            Mode::Scrubbing(ref mut scrub) => {
                scrub.resume_playing = !scrub.resume_playing;
                Ok(())
            }
            Mode::Stopped | Mode::Paused => self.start_engine(),
        }
    }

    pub fn scrub_begin(&mut self) {
        self.sync();
        let resume_playing = match self.mode {
            Mode::Scrubbing(_) => return,
            Mode::Playing => {
                self.engine.pause();
                true
            }
            Mode::Stopped | Mode::Paused => false,
        };
        self.mode = Mode::Scrubbing(Scrub {
            resume_playing,
            target: None,
        });
        self.sync();
        debug!("scrub started at frame {}", self.engine.current_position());
    }

    /// Move the pending scrub target. The playback position is left alone.
    pub fn scrub_update(&mut self, fraction: f64) -> Result<(), PlayerError> {
        let frame = self.fraction_to_frame(fraction)?;
        match self.mode {
            Mode::Scrubbing(ref mut scrub) => scrub.target = Some(frame),
            _ => debug!("scrub update outside a scrub ignored"),
        }
        Ok(())
    }

    /// Seek once to `fraction` and restore the state remembered at `scrub_begin`.
    ///
    /// Outside a scrub this behaves like [`Self::seek_to_fraction`].
    pub fn scrub_end(&mut self, fraction: f64) -> Result<(), PlayerError> {
        let frame = self.fraction_to_frame(fraction)?;
        self.scrub_begin();
        let Mode::Scrubbing(scrub) = self.mode else {
            return Ok(());
        };

        let frame = self.engine.seek(i64::try_from(frame).unwrap_or(i64::MAX))?;
        self.mode = Mode::Paused;
        debug!("scrub ended at frame {frame}");

        if scrub.resume_playing {
            self.start_engine()
        } else {
            Ok(())
        }
    }

    pub fn seek_to_fraction(&mut self, fraction: f64) -> Result<(), PlayerError> {
        self.fraction_to_frame(fraction)?;
        self.scrub_begin();
        self.scrub_end(fraction)
    }

    pub fn stop(&mut self) {
        self.engine.stop();
        self.mode = Mode::Stopped;
        info!("stopped");
    }

    /// Returns whether clicks are enabled afterwards.
    pub fn set_clicks_enabled(&mut self, enabled: bool) -> bool {
        let enabled = self.engine.set_clicks_enabled(enabled);
        info!("clicks {}", if enabled { "on" } else { "off" });
        enabled
    }

    pub fn clicks_enabled(&self) -> bool {
        self.engine.clicks_enabled()
    }

    pub fn has_clicks(&self) -> bool {
        self.engine.has_clicks()
    }

    /// Replace the track and return to `Stopped` at the start.
    pub fn load_track(&mut self, track: SampleBuffer) {
        self.engine.load_track(track);
        self.mode = Mode::Stopped;
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), PlayerError> {
        let track = metro_decode::load_track(path)?;
        self.load_track(track);
        Ok(())
    }

    /// Drain engine events and react to end-of-track and device failures.
    ///
    /// Call regularly from the presentation loop. Returns the drained events.
    pub fn poll(&mut self) -> Vec<Status> {
        let events = self.engine.drain_status();
        if events.contains(&Status::EndOfTrack) {
            debug!("end of track reported by renderer");
        }
        // Covers every state, including a pause that raced the last callback.
        self.sync();

        if self.engine.take_device_failure() {
            warn!("output device failed, reopening");
            if let Err(e) = self.engine.recover_output() {
                if matches!(self.mode, Mode::Playing | Mode::Paused) {
                    self.mode = Mode::Stopped;
                }
                self.report(&e.into());
            }
        }

        events
    }

    pub fn snapshot(&self) -> Snapshot {
        let position_frames = match self.mode {
            Mode::Scrubbing(Scrub {
                target: Some(target),
                ..
            }) => target,
            _ => self.engine.current_position(),
        };
        let track = self.engine.track();

        Snapshot {
            elapsed_seconds: track.frames_to_secs(position_frames),
            total_seconds: track.duration_secs(),
            position_frames,
            beat: self.engine.clock().compute(position_frames),
            state: self.state(),
            clicks_enabled: self.engine.clicks_enabled(),
        }
    }

    pub fn state(&self) -> TransportState {
        match self.mode {
            Mode::Playing if self.engine.state() != RunState::Playing => TransportState::Stopped,
            Mode::Playing => TransportState::Playing,
            Mode::Stopped => TransportState::Stopped,
            Mode::Paused if self.engine.tracks_ended() != self.ended_seen => TransportState::Stopped,
            Mode::Paused => TransportState::Paused,
            Mode::Scrubbing(_) => TransportState::Scrubbing,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_playing()
    }

    pub fn position_reader(&self) -> PositionReader {
        self.engine.position_reader()
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    fn start_engine(&mut self) -> Result<(), PlayerError> {
        if let Err(e) = self.engine.ensure_output() {
            self.mode = Mode::Stopped;
            warn!("cannot start playback: {e}");
            return Err(e.into());
        }
        self.engine.start();
        self.mode = Mode::Playing;
        info!("playing from frame {}", self.engine.current_position());
        Ok(())
    }

    /// Catch up with the renderer, which stops itself at the end of the track.
    fn sync(&mut self) {
        let ended = self.engine.tracks_ended();
        let track_ended = ended != self.ended_seen;
        self.ended_seen = ended;

        match self.mode {
            Mode::Playing if track_ended || self.engine.state() != RunState::Playing => {
                self.mode = Mode::Stopped;
                info!("end of track");
            }
            Mode::Paused if track_ended => {
                self.mode = Mode::Stopped;
                info!("end of track while pausing");
            }
            Mode::Scrubbing(ref mut scrub) if track_ended => scrub.resume_playing = false,
            _ => {}
        }
    }

    fn fraction_to_frame(&self, fraction: f64) -> Result<u64, PlayerError> {
        if !fraction.is_finite() {
            return Err(PlayerError::InvalidCommand(format!(
                "position fraction {fraction} is not a finite number"
            )));
        }
        Ok(self.engine.track().fraction_to_frame(fraction))
    }

    fn report(&mut self, err: &PlayerError) {
        warn!("{err}");
        if let Some(handler) = self.on_error.as_mut() {
            handler(err.kind(), &err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metro_engine::OfflineOutput;
    use std::sync::{Arc, Mutex};

    const RATE: u32 = 8000;

    fn controller(frames: usize) -> (TransportController, OfflineOutput) {
        let output = OfflineOutput::new();
        let config = PlayerConfig {
            bpm: 120.0,
            ..PlayerConfig::default()
        };
        let track = SampleBuffer::new(vec![1000; frames * 2], RATE);
        let controller = TransportController::from_config(track, None, &config, Box::new(output.clone()));
        (controller, output)
    }

    #[test]
    fn play_pause_play() {
        let (mut c, output) = controller(10_000);
        assert_eq!(c.state(), TransportState::Stopped);

        c.play().unwrap();
        assert_eq!(c.state(), TransportState::Playing);
        output.render(1000);

        c.pause();
        assert_eq!(c.state(), TransportState::Paused);
        assert_eq!(c.snapshot().position_frames, 1000);

        c.play().unwrap();
        output.render(500);
        assert_eq!(c.snapshot().position_frames, 1500);
    }

    #[test]
    fn redundant_commands_are_no_ops() {
        let (mut c, output) = controller(10_000);
        c.pause();
        assert_eq!(c.state(), TransportState::Stopped);

        c.play().unwrap();
        c.play().unwrap();
        assert_eq!(output.opens(), 1);
        output.render(100);

        c.pause();
        c.pause();
        assert_eq!(c.state(), TransportState::Paused);
        assert_eq!(c.snapshot().position_frames, 100);
    }

    #[test]
    fn toggle_alternates() {
        let (mut c, _output) = controller(10_000);
        c.toggle_play_pause().unwrap();
        assert!(c.is_playing());
        c.toggle_play_pause().unwrap();
        assert_eq!(c.state(), TransportState::Paused);
    }

    #[test]
    fn scrub_updates_never_move_the_engine() {
        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(2000);

        c.scrub_begin();
        c.scrub_begin();
        assert_eq!(c.state(), TransportState::Scrubbing);

        for i in 0..=100 {
            c.scrub_update(i as f64 / 100.0).unwrap();
            assert_eq!(c.engine().current_position(), 2000);
        }
        c.scrub_update(0.25).unwrap();
        assert_eq!(c.snapshot().position_frames, 2500);
        assert_eq!(c.engine().current_position(), 2000);

        c.scrub_end(0.5).unwrap();
        assert_eq!(c.engine().current_position(), 5000);
        assert_eq!(c.state(), TransportState::Playing);
    }

    #[test]
    fn scrub_restores_paused() {
        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(100);
        c.pause();

        c.scrub_begin();
        c.scrub_end(0.1).unwrap();

        assert_eq!(c.state(), TransportState::Paused);
        assert_eq!(c.snapshot().position_frames, 1000);
    }

    #[test]
    fn scrub_from_stopped_ends_paused() {
        let (mut c, _output) = controller(10_000);
        c.scrub_begin();
        c.scrub_end(0.3).unwrap();

        assert_eq!(c.state(), TransportState::Paused);
        assert_eq!(c.snapshot().position_frames, 3000);
    }

    #[test]
    fn play_and_pause_during_scrub_set_resume_intent() {
        let (mut c, _output) = controller(10_000);
        c.play().unwrap();
        c.scrub_begin();
        c.pause();
        assert_eq!(c.state(), TransportState::Scrubbing);
        c.scrub_end(0.2).unwrap();
        assert_eq!(c.state(), TransportState::Paused);

        c.scrub_begin();
        c.play().unwrap();
        assert_eq!(c.state(), TransportState::Scrubbing);
        c.scrub_end(0.2).unwrap();
        assert_eq!(c.state(), TransportState::Playing);
    }

    #[test]
    fn seek_to_fraction_clamps_and_keeps_playing() {
        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(100);

        c.seek_to_fraction(1.7).unwrap();
        assert_eq!(c.engine().current_position(), 10_000);

        c.seek_to_fraction(-2.0).unwrap();
        assert_eq!(c.engine().current_position(), 0);
        assert_eq!(c.state(), TransportState::Playing);
    }

    #[test]
    fn non_finite_fractions_are_rejected() {
        let (mut c, _output) = controller(10_000);
        c.scrub_begin();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = c.scrub_update(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidCommand);
            assert!(c.scrub_end(bad).is_err());
        }
        assert_eq!(c.state(), TransportState::Scrubbing);
        assert!(c.seek_to_fraction(f64::NAN).is_err());
    }

    #[test]
    fn end_of_track_stops_at_zero() {
        let (mut c, output) = controller(1000);
        c.play().unwrap();
        output.render(600);
        let out = output.render(600);

        assert!(out[2 * 400..].iter().all(|&s| s == 0.0));
        let events = c.poll();
        assert!(events.contains(&Status::EndOfTrack));

        let snapshot = c.snapshot();
        assert_eq!(snapshot.state, TransportState::Stopped);
        assert_eq!(snapshot.position_frames, 0);
        assert_eq!(snapshot.beat.bar, 1);
        assert_eq!(snapshot.beat.beat, 1);

        c.play().unwrap();
        assert!(c.is_playing());
    }

    #[test]
    fn end_of_track_racing_a_pause_still_stops() {
        let (mut c, output) = controller(1000);
        c.play().unwrap();
        output.render(1200);
        // The pause won against the last callback before it noticed the end.
        c.mode = Mode::Paused;
        assert_eq!(c.state(), TransportState::Stopped);

        c.poll();
        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.snapshot().position_frames, 0);

        c.play().unwrap();
        assert!(c.is_playing());
    }

    #[test]
    fn end_of_track_during_scrub_drops_resume() {
        let (mut c, output) = controller(1000);
        c.play().unwrap();
        output.render(1200);
        c.mode = Mode::Scrubbing(Scrub {
            resume_playing: true,
            target: None,
        });

        c.scrub_end(0.5).unwrap();
        assert_eq!(c.state(), TransportState::Paused);
        assert_eq!(c.engine().current_position(), 500);
        assert!(!c.is_playing());
    }

    #[test]
    fn stale_end_of_track_does_not_stop_replay() {
        let (mut c, output) = controller(1000);
        c.play().unwrap();
        output.render(1200);
        c.play().unwrap();
        output.render(100);

        c.poll();
        assert!(c.is_playing());
        assert_eq!(c.snapshot().position_frames, 100);
    }

    #[test]
    fn stop_rewinds() {
        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(700);
        c.stop();

        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.snapshot().position_frames, 0);
        assert_eq!(c.snapshot().elapsed_seconds, 0.0);
    }

    #[test]
    fn snapshot_reports_musical_position() {
        let output = OfflineOutput::new();
        let track = SampleBuffer::silence(44_100 * 10, 44_100);
        let mut c = TransportController::from_config(track, None, &PlayerConfig::default(), Box::new(output));

        c.seek_to_fraction(20_672.0 * 5.0 / 441_000.0).unwrap();
        let snapshot = c.snapshot();

        assert_eq!(snapshot.position_frames, 20_672 * 5);
        assert_eq!(snapshot.beat.bar, 2);
        assert_eq!(snapshot.beat.beat, 2);
        assert_eq!(snapshot.beat.samples_until_next_beat, 20_672);
        assert_eq!(snapshot.total_seconds, 10.0);
    }

    #[test]
    fn failed_device_is_reported_and_stops() {
        let (mut c, output) = controller(10_000);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        c.set_error_handler(move |kind, message| sink.lock().unwrap().push((kind, message.to_string())));

        c.play().unwrap();
        output.render(300);
        output.refuse_opens(1);
        output.fail();
        c.poll();

        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.snapshot().position_frames, 300);
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ErrorKind::AudioDevice);

        drop(errors);
        c.play().unwrap();
        assert!(c.is_playing());
    }

    #[test]
    fn failed_device_recovers_silently() {
        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(300);
        output.fail();
        c.poll();

        assert!(c.is_playing());
        output.render(100);
        assert_eq!(c.snapshot().position_frames, 400);
    }

    #[test]
    fn play_surfaces_open_failure() {
        let output = OfflineOutput::failing(2);
        let track = SampleBuffer::silence(100, RATE);
        let mut c = TransportController::from_config(track, None, &PlayerConfig::default(), Box::new(output));

        let err = c.play().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioDevice);
        assert_eq!(c.state(), TransportState::Stopped);
    }

    #[test]
    fn load_track_resets() {
        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(300);

        c.load_track(SampleBuffer::silence(500, RATE));

        let snapshot = c.snapshot();
        assert_eq!(snapshot.state, TransportState::Stopped);
        assert_eq!(snapshot.position_frames, 0);
        assert_eq!(c.engine().total_frames(), 500);
    }

    #[test]
    fn load_file_replaces_track() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("next.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..600 {
            writer.write_sample(500i16).unwrap();
        }
        writer.finalize().unwrap();

        let (mut c, output) = controller(10_000);
        c.play().unwrap();
        output.render(200);

        c.load_file(&path).unwrap();
        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.engine().total_frames(), 300);
        assert_eq!(c.snapshot().position_frames, 0);
    }

    #[test]
    fn load_file_failure_keeps_current_track() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (mut c, _output) = controller(10_000);
        let sink = errors.clone();
        c.set_error_handler(move |kind, _| sink.lock().unwrap().push(kind));

        let err = c.load_file(Path::new("/nonexistent/track.wav")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(c.engine().total_frames(), 10_000);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn clicks_toggle_requires_sounds() {
        let (mut c, _output) = controller(100);
        assert!(!c.has_clicks());
        assert!(!c.set_clicks_enabled(true));
        assert!(!c.snapshot().clicks_enabled);
    }
}
