mod error;
mod output;
mod render;
mod shared;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use basedrop::{Collector, Shared};
use metro_transport::{BeatClock, ClickConfig, SampleBuffer, Status, TimeSignature};
use tracing::{debug, info, warn};

pub use error::EngineError;
pub use output::{AudioOutput, CpalOutput, OfflineOutput};
pub use render::Renderer;
pub use shared::{PositionReader, RunState};

use render::{SharedSlot, TrackSlot};
use shared::EngineShared;

const STATUS_CAPACITY: usize = 256;
const SLOT_CAPACITY: usize = 4;
/// Extra attempts `ensure_output` makes after a failed open.
const OPEN_RETRIES: u32 = 1;

/// Wall-clock reference captured by `start`, for display smoothing only.
#[derive(Debug, Clone, Copy)]
struct StartAnchor {
    at: Instant,
    frame: u64,
}

/// Owns the playback position and the render callback's shared state.
///
/// All methods run on the controller thread. The render callback lives inside
/// the [`AudioOutput`] and only talks to the engine through atomics and two
/// ring buffers.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    collector: Collector,
    track: SampleBuffer,
    clock: BeatClock,
    clicks: Option<ClickConfig>,
    slots_tx: rtrb::Producer<SharedSlot>,
    status_rx: rtrb::Consumer<Status>,
    output: Box<dyn AudioOutput>,
    anchor: Option<StartAnchor>,
    reported_faults: u64,
}

impl PlaybackEngine {
    pub fn new(
        track: SampleBuffer,
        bpm: f64,
        time_signature: impl Into<TimeSignature>,
        clicks: Option<ClickConfig>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        let clock = BeatClock::with_time_signature(track.sample_rate(), bpm, time_signature);
        let clicks = match_clicks(clicks, track.sample_rate());
        let shared = Arc::new(EngineShared::new(clicks.as_ref().is_some_and(|c| c.enabled)));

        // Placeholder queues; every renderer gets a fresh pair.
        let (slots_tx, _) = rtrb::RingBuffer::new(SLOT_CAPACITY);
        let (_, status_rx) = rtrb::RingBuffer::new(STATUS_CAPACITY);

        Self {
            shared,
            collector: Collector::new(),
            track,
            clock,
            clicks,
            slots_tx,
            status_rx,
            output,
            anchor: None,
            reported_faults: 0,
        }
    }

    fn slot(&self) -> SharedSlot {
        Shared::new(
            &self.collector.handle(),
            TrackSlot {
                buffer: self.track.clone(),
                clock: self.clock,
                clicks: self.clicks.clone(),
            },
        )
    }

    /// Build a renderer bound to this engine, replacing the previous one's queues.
    fn renderer(&mut self) -> Renderer {
        let (slots_tx, slots_rx) = rtrb::RingBuffer::new(SLOT_CAPACITY);
        let (status_tx, status_rx) = rtrb::RingBuffer::new(STATUS_CAPACITY);
        self.slots_tx = slots_tx;
        self.status_rx = status_rx;
        Renderer::new(self.shared.clone(), self.slot(), slots_rx, status_tx)
    }

    fn open_once(&mut self) -> Result<(), EngineError> {
        let renderer = self.renderer();
        self.shared.device_failed.store(false, Ordering::Release);
        self.output.open(renderer, self.track.sample_rate())
    }

    /// Open the output if it is not already open, retrying once.
    ///
    /// On failure the engine is left `Stopped`.
    pub fn ensure_output(&mut self) -> Result<(), EngineError> {
        if self.output.is_open() && !self.shared.device_failed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match self.open_once() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < OPEN_RETRIES => {
                    attempt += 1;
                    warn!("opening output failed ({e}), retrying");
                }
                Err(e) => {
                    self.halt();
                    return Err(e);
                }
            }
        }
    }

    /// Take the failure flag raised by the device's error callback.
    pub fn take_device_failure(&mut self) -> bool {
        self.shared.device_failed.swap(false, Ordering::AcqRel)
    }

    /// Reopen a failed output once, resuming playback if it was running.
    ///
    /// On failure the engine is `Stopped` with its position kept.
    pub fn recover_output(&mut self) -> Result<(), EngineError> {
        let was_playing = self.shared.run_state() == RunState::Playing;
        self.halt();
        self.output.close();

        match self.open_once() {
            Ok(()) => {
                info!("output recovered");
                if was_playing {
                    self.start();
                }
                Ok(())
            }
            Err(e) => {
                self.output.close();
                Err(e)
            }
        }
    }

    pub fn close_output(&mut self) {
        self.halt();
        self.output.close();
    }

    /// `Stopped`/`Paused` → `Playing`. Returns false if already playing.
    pub fn start(&mut self) -> bool {
        if self.shared.run_state() == RunState::Playing {
            return false;
        }
        let frame = self.current_position();
        self.anchor = Some(StartAnchor {
            at: Instant::now(),
            frame,
        });
        self.shared.set_run_state(RunState::Playing);
        debug!("engine playing from frame {frame}");
        true
    }

    /// `Playing` → `Paused`. Returns false (and changes nothing) otherwise.
    ///
    /// When this returns, the callback has either finished the buffer it was
    /// rendering or has not started one, and the position is settled.
    pub fn pause(&mut self) -> bool {
        if !self.shared.transition(RunState::Playing, RunState::Paused) {
            return false;
        }
        self.settle();
        debug!("engine paused at frame {}", self.current_position());
        true
    }

    /// Stop and rewind to the start of the track.
    pub fn stop(&mut self) {
        self.shared.swap_run_state(RunState::Stopped);
        self.settle();
        self.shared.jump_to(0);
    }

    /// Force `Stopped` without moving the position.
    pub fn halt(&mut self) {
        self.shared.swap_run_state(RunState::Stopped);
        self.settle();
    }

    fn settle(&mut self) {
        self.anchor = None;
        if !self.shared.quiesce() {
            warn!("render callback did not finish in time");
        }
    }

    /// Move the position to `target`, clamped to `[0, total_frames]`.
    pub fn seek(&mut self, target: i64) -> Result<u64, EngineError> {
        if self.shared.run_state() == RunState::Playing {
            return Err(EngineError::SeekWhilePlaying);
        }
        let frame = u64::try_from(target).unwrap_or(0).min(self.total_frames());
        self.shared.jump_to(frame);
        Ok(frame)
    }

    /// Replace the track. Playback stops and rewinds.
    pub fn load_track(&mut self, track: SampleBuffer) {
        self.stop();
        if track.sample_rate() != self.track.sample_rate() {
            // The stream runs at the old rate; the next `ensure_output` reopens it.
            self.output.close();
            self.clock = BeatClock::with_time_signature(
                track.sample_rate(),
                self.clock.bpm(),
                self.clock.time_signature(),
            );
            self.clicks = match_clicks(self.clicks.take(), track.sample_rate());
            if self.clicks.is_none() {
                self.shared.clicks_enabled.store(false, Ordering::Relaxed);
            }
        }
        self.track = track;

        if self.output.is_open() {
            let slot = self.slot();
            if self.slots_tx.push(slot).is_err() {
                // The callback is not draining; start over with a fresh renderer.
                warn!("track queue full, reopening output");
                self.output.close();
            }
        }
        info!("loaded track: {:?}", self.track);
    }

    /// Times the track has played to its end, as counted by the renderer.
    pub fn tracks_ended(&self) -> u64 {
        self.shared.tracks_ended.load(Ordering::Acquire)
    }

    /// Returns whether clicks are now enabled; false when no click sounds are loaded.
    pub fn set_clicks_enabled(&mut self, enabled: bool) -> bool {
        if enabled && self.clicks.is_none() {
            warn!("click sounds not loaded, metronome stays silent");
            return false;
        }
        self.shared.clicks_enabled.store(enabled, Ordering::Relaxed);
        enabled
    }

    pub fn clicks_enabled(&self) -> bool {
        self.shared.clicks_enabled.load(Ordering::Relaxed)
    }

    pub fn has_clicks(&self) -> bool {
        self.clicks.is_some()
    }

    /// Drain events published by the callback and reclaim retired tracks.
    pub fn drain_status(&mut self) -> Vec<Status> {
        self.collector.collect();

        let faults = self.render_faults();
        if faults > self.reported_faults {
            warn!(
                "{} malformed output buffer(s) rendered as silence",
                faults - self.reported_faults
            );
            self.reported_faults = faults;
        }

        let mut events = Vec::new();
        while let Ok(status) = self.status_rx.pop() {
            events.push(status);
        }
        events
    }

    pub fn render_faults(&self) -> u64 {
        self.shared.faults.load(Ordering::Relaxed)
    }

    /// Position in frames as of the last settled callback or seek.
    pub fn current_position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    pub fn position_reader(&self) -> PositionReader {
        PositionReader::new(self.shared.clone())
    }

    /// Wall-clock extrapolation from the last `start`, for smoothing displays.
    ///
    /// Never used as the playback position itself.
    pub fn estimated_position(&self, now: Instant) -> u64 {
        match (self.state(), self.anchor) {
            (RunState::Playing, Some(anchor)) => {
                let elapsed = now.saturating_duration_since(anchor.at).as_secs_f64();
                let frames = (elapsed * self.track.sample_rate() as f64) as u64;
                (anchor.frame + frames).min(self.total_frames())
            }
            _ => self.current_position(),
        }
    }

    pub fn state(&self) -> RunState {
        self.shared.run_state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == RunState::Playing
    }

    pub fn total_frames(&self) -> u64 {
        self.track.frames()
    }

    pub fn sample_rate(&self) -> u32 {
        self.track.sample_rate()
    }

    pub fn track(&self) -> &SampleBuffer {
        &self.track
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.close_output();
    }
}

fn match_clicks(clicks: Option<ClickConfig>, sample_rate: u32) -> Option<ClickConfig> {
    let clicks = clicks?;
    match clicks.matched_to(sample_rate) {
        Ok(clicks) => Some(clicks),
        Err(e) => {
            warn!("click sounds unusable at {sample_rate} Hz: {e}");
            None
        }
    }
}
