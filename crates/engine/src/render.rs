use std::sync::Arc;
use std::sync::atomic::Ordering;

use basedrop::Shared;
use cpal::{FromSample, SizedSample};
use metro_transport::{BeatClock, ClickConfig, ClickKind, SampleBuffer, Status, sample_to_f32};

use crate::shared::{EngineShared, RunState};

/// Everything the callback needs about the loaded track.
///
/// Swapped in as a whole through a ring buffer; the previous slot is reclaimed
/// by the engine's collector, never freed on the audio thread.
pub(crate) struct TrackSlot {
    pub(crate) buffer: SampleBuffer,
    pub(crate) clock: BeatClock,
    pub(crate) clicks: Option<ClickConfig>,
}

pub(crate) type SharedSlot = Shared<TrackSlot>;

#[derive(Debug, Clone, Copy)]
struct ClickVoice {
    kind: ClickKind,
    cursor: u64,
}

/// The render callback.
///
/// Owned by the audio thread. It advances the shared position by exactly the
/// number of frames it takes from the track.
pub struct Renderer {
    shared: Arc<EngineShared>,
    slot: SharedSlot,
    slots_rx: rtrb::Consumer<SharedSlot>,
    status_tx: rtrb::Producer<Status>,
    voice: Option<ClickVoice>,
    generation: u64,
}

impl Renderer {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        slot: SharedSlot,
        slots_rx: rtrb::Consumer<SharedSlot>,
        status_tx: rtrb::Producer<Status>,
    ) -> Self {
        let generation = shared.generation.load(Ordering::Acquire);
        Self {
            shared,
            slot,
            slots_rx,
            status_tx,
            voice: None,
            generation,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Fill `data` (interleaved, `channels` wide) with the next block of audio.
    pub fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        self.shared.in_render.store(true, Ordering::SeqCst);
        self.render_block(data, channels);
        self.shared.in_render.store(false, Ordering::SeqCst);
    }

    fn render_block<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        self.swap_slots();

        if channels == 0 || data.len() % channels != 0 {
            self.shared.faults.fetch_add(1, Ordering::Relaxed);
            fill_silence(data);
            return;
        }

        if self.shared.run_state() != RunState::Playing {
            fill_silence(data);
            return;
        }

        // A slot pushed before the controller switched to Playing is visible now.
        self.swap_slots();

        let generation = self.shared.generation.load(Ordering::Acquire);
        if generation != self.generation {
            self.generation = generation;
            self.voice = None;
        }

        let slot = &*self.slot;
        let clicks = slot.clicks.as_ref();
        let clicks_on = clicks.is_some() && self.shared.clicks_enabled.load(Ordering::Relaxed);

        let start = self.shared.position.load(Ordering::Acquire);
        let total = slot.buffer.frames();
        let frames = (data.len() / channels) as u64;
        let consumed = frames.min(total.saturating_sub(start));
        let mut next_click = slot.clock.next_boundary(start);

        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let i = i as u64;
            let (mut left, mut right) = if i < consumed {
                let pos = start + i;
                if pos == next_click {
                    next_click += slot.clock.samples_per_beat();
                    if clicks_on {
                        if let Some(kind) = slot.clock.boundary(pos) {
                            self.voice = Some(ClickVoice { kind, cursor: 0 });
                            let _ = self.status_tx.push(Status::Click { kind, frame: pos });
                        }
                    }
                }
                match slot.buffer.frame(pos) {
                    Some((l, r)) => (sample_to_f32(l), sample_to_f32(r)),
                    None => (0.0, 0.0),
                }
            } else {
                (0.0, 0.0)
            };

            // Past the end of the track the rest of the buffer stays silent.
            if i < consumed {
                if let Some((cl, cr)) = next_click_frame(&mut self.voice, clicks) {
                    left += cl;
                    right += cr;
                }
            }

            for (ch, sample) in frame.iter_mut().enumerate() {
                let value = if ch % 2 == 0 { left } else { right };
                *sample = T::from_sample(value.clamp(-1.0, 1.0));
            }
        }

        let end = start + consumed;
        if end >= total {
            self.voice = None;
            self.shared.position.store(0, Ordering::SeqCst);
            self.shared.set_run_state(RunState::Stopped);
            self.shared.tracks_ended.fetch_add(1, Ordering::AcqRel);
            let _ = self.status_tx.push(Status::EndOfTrack);
        } else {
            self.shared.position.store(end, Ordering::Release);
        }
    }

    fn swap_slots(&mut self) {
        while let Ok(slot) = self.slots_rx.pop() {
            self.slot = slot;
            self.voice = None;
        }
    }
}

fn next_click_frame(voice: &mut Option<ClickVoice>, clicks: Option<&ClickConfig>) -> Option<(f32, f32)> {
    let (Some(active), Some(clicks)) = (voice.as_mut(), clicks) else {
        *voice = None;
        return None;
    };
    match clicks.sound(active.kind).frame(active.cursor) {
        Some((l, r)) => {
            active.cursor += 1;
            Some((sample_to_f32(l), sample_to_f32(r)))
        }
        None => {
            *voice = None;
            None
        }
    }
}

fn fill_silence<T: SizedSample + FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;

    struct Rig {
        shared: Arc<EngineShared>,
        renderer: Renderer,
        status: rtrb::Consumer<Status>,
        _slots: rtrb::Producer<SharedSlot>,
        _collector: Collector,
    }

    fn rig(buffer: SampleBuffer, clicks: Option<ClickConfig>) -> Rig {
        let collector = Collector::new();
        let shared = Arc::new(EngineShared::new(clicks.as_ref().is_some_and(|c| c.enabled)));
        let clock = BeatClock::new(buffer.sample_rate(), 120.0);
        let slot = Shared::new(&collector.handle(), TrackSlot { buffer, clock, clicks });
        let (slots_tx, slots_rx) = rtrb::RingBuffer::new(4);
        let (status_tx, status_rx) = rtrb::RingBuffer::new(64);
        Rig {
            renderer: Renderer::new(shared.clone(), slot, slots_rx, status_tx),
            shared,
            status: status_rx,
            _slots: slots_tx,
            _collector: collector,
        }
    }

    fn constant(value: i16, frames: usize, sample_rate: u32) -> SampleBuffer {
        SampleBuffer::new(vec![value; frames * 2], sample_rate)
    }

    #[test]
    fn silent_unless_playing() {
        let mut rig = rig(constant(16384, 100, 8000), None);
        let mut out = [1.0f32; 32];

        rig.renderer.render(&mut out, 2);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(rig.shared.position.load(Ordering::Acquire), 0);
    }

    #[test]
    fn converts_to_unit_range_and_maps_extra_channels() {
        let buffer = SampleBuffer::new(vec![16384, -16384, 16384, -16384, 0, 0], 8000);
        let mut rig = rig(buffer, None);
        rig.shared.set_run_state(RunState::Playing);

        let mut out = [0.0f32; 8];
        rig.renderer.render(&mut out, 4);

        assert_eq!(out, [0.5, -0.5, 0.5, -0.5, 0.5, -0.5, 0.5, -0.5]);
        assert_eq!(rig.shared.position.load(Ordering::Acquire), 2);
    }

    #[test]
    fn malformed_buffer_counts_a_fault() {
        let mut rig = rig(constant(1000, 100, 8000), None);
        rig.shared.set_run_state(RunState::Playing);

        let mut out = [1.0f32; 5];
        rig.renderer.render(&mut out, 2);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(rig.shared.faults.load(Ordering::Relaxed), 1);
        assert_eq!(rig.shared.position.load(Ordering::Acquire), 0);
    }

    #[test]
    fn end_of_track_pads_and_stops() {
        let mut rig = rig(constant(8192, 10, 8000), None);
        rig.shared.set_run_state(RunState::Playing);
        rig.shared.jump_to(6);

        let mut out = [0.0f32; 16];
        rig.renderer.render(&mut out, 2);

        assert!(out[..8].iter().all(|&s| s == 0.25));
        assert!(out[8..].iter().all(|&s| s == 0.0));
        assert_eq!(rig.shared.run_state(), RunState::Stopped);
        assert_eq!(rig.shared.position.load(Ordering::Acquire), 0);
        assert_eq!(rig.status.pop(), Ok(Status::EndOfTrack));
    }

    #[test]
    fn clicks_mix_at_beat_boundaries() {
        // 120 BPM at 8000 Hz: 4000 frames per beat.
        let clicks = ClickConfig::new(constant(4096, 3, 8000), constant(2048, 3, 8000), true);
        let mut rig = rig(SampleBuffer::silence(9000, 8000), Some(clicks));
        rig.shared.set_run_state(RunState::Playing);
        rig.shared.jump_to(3998);

        let mut out = [0.0f32; 16];
        rig.renderer.render(&mut out, 2);

        // frames 3998, 3999 silent; 4000..4003 beat click; then silence
        assert_eq!(&out[..4], &[0.0; 4]);
        assert_eq!(&out[4..10], &[0.0625; 6]);
        assert_eq!(&out[10..], &[0.0; 6]);
        assert_eq!(
            rig.status.pop(),
            Ok(Status::Click { kind: ClickKind::Beat, frame: 4000 })
        );
    }

    #[test]
    fn ringing_click_stops_at_end_of_track() {
        // 120 BPM at 8000 Hz: beat at 4000; the click outlasts the track.
        let clicks = ClickConfig::new(constant(4096, 300, 8000), constant(8192, 300, 8000), true);
        let mut rig = rig(SampleBuffer::silence(4100, 8000), Some(clicks));
        rig.shared.set_run_state(RunState::Playing);
        rig.shared.jump_to(3990);

        let mut out = [0.0f32; 400];
        rig.renderer.render(&mut out, 2);

        // 110 frames of track: 10 silent, 100 with the beat click
        assert!(out[..20].iter().all(|&s| s == 0.0));
        assert!(out[20..220].iter().all(|&s| s == 0.25));
        assert!(out[220..].iter().all(|&s| s == 0.0));
        assert_eq!(rig.shared.run_state(), RunState::Stopped);
        assert_eq!(rig.shared.tracks_ended.load(Ordering::Acquire), 1);

        // Nothing carries over into the next play-through.
        rig.shared.set_run_state(RunState::Playing);
        rig.shared.jump_to(10);
        let mut out = [0.0f32; 20];
        rig.renderer.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn seek_cuts_ringing_click() {
        let clicks = ClickConfig::new(constant(4096, 100, 8000), constant(2048, 100, 8000), true);
        let mut rig = rig(SampleBuffer::silence(9000, 8000), Some(clicks));
        rig.shared.set_run_state(RunState::Playing);

        let mut out = [0.0f32; 8];
        rig.renderer.render(&mut out, 2);
        assert_eq!(out[0], 0.125);

        rig.shared.jump_to(10);
        rig.renderer.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn disabled_clicks_stay_silent() {
        let clicks = ClickConfig::new(constant(4096, 3, 8000), constant(2048, 3, 8000), false);
        let mut rig = rig(SampleBuffer::silence(9000, 8000), Some(clicks));
        rig.shared.set_run_state(RunState::Playing);

        let mut out = [0.0f32; 8];
        rig.renderer.render(&mut out, 2);

        assert!(out.iter().all(|&s| s == 0.0));
        assert!(rig.status.pop().is_err());
    }

    #[test]
    fn renders_integer_formats() {
        let mut rig = rig(constant(16384, 4, 8000), None);
        rig.shared.set_run_state(RunState::Playing);

        let mut out = [0i16; 4];
        rig.renderer.render(&mut out, 2);

        assert_eq!(out, [16384; 4]);
    }
}
