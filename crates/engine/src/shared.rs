//! State shared between the controller thread and the render callback.
//!
//! Run state and position are separate atomics. Ownership of the position
//! follows the run state: the renderer writes it only while `Playing`, the
//! controller only after it has moved the run state away from `Playing` and
//! waited out any callback still in flight (see [`EngineShared::quiesce`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Playing,
            2 => RunState::Paused,
            _ => RunState::Stopped,
        }
    }
}

/// Upper bound on how long the controller waits for an in-flight callback.
const QUIESCE_LIMIT: Duration = Duration::from_millis(500);

pub(crate) struct EngineShared {
    pub(crate) position: AtomicU64,
    run: AtomicU8,
    pub(crate) in_render: AtomicBool,
    pub(crate) clicks_enabled: AtomicBool,
    /// Bumped on every controller-side position jump.
    pub(crate) generation: AtomicU64,
    pub(crate) faults: AtomicU64,
    pub(crate) device_failed: AtomicBool,
    /// Times the renderer has run off the end of the track.
    pub(crate) tracks_ended: AtomicU64,
}

impl EngineShared {
    pub(crate) fn new(clicks_enabled: bool) -> Self {
        Self {
            position: AtomicU64::new(0),
            run: AtomicU8::new(RunState::Stopped as u8),
            in_render: AtomicBool::new(false),
            clicks_enabled: AtomicBool::new(clicks_enabled),
            generation: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            device_failed: AtomicBool::new(false),
            tracks_ended: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn run_state(&self) -> RunState {
        RunState::from_u8(self.run.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set_run_state(&self, state: RunState) {
        self.run.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn swap_run_state(&self, state: RunState) -> RunState {
        RunState::from_u8(self.run.swap(state as u8, Ordering::SeqCst))
    }

    pub(crate) fn transition(&self, from: RunState, to: RunState) -> bool {
        self.run
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Wait until no render callback is in flight.
    ///
    /// Must be called after the run state has left `Playing`. The renderer
    /// raises `in_render` before it reads the run state (both SeqCst), so once
    /// this returns any callback that saw `Playing` has published its position
    /// and every later callback sees the new state.
    pub(crate) fn quiesce(&self) -> bool {
        let started = Instant::now();
        let mut spins = 0u32;
        while self.in_render.load(Ordering::SeqCst) {
            if spins < 64 {
                std::hint::spin_loop();
            } else if started.elapsed() > QUIESCE_LIMIT {
                return false;
            } else {
                std::thread::yield_now();
            }
            spins = spins.saturating_add(1);
        }
        true
    }

    pub(crate) fn jump_to(&self, frame: u64) {
        self.position.store(frame, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Read-only view of the playback position, safe to hand to other threads.
#[derive(Clone)]
pub struct PositionReader {
    shared: Arc<EngineShared>,
}

impl PositionReader {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    /// Position as of the last fully rendered callback or controller seek.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    #[inline]
    pub fn run_state(&self) -> RunState {
        self.shared.run_state()
    }
}
