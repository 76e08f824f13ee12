//! Controller shared between the input task and the poll loop.

use metro_core::TransportController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

pub struct AppState {
    controller: Mutex<TransportController>,
    show_beat: AtomicBool,
}

impl AppState {
    pub fn new(controller: TransportController) -> Self {
        Self {
            controller: Mutex::new(controller),
            show_beat: AtomicBool::new(true),
        }
    }

    pub fn show_beat(&self) -> bool {
        self.show_beat.load(Ordering::Relaxed)
    }

    /// Returns the new setting.
    pub fn toggle_beat_display(&self) -> bool {
        !self.show_beat.fetch_xor(true, Ordering::Relaxed)
    }

    /// Block until the controller is free. Commands hold it only briefly.
    pub fn lock(&self) -> MutexGuard<'_, TransportController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking lock for the poll loop; `None` means skip this tick.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, TransportController>> {
        match self.controller.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
