//! Background loop that polls the controller and redraws the status line.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use metro_core::{Snapshot, Status};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::display::status_line;
use crate::state::AppState;

/// Poll every `interval` until `token` is cancelled.
///
/// Ticks where the controller is busy with a command are skipped. The line is
/// redrawn while playing, and otherwise only when the snapshot changed.
pub async fn run(state: Arc<AppState>, interval: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<(Snapshot, bool)> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some((events, snapshot)) = poll_once(&state) else {
            continue;
        };

        for event in events {
            if let Status::Click { kind, frame } = event {
                debug!(?kind, frame, "click");
            }
        }

        let view = (snapshot, state.show_beat());
        if snapshot.state.is_playing() || last != Some(view) {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "\r{}\x1b[K", status_line(&view.0, view.1));
            let _ = stdout.flush();
        }
        last = Some(view);
    }

    println!();
}

fn poll_once(state: &AppState) -> Option<(Vec<Status>, Snapshot)> {
    let mut controller = state.try_lock()?;
    let events = controller.poll();
    Some((events, controller.snapshot()))
}
