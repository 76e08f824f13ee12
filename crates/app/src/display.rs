//! Text rendering of controller snapshots for the terminal.

use metro_core::{Snapshot, TransportState};

const METER_WIDTH: usize = 8;

/// `m:ss.t` with tenths of a second.
pub fn format_clock(seconds: f64) -> String {
    let tenths = (seconds.max(0.0) * 10.0).floor() as u64;
    let minutes = tenths / 600;
    let secs = (tenths % 600) / 10;
    format!("{minutes}:{secs:02}.{}", tenths % 10)
}

fn state_label(state: TransportState) -> &'static str {
    match state {
        TransportState::Stopped => "stopped",
        TransportState::Playing => "playing",
        TransportState::Paused => "paused",
        TransportState::Scrubbing => "scrubbing",
    }
}

/// Fill a fixed-width meter with how far we are into the current beat.
fn beat_meter(progress: f64) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * METER_WIDTH as f64) as usize).min(METER_WIDTH);
    format!("{}{}", "#".repeat(filled), "-".repeat(METER_WIDTH - filled))
}

/// One line of status. The beat readout is left out when `show_beat` is false.
pub fn status_line(snapshot: &Snapshot, show_beat: bool) -> String {
    let times = format!(
        "{} / {}",
        format_clock(snapshot.elapsed_seconds),
        format_clock(snapshot.total_seconds)
    );
    let beat = if show_beat {
        format!(
            "  {:>7}  [{}]  next beat in {:>6} samples",
            snapshot.beat.to_string(),
            beat_meter(snapshot.beat.progress_within_beat),
            snapshot.beat.samples_until_next_beat,
        )
    } else {
        String::new()
    };

    format!(
        "{times}{beat}  {:<9}  clicks {}",
        state_label(snapshot.state),
        if snapshot.clicks_enabled { "on" } else { "off" },
    )
}
