//! Keyboard commands read from stdin, one per line.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use metro_core::{PlayerError, TransportController};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::AppState;

pub const HELP: &str = "commands: p|space play/pause, s <0..1> seek, b scrub begin, \
u <0..1> scrub update, e <0..1> scrub end, o <file> open, c clicks, m beat display, x stop, q quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TogglePlay,
    Seek(f64),
    ScrubBegin,
    ScrubUpdate(f64),
    ScrubEnd(f64),
    Open(PathBuf),
    ToggleClicks,
    ToggleBeatDisplay,
    Stop,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let fraction = |parts: &mut std::str::SplitWhitespace<'_>| -> anyhow::Result<f64> {
            let arg = parts
                .next()
                .with_context(|| format!("'{name}' needs a position between 0 and 1"))?;
            arg.parse::<f64>()
                .with_context(|| format!("'{arg}' is not a position"))
        };

        let command = match name {
            // Empty or blank lines (Enter, space) toggle too.
            "p" | "" => Command::TogglePlay,
            "s" => Command::Seek(fraction(&mut parts)?),
            "b" => Command::ScrubBegin,
            "u" => Command::ScrubUpdate(fraction(&mut parts)?),
            "e" => Command::ScrubEnd(fraction(&mut parts)?),
            "o" => {
                // The rest of the line, so paths may contain spaces.
                let path = line.trim_start()[1..].trim();
                if path.is_empty() {
                    bail!("'o' needs a file to open");
                }
                Command::Open(PathBuf::from(path))
            }
            "c" => Command::ToggleClicks,
            "m" => Command::ToggleBeatDisplay,
            "x" => Command::Stop,
            "q" => Command::Quit,
            other => bail!("unknown command '{other}'"),
        };
        Ok(command)
    }
}

pub fn apply(controller: &mut TransportController, command: Command) -> Result<(), PlayerError> {
    match command {
        Command::TogglePlay => controller.toggle_play_pause()?,
        Command::Seek(fraction) => controller.seek_to_fraction(fraction)?,
        Command::ScrubBegin => controller.scrub_begin(),
        Command::ScrubUpdate(fraction) => controller.scrub_update(fraction)?,
        Command::ScrubEnd(fraction) => controller.scrub_end(fraction)?,
        Command::Open(path) => {
            controller.load_file(&path)?;
            info!("opened {}", path.display());
        }
        Command::ToggleClicks => {
            if !controller.has_clicks() {
                warn!("no click sounds loaded");
                return Ok(());
            }
            let wanted = !controller.clicks_enabled();
            controller.set_clicks_enabled(wanted);
        }
        Command::Stop => controller.stop(),
        // Handled by the front end itself.
        Command::ToggleBeatDisplay | Command::Quit => {}
    }
    Ok(())
}

/// Forward stdin lines from a plain thread.
///
/// Blocking stdin reads cannot be cancelled, so they stay off the runtime; the
/// thread simply dies with the process.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("metro-input".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("failed to read input: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("keyboard input unavailable: {e}");
    }
    rx
}

/// Apply commands until `q`, end of input, or cancellation.
pub async fn read_commands(
    state: Arc<AppState>,
    mut lines: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.recv() => line,
        };

        let Some(line) = line else {
            info!("input closed");
            break;
        };

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                error!("{e:#}");
                info!("{HELP}");
                continue;
            }
        };

        match command {
            Command::Quit => {
                token.cancel();
                break;
            }
            Command::ToggleBeatDisplay => {
                let shown = state.toggle_beat_display();
                info!("beat display {}", if shown { "on" } else { "off" });
                continue;
            }
            _ => {}
        }

        if let Err(e) = apply(&mut state.lock(), command) {
            error!("{e}");
        }
    }
}
