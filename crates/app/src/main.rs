use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metro_core::{CpalOutput, PlayerConfig, TransportController};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod display;
mod poll;
mod state;

use state::AppState;

/// Music player with a metronome locked to the track.
#[derive(Parser, Debug)]
#[command(name = "metro")]
#[command(version)]
struct Args {
    /// Audio file to play
    track: PathBuf,

    /// Tempo of the track in beats per minute
    #[arg(long)]
    bpm: Option<f64>,

    #[arg(long)]
    beats_per_bar: Option<u32>,

    /// Enable metronome clicks
    #[arg(long)]
    clicks: bool,

    /// Sound played on the first beat of each bar
    #[arg(long)]
    bar_sound: Option<PathBuf>,

    /// Sound played on every other beat
    #[arg(long)]
    beat_sound: Option<PathBuf>,

    /// Status refresh interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Config file to use instead of the default location
    #[arg(long, env = "METRO_CONFIG")]
    config: Option<PathBuf>,

    /// Start playing right away
    #[arg(long)]
    autoplay: bool,

    /// Write the effective settings back to the config file
    #[arg(long)]
    save_config: bool,
}

impl Args {
    fn config(&self) -> Result<PlayerConfig> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::load_from(path)?,
            None => PlayerConfig::load(),
        };

        if let Some(bpm) = self.bpm {
            config.bpm = bpm;
        }
        if let Some(beats_per_bar) = self.beats_per_bar {
            config.beats_per_bar = beats_per_bar;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.snapshot_interval_ms = interval_ms;
        }
        if self.clicks {
            config.clicks.enabled = true;
        }
        if let Some(path) = &self.bar_sound {
            config.clicks.bar_sound = path.clone();
        }
        if let Some(path) = &self.beat_sound {
            config.clicks.beat_sound = path.clone();
        }

        Ok(config.sanitized())
    }
}

/// Click sounds are looked up as given, then next to the track.
fn load_clicks(config: &PlayerConfig, track_dir: &Path, sample_rate: u32) -> Option<metro_core::ClickConfig> {
    let bar = metro_core::resolve_path(&config.clicks.bar_sound, track_dir);
    let beat = metro_core::resolve_path(&config.clicks.beat_sound, track_dir);

    match (bar, beat) {
        (Some(bar), Some(beat)) => {
            metro_core::load_click_config(&bar, &beat, sample_rate, config.clicks.enabled)
        }
        _ => {
            warn!(
                "click sounds {} / {} not found, metronome is silent",
                config.clicks.bar_sound.display(),
                config.clicks.beat_sound.display()
            );
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "metro_app=info,metro_core=info,metro_engine=info,metro_decode=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.config().context("failed to load config")?;
    if args.save_config {
        let saved = match &args.config {
            Some(path) => config.save_to(path).map(|()| path.clone()),
            None => config.save(),
        };
        match saved {
            Ok(path) => info!("saved config to {}", path.display()),
            Err(e) => warn!("{e}"),
        }
    }

    let track = metro_core::load_track(&args.track)
        .with_context(|| format!("failed to load {}", args.track.display()))?;
    info!("{}: {:?} at {} BPM", args.track.display(), track, config.bpm);

    let track_dir = args.track.parent().unwrap_or(Path::new("."));
    let clicks = load_clicks(&config, track_dir, track.sample_rate());

    let output = CpalOutput::new(config.open_timeout());
    let mut controller = TransportController::from_config(track, clicks, &config, Box::new(output));
    controller.set_error_handler(|kind, message| error!("{kind} error: {message}"));
    info!("time signature {}", controller.engine().clock().time_signature());

    if args.autoplay {
        if let Err(e) = controller.play() {
            error!("{e}");
        }
    }

    let state = Arc::new(AppState::new(controller));
    let token = CancellationToken::new();

    info!("{}", commands::HELP);
    let poller = tokio::spawn(poll::run(state.clone(), config.snapshot_interval(), token.clone()));
    let input = tokio::spawn(commands::read_commands(
        state.clone(),
        commands::spawn_stdin_reader(),
        token.clone(),
    ));

    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupted"),
        _ = token.cancelled() => {}
    }
    token.cancel();

    poller.await.context("poll loop panicked")?;
    input.await.context("input task panicked")?;

    state.lock().stop();
    Ok(())
}
