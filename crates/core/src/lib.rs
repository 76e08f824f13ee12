pub mod config;
pub mod controller;
pub mod error;

pub use config::{ClickSettings, ConfigError, PlayerConfig};
pub use controller::{ErrorHandler, Snapshot, TransportController, TransportState};
pub use error::{ErrorKind, PlayerError};

pub use metro_decode::{DecodeError, load_click_config, load_track, resolve_path};
pub use metro_engine::{AudioOutput, CpalOutput, OfflineOutput, PlaybackEngine, PositionReader, RunState};
pub use metro_transport::{BeatClock, BeatSnapshot, ClickConfig, ClickKind, SampleBuffer, Status, TimeSignature};
