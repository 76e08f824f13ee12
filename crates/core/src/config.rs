use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

const MIN_SNAPSHOT_INTERVAL_MS: u64 = 50;
const MAX_SNAPSHOT_INTERVAL_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no config directory on this system")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickSettings {
    pub enabled: bool,
    pub bar_sound: PathBuf,
    pub beat_sound: PathBuf,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bar_sound: PathBuf::from("bar.wav"),
            beat_sound: PathBuf::from("beat.wav"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub snapshot_interval_ms: u64,
    pub open_timeout_ms: u64,
    pub clicks: ClickSettings,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            bpm: 128.0,
            beats_per_bar: 4,
            snapshot_interval_ms: 100,
            open_timeout_ms: 2000,
            clicks: ClickSettings::default(),
        }
    }
}

impl PlayerConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("metro").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults on any problem.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded config from {}", path.display());
        Ok(config.sanitized())
    }

    /// Write to the default location and return where it went.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(write_err)?;
        debug!("saved config to {}", path.display());
        Ok(())
    }

    /// Replace out-of-range values with usable ones.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            warn!("bpm {} is not usable, using {}", self.bpm, defaults.bpm);
            self.bpm = defaults.bpm;
        }
        if self.beats_per_bar == 0 {
            self.beats_per_bar = defaults.beats_per_bar;
        }
        self.snapshot_interval_ms = self
            .snapshot_interval_ms
            .clamp(MIN_SNAPSHOT_INTERVAL_MS, MAX_SNAPSHOT_INTERVAL_MS);
        if self.open_timeout_ms == 0 {
            self.open_timeout_ms = defaults.open_timeout_ms;
        }
        self
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}
