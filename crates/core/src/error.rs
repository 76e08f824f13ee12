use metro_decode::DecodeError;
use metro_engine::EngineError;

/// Category passed to the error handler alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    AudioDevice,
    InvalidCommand,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Decode => "decode",
            ErrorKind::AudioDevice => "audio device",
            ErrorKind::InvalidCommand => "invalid command",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the player. None of them are fatal: the player stays
/// usable in `Stopped`.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("audio device error: {0}")]
    AudioDevice(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::Decode(_) => ErrorKind::Decode,
            PlayerError::AudioDevice(_) => ErrorKind::AudioDevice,
            PlayerError::InvalidCommand(_) => ErrorKind::InvalidCommand,
        }
    }
}

impl From<EngineError> for PlayerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AudioDevice(msg) => PlayerError::AudioDevice(msg),
            EngineError::SeekWhilePlaying => PlayerError::InvalidCommand(err.to_string()),
        }
    }
}
