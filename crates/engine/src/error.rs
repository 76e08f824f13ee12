#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("audio device error: {0}")]
    AudioDevice(String),
    #[error("cannot seek while playing")]
    SeekWhilePlaying,
}

impl EngineError {
    pub(crate) fn device(err: impl std::fmt::Display) -> Self {
        Self::AudioDevice(err.to_string())
    }
}
