use std::time::Duration;

use thiserror::Error;

/// All errors produced by soundtrap-core.
#[derive(Debug, Error)]
pub enum SoundtrapError {
    #[error("sample source unavailable: {0}")]
    SourceUnavailable(String),

    /// A block arrived whose timestamp is not after the newest buffered block.
    /// Offsets are relative to the first block the capturer ever saw.
    #[error("out-of-order sample block: newest={newest:?} received={received:?}")]
    OutOfOrderSample { newest: Duration, received: Duration },

    #[error("sample block is empty")]
    EmptyBlock,

    #[error("segment encode failed: {0}")]
    Encode(String),

    #[error("segment transport failed: {0}")]
    Transport(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SoundtrapError {
    /// `true` for errors raised by an encoder or transport sink.
    pub fn is_sink_failure(&self) -> bool {
        matches!(self, SoundtrapError::Encode(_) | SoundtrapError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, SoundtrapError>;
