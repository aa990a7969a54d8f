//! Error type shared by every session operation.
//!
//! Configuration problems are reported before any state is committed, engine
//! failures abort the current call only. A full packet queue is not an error
//! (the packet is dropped with a warning) and neither is end of stream, which
//! surfaces as `Ok(false)`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad mode string, unresolvable output format, unknown selector, index out
    /// of range and similar caller mistakes.
    #[error("configuration error: {0}")]
    Config(String),

    /// The container could not be opened or its streams could not be probed.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("codec error: {0}")]
    Codec(String),

    /// A negative return from the engine while demuxing, coding or muxing.
    #[error("engine error: {0}")]
    Engine(#[from] ffmpeg_next::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid or released handle")]
    InvalidHandle,

    #[error("malformed options: {0}")]
    Options(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
