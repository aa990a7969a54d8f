//! Session-oriented frame access to media containers.
//!
//! A [`SessionTable`] opens containers for reading or writing, opens streams
//! inside them, and moves decoded frames in and out as raster images. All
//! calls run to completion on the caller's thread.

pub mod bridge;
pub mod container;
pub mod decoder;
mod demux;
pub mod encoder;
pub mod error;
pub mod metadata;
pub mod options;
pub mod packet;
pub mod raster;
pub mod scaler;
pub mod session;
pub mod stream;

pub use container::{ContainerSession, OpenMode};
pub use error::{Error, Result};
pub use metadata::{MediaInfo, StreamInfo};
pub use options::{ContainerOptions, StreamOptions};
pub use raster::{Raster, TrueColor, TrueColorImage};
pub use session::{ContainerHandle, SessionTable, StreamHandle};
pub use stream::{MediaKind, StreamSelector, StreamSession};

/// Registers the engine's formats and codecs. Safe to call more than once.
pub fn init() -> Result<()> {
    ffmpeg_next::init()?;
    Ok(())
}
