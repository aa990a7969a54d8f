use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};

use crate::error::Result;

/// Pixel format plus resolution of one side of a conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub format: Pixel,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(format: Pixel, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn of(frame: &ffmpeg_next::frame::Video) -> Self {
        Self::new(frame.format(), frame.width(), frame.height())
    }
}

/// Conversion context built once for a fixed source/destination pair.
pub struct Scaler {
    context: Context,
    src: Geometry,
    dst: Geometry,
}

impl Scaler {
    pub fn new(src: Geometry, dst: Geometry) -> Result<Self> {
        let context = Context::get(
            src.format,
            src.width,
            src.height,
            dst.format,
            dst.width,
            dst.height,
            Flags::FAST_BILINEAR,
        )?;
        log::debug!("scaler built: {:?} -> {:?}", src, dst);
        Ok(Self { context, src, dst })
    }

    pub fn matches(&self, src: Geometry, dst: Geometry) -> bool {
        self.src == src && self.dst == dst
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}
