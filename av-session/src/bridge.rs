//! Moves pixels between a [`Raster`] and the codec's video frames.
//!
//! The bridge keeps an RGBA picture sized to the external image and a scaler
//! between that picture and the codec geometry. Both are rebuilt only when the
//! image dimensions (or the codec side of the conversion) change.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;

use crate::error::{Error, Result};
use crate::raster::{ALPHA_MAX, Raster, TrueColor};
use crate::scaler::{Geometry, Scaler};

/// Layout of the intermediate picture.
pub const RASTER_FORMAT: Pixel = Pixel::RGBA;

#[derive(Default)]
pub struct PixelBridge {
    picture: Option<Video>,
    scaler: Option<Scaler>,
    allocations: u64,
}

impl PixelBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the intermediate picture has been (re)allocated.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn picture_size(&self) -> Option<(u32, u32)> {
        self.picture.as_ref().map(|p| (p.width(), p.height()))
    }

    /// Packs `image` into the RGBA picture and converts it into `dst`, which
    /// must already be allocated in the codec's format and size.
    pub fn from_image<R: Raster + ?Sized>(&mut self, image: &R, dst: &mut Video) -> Result<()> {
        let (width, height) = image_size(image)?;
        let raster = Geometry::new(RASTER_FORMAT, width, height);
        self.prepare(raster, raster, Geometry::of(dst))?;

        let (Some(picture), Some(scaler)) = (self.picture.as_mut(), self.scaler.as_mut()) else {
            return Err(Error::codec("picture buffer not allocated"));
        };
        let stride = picture.stride(0);
        let data = picture.data_mut(0);
        for y in 0..height {
            let row = &mut data[y as usize * stride..][..width as usize * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&pack_pixel(image.pixel(x as u32, y)));
            }
        }
        scaler.run(picture, dst)
    }

    /// Converts the decoded frame `src` into the RGBA picture and unpacks it
    /// into `image`.
    pub fn to_image<R: Raster + ?Sized>(&mut self, src: &Video, image: &mut R) -> Result<()> {
        let (width, height) = image_size(image)?;
        let raster = Geometry::new(RASTER_FORMAT, width, height);
        self.prepare(raster, Geometry::of(src), raster)?;

        let (Some(picture), Some(scaler)) = (self.picture.as_mut(), self.scaler.as_mut()) else {
            return Err(Error::codec("picture buffer not allocated"));
        };
        scaler.run(src, picture)?;

        let stride = picture.stride(0);
        let data = picture.data(0);
        for y in 0..height {
            let row = &data[y as usize * stride..][..width as usize * 4];
            for (x, px) in row.chunks_exact(4).enumerate() {
                image.set_pixel(x as u32, y, unpack_pixel([px[0], px[1], px[2], px[3]]));
            }
        }
        Ok(())
    }

    fn prepare(&mut self, raster: Geometry, src: Geometry, dst: Geometry) -> Result<()> {
        let resized = self
            .picture
            .as_ref()
            .is_none_or(|p| p.width() != raster.width || p.height() != raster.height);
        if resized {
            self.release();
            self.picture = Some(Video::new(RASTER_FORMAT, raster.width, raster.height));
            self.allocations += 1;
        }

        if !self.scaler.as_ref().is_some_and(|s| s.matches(src, dst)) {
            self.scaler = None;
            match Scaler::new(src, dst) {
                Ok(scaler) => self.scaler = Some(scaler),
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        self.picture = None;
        self.scaler = None;
    }
}

fn image_size<R: Raster + ?Sized>(image: &R) -> Result<(u32, u32)> {
    match (image.width(), image.height()) {
        (0, _) | (_, 0) => Err(Error::config("image has zero dimensions")),
        size => Ok(size),
    }
}

/// RGBA bytes fed to the scaler: inverted 7-bit alpha becomes a doubled
/// opacity.
pub fn pack_pixel(color: TrueColor) -> [u8; 4] {
    let opacity = ALPHA_MAX - color.alpha.min(ALPHA_MAX);
    [color.red, color.green, color.blue, opacity << 1]
}

pub fn unpack_pixel([red, green, blue, opacity]: [u8; 4]) -> TrueColor {
    TrueColor::new(red, green, blue, ALPHA_MAX - (opacity >> 1))
}
