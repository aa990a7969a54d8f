//! Raster images exchanged with video streams.
//!
//! Pixels are true-color RGB with a 7-bit alpha channel on an inverted scale:
//! `0` is fully opaque and [`ALPHA_MAX`] fully transparent.

/// Fully transparent alpha value.
pub const ALPHA_MAX: u8 = 127;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrueColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// 0 (opaque) ..= [`ALPHA_MAX`] (transparent).
    pub alpha: u8,
}

impl TrueColor {
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub const fn opaque(red: u8, green: u8, blue: u8) -> Self {
        Self::new(red, green, blue, 0)
    }

    /// Decodes the packed `0xAARRGGBB` layout, alpha in the top 7 bits' range.
    pub fn from_packed(value: i32) -> Self {
        let value = value as u32;
        Self {
            red: ((value >> 16) & 0xff) as u8,
            green: ((value >> 8) & 0xff) as u8,
            blue: (value & 0xff) as u8,
            alpha: ((value >> 24) & 0x7f) as u8,
        }
    }

    pub fn packed(self) -> i32 {
        ((self.alpha.min(ALPHA_MAX) as i32) << 24)
            | ((self.red as i32) << 16)
            | ((self.green as i32) << 8)
            | self.blue as i32
    }
}

/// A true-color pixel buffer addressed row-major from the top-left corner.
pub trait Raster {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn pixel(&self, x: u32, y: u32) -> TrueColor;
    fn set_pixel(&mut self, x: u32, y: u32, color: TrueColor);
}

/// Packed-integer image, one `i32` per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrueColorImage {
    width: u32,
    height: u32,
    pixels: Vec<i32>,
}

impl TrueColorImage {
    /// Creates an opaque black image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> TrueColor) -> Self {
        let mut image = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                image.set_pixel(x, y, f(x, y));
            }
        }
        image
    }

    pub fn row(&self, y: u32) -> &[i32] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }

    /// Flattens into 8-bit RGBA with a conventional (255 = opaque) alpha.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for &value in &self.pixels {
            let color = TrueColor::from_packed(value);
            out.extend_from_slice(&[
                color.red,
                color.green,
                color.blue,
                alpha_to_u8(color.alpha),
            ]);
        }
        out
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl Raster for TrueColorImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel(&self, x: u32, y: u32) -> TrueColor {
        TrueColor::from_packed(self.pixels[self.offset(x, y)])
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: TrueColor) {
        let offset = self.offset(x, y);
        self.pixels[offset] = color.packed();
    }
}

impl Raster for image::RgbaImage {
    fn width(&self) -> u32 {
        image::RgbaImage::width(self)
    }

    fn height(&self) -> u32 {
        image::RgbaImage::height(self)
    }

    fn pixel(&self, x: u32, y: u32) -> TrueColor {
        let [red, green, blue, alpha] = self.get_pixel(x, y).0;
        TrueColor::new(red, green, blue, alpha_from_u8(alpha))
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: TrueColor) {
        self.put_pixel(
            x,
            y,
            image::Rgba([color.red, color.green, color.blue, alpha_to_u8(color.alpha)]),
        );
    }
}

/// Maps a conventional 0..=255 opacity to the inverted 0..=127 scale.
fn alpha_from_u8(alpha: u8) -> u8 {
    ALPHA_MAX - ((alpha as u16 * ALPHA_MAX as u16 + 127) / 255) as u8
}

fn alpha_to_u8(alpha: u8) -> u8 {
    let opacity = (ALPHA_MAX - alpha.min(ALPHA_MAX)) as u16;
    ((opacity * 255 + 63) / ALPHA_MAX as u16) as u8
}
