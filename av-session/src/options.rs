//! Caller-supplied options for containers and streams.
//!
//! Both structs deserialize from a loose key/value map (missing keys take
//! their defaults, unknown keys are ignored), so callers holding a JSON object
//! can pass it through [`ContainerOptions::from_value`] /
//! [`StreamOptions::from_value`].

use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_FRAME_RATE: f64 = 24.0;
pub const DEFAULT_WIDTH: u32 = 320;
pub const DEFAULT_HEIGHT: u32 = 240;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u32 = 2;
/// Keyframe interval used for every encoder.
pub const GOP_SIZE: u32 = 25;

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Short output format name, e.g. "mp4" or "nut".
    pub format: Option<String>,
    /// MIME type used when no format name is given.
    pub mime: Option<String>,
}

impl ContainerOptions {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn with_format(format: &str) -> Self {
        Self {
            format: Some(format.to_string()),
            mime: None,
        }
    }

    pub fn with_mime(mime: &str) -> Self {
        Self {
            format: None,
            mime: Some(mime.to_string()),
        }
    }
}

/// Encoder configuration for write-mode streams. Ignored when reading.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    #[serde(rename = "frame rate")]
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    /// Encoder name; defaults to the container's codec for the stream kind.
    pub codec: Option<String>,
    /// Pixel format name; defaults to the encoder's first supported format.
    #[serde(rename = "pixel format")]
    pub pixel_format: Option<String>,
    #[serde(rename = "sample rate")]
    pub sample_rate: u32,
    pub channels: u32,
    #[serde(rename = "bit rate")]
    pub bit_rate: Option<u64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            codec: None,
            pixel_format: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bit_rate: None,
        }
    }
}

impl StreamOptions {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
