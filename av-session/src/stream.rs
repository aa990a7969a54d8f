//! Per-stream session state: which media the stream carries, its codec, its
//! packet queue and the running frame clock.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ffmpeg_next::format::context::{Input, Output};
use ffmpeg_next::format::stream::Stream;
use ffmpeg_next::{Rational, encoder, media};

use crate::bridge::PixelBridge;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::options::StreamOptions;
use crate::packet::PacketBuffer;
use crate::scaler::Geometry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "subtitle" => Ok(MediaKind::Subtitle),
            other => Err(Error::config(format!("unknown stream type: {other}"))),
        }
    }
}

impl From<MediaKind> for media::Type {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => media::Type::Video,
            MediaKind::Audio => media::Type::Audio,
            MediaKind::Subtitle => media::Type::Subtitle,
        }
    }
}

impl TryFrom<media::Type> for MediaKind {
    type Error = Error;

    fn try_from(medium: media::Type) -> Result<Self> {
        match medium {
            media::Type::Video => Ok(MediaKind::Video),
            media::Type::Audio => Ok(MediaKind::Audio),
            media::Type::Subtitle => Ok(MediaKind::Subtitle),
            other => Err(Error::unsupported(format!("{other:?} streams"))),
        }
    }
}

/// Chooses the stream to open: the best stream of a kind, or an explicit index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSelector {
    Kind(MediaKind),
    Index(usize),
}

impl From<MediaKind> for StreamSelector {
    fn from(kind: MediaKind) -> Self {
        StreamSelector::Kind(kind)
    }
}

impl From<usize> for StreamSelector {
    fn from(index: usize) -> Self {
        StreamSelector::Index(index)
    }
}

impl FromStr for StreamSelector {
    type Err = Error;

    /// Digits select by index, anything else must name a media kind.
    fn from_str(s: &str) -> Result<Self> {
        match s.parse::<usize>() {
            Ok(index) => Ok(StreamSelector::Index(index)),
            Err(_) => s.parse().map(StreamSelector::Kind),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Decode,
    Encode,
}

/// The opened codec of a stream. Read-mode streams decode, write-mode streams
/// encode.
pub enum StreamCodec {
    Decoder(Decoder),
    Encoder(Encoder),
}

pub struct StreamSession {
    pub(crate) index: usize,
    pub(crate) kind: MediaKind,
    pub(crate) codec: StreamCodec,
    pub(crate) packets: PacketBuffer,
    /// Bytes of the head packet not yet handed to the decoder.
    pub(crate) packet_bytes_remaining: usize,
    pub(crate) bridge: PixelBridge,
    pub(crate) time_unit: f64,
    pub(crate) duration: f64,
    pub(crate) frame_time: f64,
    pub(crate) units: u64,
}

impl StreamSession {
    fn new(index: usize, kind: MediaKind, codec: StreamCodec, time_unit: f64, duration: f64) -> Self {
        Self {
            index,
            kind,
            codec,
            packets: PacketBuffer::default(),
            packet_bytes_remaining: 0,
            bridge: PixelBridge::new(),
            time_unit,
            duration,
            frame_time: 0.0,
            units: 0,
        }
    }

    /// Opens a decoder for stream `index` of `input`.
    pub(crate) fn open_decoder(input: &Input, index: usize) -> Result<Self> {
        let stream = input
            .stream(index)
            .ok_or_else(|| Error::config(format!("no stream at index {index}")))?;
        let kind = MediaKind::try_from(stream.parameters().medium())?;
        let time_base = decoder_time_base(&stream, kind);
        let decoder = Decoder::open(&stream, kind, time_base)?;
        let time_unit = time_unit(decoder.frame_size(), time_base);
        let duration = stream_duration(stream.duration(), time_unit);

        log::debug!(
            "opened {} decoder for stream {}: time unit {:.6}s, duration {:.3}s",
            kind,
            index,
            time_unit,
            duration
        );
        Ok(Self::new(index, kind, StreamCodec::Decoder(decoder), time_unit, duration))
    }

    /// Configures and opens an encoder, then registers a matching stream on
    /// `output`. Nothing is added to the container if the encoder fails to
    /// open.
    pub(crate) fn open_encoder(
        output: &mut Output,
        path: &Path,
        kind: MediaKind,
        options: &StreamOptions,
    ) -> Result<Self> {
        let format = output.format();
        let codec = match options.codec.as_deref() {
            Some(name) => encoder::find_by_name(name)
                .ok_or_else(|| Error::config(format!("encoder not found: {name}")))?,
            None => {
                let id = format.codec(&path, kind.into());
                encoder::find(id).ok_or_else(|| {
                    Error::codec(format!("no {} encoder for format {}", kind, format.name()))
                })?
            }
        };
        if codec.medium() != media::Type::from(kind) {
            return Err(Error::config(format!(
                "codec {} cannot encode {} streams",
                codec.name(),
                kind
            )));
        }

        let global_header = format
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);
        let encoder = Encoder::open(codec, kind, options, global_header)?;

        let mut ost = output.add_stream(codec)?;
        let index = ost.index();
        encoder.configure_stream(&mut ost);

        let time_unit = time_unit(encoder.frame_size(), encoder.time_base());
        log::debug!(
            "opened {} encoder {} for stream {}: time unit {:.6}s",
            kind,
            codec.name(),
            index,
            time_unit
        );
        Ok(Self::new(index, kind, StreamCodec::Encoder(encoder), time_unit, 0.0))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        match self.codec {
            StreamCodec::Decoder(_) => Direction::Decode,
            StreamCodec::Encoder(_) => Direction::Encode,
        }
    }

    /// Seconds covered by one decoded or encoded unit.
    pub fn time_unit(&self) -> f64 {
        self.time_unit
    }

    /// Stream length in seconds, 0 when the container does not know it.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Presentation time in seconds of the last unit moved through the codec.
    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    pub fn frame_count(&self) -> u64 {
        self.units
    }

    /// Codec-side pixel format and size of a video stream.
    pub fn geometry(&self) -> Option<Geometry> {
        match &self.codec {
            StreamCodec::Decoder(decoder) => decoder.geometry(),
            StreamCodec::Encoder(encoder) => encoder.geometry(),
        }
    }

    pub fn queued_packets(&self) -> usize {
        self.packets.len()
    }

    pub fn bridge(&self) -> &PixelBridge {
        &self.bridge
    }

    pub(crate) fn advance_clock(&mut self) {
        self.units += 1;
        self.frame_time = self.units as f64 * self.time_unit;
    }
}

/// Decoder clock: one tick per frame for video, per sample for audio, falling
/// back to the stream's own time base.
fn decoder_time_base(stream: &Stream, kind: MediaKind) -> Rational {
    let rate = match kind {
        MediaKind::Video => stream.avg_frame_rate(),
        MediaKind::Audio => Rational::new(sample_rate(stream), 1),
        MediaKind::Subtitle => Rational::new(0, 1),
    };
    if rate.numerator() > 0 && rate.denominator() > 0 {
        rate.invert()
    } else {
        stream.time_base()
    }
}

fn sample_rate(stream: &Stream) -> i32 {
    unsafe {
        let ptr = stream.parameters().as_ptr();
        (*ptr).sample_rate
    }
}

/// Seconds per coded unit: a full frame of samples when the codec has a fixed
/// frame size, a single tick otherwise.
pub fn time_unit(frame_size: u32, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    let tick = f64::from(time_base);
    if frame_size > 0 {
        frame_size as f64 * tick
    } else {
        tick
    }
}

/// Stream duration in seconds for a duration of `duration` ticks lasting
/// `tick` seconds each, 0 if unknown.
pub fn stream_duration(duration: i64, tick: f64) -> f64 {
    if duration <= 0 || duration == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || !tick.is_finite() {
        return 0.0;
    }
    duration as f64 * tick
}
