use std::ffi::CString;

use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::stream::StreamMut;
use ffmpeg_next::codec::Codec;
use ffmpeg_next::{ChannelLayout, Packet, Rational, codec, ffi, format::Pixel, frame};

use crate::container::ContainerSession;
use crate::error::{Error, Result};
use crate::options::{GOP_SIZE, StreamOptions};
use crate::raster::Raster;
use crate::scaler::Geometry;
use crate::stream::{MediaKind, StreamCodec, StreamSession};

/// Samples per frame for audio encoders that accept any frame size.
const DEFAULT_AUDIO_FRAME: u32 = 1024;

enum EncoderType {
    Video {
        encoder: ffmpeg_next::encoder::Video,
        frame: frame::Video,
    },
    Audio {
        encoder: ffmpeg_next::encoder::Audio,
        frame: frame::Audio,
    },
}

impl EncoderType {
    /// Stamps the next pts on the staged frame and submits it.
    fn send_next_frame(&mut self) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            EncoderType::Video { encoder, frame } => {
                let pts = frame.pts().map_or(1, |pts| pts + 1);
                frame.set_pts(Some(pts));
                encoder.send_frame(frame)
            }
            EncoderType::Audio { encoder, frame } => {
                let pts = frame.pts().map_or(0, |pts| pts + frame.samples() as i64);
                frame.set_pts(Some(pts));
                encoder.send_frame(frame)
            }
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        match self {
            EncoderType::Video { encoder, .. } => encoder.send_eof()?,
            EncoderType::Audio { encoder, .. } => encoder.send_eof()?,
        }
        Ok(())
    }

    /// `Ok(false)` when the encoder holds no finished packet.
    fn receive_packet(&mut self, packet: &mut Packet) -> Result<bool> {
        let result = match self {
            EncoderType::Video { encoder, .. } => encoder.receive_packet(packet),
            EncoderType::Audio { encoder, .. } => encoder.receive_packet(packet),
        };
        match result {
            Ok(()) => Ok(true),
            Err(ffmpeg_next::Error::Eof) => Ok(false),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Encoder of a write-mode stream. Owns the frame that images and samples are
/// staged into and a scratch packet reused for every write.
pub struct Encoder {
    inner: EncoderType,
    time_base: Rational,
    frame_size: u32,
    scratch: Packet,
}

impl Encoder {
    pub(crate) fn open(
        codec: Codec,
        kind: MediaKind,
        options: &StreamOptions,
        global_header: bool,
    ) -> Result<Self> {
        let unable = |e: ffmpeg_next::Error| {
            Error::codec(format!("unable to open codec '{}': {}", codec.name(), e))
        };
        let encoder_ctx = codec::context::Context::new_with_codec(codec);

        let (inner, time_base, frame_size) = match kind {
            MediaKind::Video => {
                if options.width == 0 || options.height == 0 {
                    return Err(Error::config("video width and height must be positive"));
                }
                let time_base = frame_time_base(options.frame_rate)?;
                let pixel = match options.pixel_format.as_deref() {
                    Some(name) => pixel_format(name)?,
                    None => codec
                        .video()?
                        .formats()
                        .and_then(|mut formats| formats.next())
                        .ok_or_else(|| Error::codec(format!("{} lists no pixel formats", codec.name())))?,
                };

                let mut encoder = encoder_ctx.encoder().video()?;
                encoder.set_width(options.width);
                encoder.set_height(options.height);
                encoder.set_format(pixel);
                encoder.set_time_base(time_base);
                encoder.set_frame_rate(Some(time_base.invert()));
                encoder.set_gop(GOP_SIZE);
                if let Some(bit_rate) = options.bit_rate {
                    encoder.set_bit_rate(bit_rate as usize);
                }
                if global_header {
                    encoder.set_flags(codec::Flags::GLOBAL_HEADER);
                }
                let encoder = encoder.open_as(codec).map_err(unable)?;
                let frame = frame::Video::new(pixel, options.width, options.height);
                (EncoderType::Video { encoder, frame }, time_base, 0)
            }
            MediaKind::Audio => {
                if options.sample_rate == 0 {
                    return Err(Error::config("sample rate must be positive"));
                }
                let rate = options.sample_rate as i32;
                let sample = codec
                    .audio()?
                    .formats()
                    .and_then(|mut formats| formats.next())
                    .ok_or_else(|| Error::codec(format!("{} lists no sample formats", codec.name())))?;
                let layout = match options.channels {
                    1 => ChannelLayout::MONO,
                    _ => ChannelLayout::STEREO,
                };
                let time_base = Rational::new(1, rate);

                let mut encoder = encoder_ctx.encoder().audio()?;
                encoder.set_rate(rate);
                encoder.set_format(sample);
                encoder.set_channel_layout(layout);
                encoder.set_time_base(time_base);
                if let Some(bit_rate) = options.bit_rate {
                    encoder.set_bit_rate(bit_rate as usize);
                }
                if global_header {
                    encoder.set_flags(codec::Flags::GLOBAL_HEADER);
                }
                let encoder = encoder.open_as(codec).map_err(unable)?;
                let frame_size = encoder.frame_size();
                let samples = if frame_size > 0 { frame_size } else { DEFAULT_AUDIO_FRAME };
                let mut frame = frame::Audio::new(sample, samples as usize, layout);
                frame.set_rate(options.sample_rate);
                for plane in 0..frame.planes() {
                    frame.data_mut(plane).fill(0);
                }
                (EncoderType::Audio { encoder, frame }, time_base, frame_size)
            }
            MediaKind::Subtitle => return Err(Error::unsupported("subtitle encoding")),
        };

        Ok(Self {
            inner,
            time_base,
            frame_size,
            scratch: Packet::empty(),
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn geometry(&self) -> Option<Geometry> {
        match &self.inner {
            EncoderType::Video { frame, .. } => Some(Geometry::of(frame)),
            EncoderType::Audio { .. } => None,
        }
    }

    pub(crate) fn configure_stream(&self, ost: &mut StreamMut) {
        match &self.inner {
            EncoderType::Video { encoder, .. } => ost.set_parameters(encoder),
            EncoderType::Audio { encoder, .. } => ost.set_parameters(encoder),
        }
        ost.set_time_base(self.time_base);
    }

    /// The staged video frame, made safe to overwrite even while the encoder
    /// still references the previous picture.
    fn writable_video_frame(&mut self) -> Result<&mut frame::Video> {
        let EncoderType::Video { frame, .. } = &mut self.inner else {
            return Err(Error::unsupported("image transfer on a non-video stream"));
        };
        let ret = unsafe { ffi::av_frame_make_writable(frame.as_mut_ptr()) };
        if ret < 0 {
            return Err(ffmpeg_next::Error::from(ret).into());
        }
        Ok(frame)
    }

    fn encode_staged(&mut self, output: &mut Output, index: usize) -> Result<usize> {
        match self.inner.send_next_frame() {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                self.write_packets(output, index)?;
                self.inner.send_next_frame()?;
            }
            Err(err) => return Err(err.into()),
        }
        self.write_packets(output, index)
    }

    /// Moves every finished packet into the container.
    fn write_packets(&mut self, output: &mut Output, index: usize) -> Result<usize> {
        let stream_time_base = output
            .stream(index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| Error::codec(format!("container has no stream {index}")))?;
        let mut written = 0;
        while self.inner.receive_packet(&mut self.scratch)? {
            if self.scratch.pts().is_some() {
                self.scratch.rescale_ts(self.time_base, stream_time_base);
            }
            self.scratch.set_stream(index);
            self.scratch.set_position(-1);
            self.scratch.write_interleaved(output)?;
            written += 1;
        }
        Ok(written)
    }

    /// Signals end of stream and writes out everything the encoder buffered.
    pub(crate) fn flush(&mut self, output: &mut Output, index: usize) -> Result<usize> {
        self.inner.send_eof()?;
        let written = self.write_packets(output, index)?;
        log::debug!("stream {}: flushed {} packets", index, written);
        Ok(written)
    }
}

impl ContainerSession {
    /// Encodes the staged frame of stream `index` and writes whatever packets
    /// the encoder releases. The container header goes out on the first call.
    /// A packet-less call (encoder still buffering) is not an error.
    pub fn encode_next(&mut self, index: usize) -> Result<bool> {
        if !matches!(self.stream_mut(index)?.codec, StreamCodec::Encoder(_)) {
            return Err(Error::config(format!("stream {index} is not open for writing")));
        }
        self.ensure_header()?;
        let (output, stream) = self.output_and_stream(index)?;
        let StreamCodec::Encoder(encoder) = &mut stream.codec else {
            return Err(Error::config(format!("stream {index} is not open for writing")));
        };
        let written = encoder.encode_staged(output, index)?;
        log::trace!("stream {}: frame {} produced {} packets", index, stream.units, written);
        stream.advance_clock();
        Ok(true)
    }

    /// Converts `image` into the codec's pixel format and encodes it as the
    /// next frame of stream `index`.
    pub fn write_image<R: Raster + ?Sized>(&mut self, index: usize, image: &R) -> Result<()> {
        let stream = self.stream_mut(index)?;
        if stream.kind != MediaKind::Video {
            return Err(Error::unsupported("image transfer on a non-video stream"));
        }
        let StreamSession { codec, bridge, .. } = stream;
        let StreamCodec::Encoder(encoder) = codec else {
            return Err(Error::config(format!("stream {index} is not open for writing")));
        };
        bridge.from_image(image, encoder.writable_video_frame()?)?;
        self.encode_next(index)?;
        Ok(())
    }
}

/// Codec time base for a frame rate, as the closest fraction with terms up to
/// 255.
pub fn frame_time_base(frame_rate: f64) -> Result<Rational> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(Error::config(format!("invalid frame rate: {frame_rate}")));
    }
    let rational = unsafe { ffi::av_d2q(1.0 / frame_rate, 255) };
    Ok(Rational::from(rational))
}

/// Looks up a pixel format by its engine name, e.g. "yuv420p" or "rgba".
pub fn pixel_format(name: &str) -> Result<Pixel> {
    let cname = CString::new(name).map_err(|_| Error::config(format!("invalid pixel format: {name:?}")))?;
    let pixel = Pixel::from(unsafe { ffi::av_get_pix_fmt(cname.as_ptr()) });
    if pixel == Pixel::None {
        return Err(Error::config(format!("unknown pixel format: {name}")));
    }
    Ok(pixel)
}
