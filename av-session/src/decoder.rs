use ffmpeg_next::format::stream::Stream;
use ffmpeg_next::{Packet, Rational, codec, frame};

use crate::container::ContainerSession;
use crate::error::{Error, Result};
use crate::raster::Raster;
use crate::scaler::Geometry;
use crate::stream::{MediaKind, StreamCodec, StreamSession};

enum DecoderType {
    Video {
        decoder: ffmpeg_next::decoder::Video,
        frame: frame::Video,
    },
    Audio {
        decoder: ffmpeg_next::decoder::Audio,
        frame: frame::Audio,
    },
    /// Opened so the stream can be claimed, but decoding is not implemented.
    Subtitle(ffmpeg_next::decoder::Subtitle),
}

impl DecoderType {
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video { decoder, .. } => decoder.send_packet(packet),
            DecoderType::Audio { decoder, .. } => decoder.send_packet(packet),
            DecoderType::Subtitle(_) => Ok(()),
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        match self {
            DecoderType::Video { decoder, .. } => decoder.send_eof()?,
            DecoderType::Audio { decoder, .. } => decoder.send_eof()?,
            DecoderType::Subtitle(_) => {}
        }
        Ok(())
    }

    /// `Ok(false)` when the decoder needs more input or is fully drained.
    fn receive_frame(&mut self) -> Result<bool> {
        let result = match self {
            DecoderType::Video { decoder, frame } => decoder.receive_frame(frame),
            DecoderType::Audio { decoder, frame } => decoder.receive_frame(frame),
            DecoderType::Subtitle(_) => return Err(Error::unsupported("subtitle decoding")),
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

/// Decoder of a read-mode stream. Keeps the last decoded frame around so it
/// can be handed to the pixel bridge.
pub struct Decoder {
    inner: DecoderType,
    time_base: Rational,
    frame_size: u32,
    eof_sent: bool,
}

impl Decoder {
    pub(crate) fn open(stream: &Stream, kind: MediaKind, time_base: Rational) -> Result<Self> {
        let mut decoder_ctx = codec::context::Context::from_parameters(stream.parameters())?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = time_base.into();
        }
        let codec_name = decoder_ctx.id().name();
        let unable = |e: ffmpeg_next::Error| Error::codec(format!("unable to open codec '{codec_name}': {e}"));

        let inner = match kind {
            MediaKind::Video => DecoderType::Video {
                decoder: decoder_ctx.decoder().video().map_err(unable)?,
                frame: frame::Video::empty(),
            },
            MediaKind::Audio => DecoderType::Audio {
                decoder: decoder_ctx.decoder().audio().map_err(unable)?,
                frame: frame::Audio::empty(),
            },
            MediaKind::Subtitle => DecoderType::Subtitle(decoder_ctx.decoder().subtitle().map_err(unable)?),
        };
        let frame_size = match &inner {
            DecoderType::Audio { decoder, .. } => decoder.frame_size(),
            _ => 0,
        };

        Ok(Self {
            inner,
            time_base,
            frame_size,
            eof_sent: false,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Fixed samples per frame for audio codecs that declare one, else 0.
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Pixel format and size the codec decodes to, for video streams.
    pub fn geometry(&self) -> Option<Geometry> {
        match &self.inner {
            DecoderType::Video { decoder, .. } => {
                Some(Geometry::new(decoder.format(), decoder.width(), decoder.height()))
            }
            _ => None,
        }
    }

    pub fn video_frame(&self) -> Option<&frame::Video> {
        match &self.inner {
            DecoderType::Video { frame, .. } => Some(frame),
            _ => None,
        }
    }

    pub fn audio_frame(&self) -> Option<&frame::Audio> {
        match &self.inner {
            DecoderType::Audio { frame, .. } => Some(frame),
            _ => None,
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        if !self.eof_sent {
            self.inner.send_eof()?;
            self.eof_sent = true;
            log::debug!("decoder drained to end of stream");
        }
        Ok(())
    }
}

impl ContainerSession {
    /// Decodes the next whole frame of stream `index`, pulling packets from
    /// the container as needed. `Ok(false)` once the stream is exhausted and
    /// the decoder fully drained.
    pub fn decode_next(&mut self, index: usize) -> Result<bool> {
        loop {
            let stream = self.stream_mut(index)?;
            let StreamSession {
                codec,
                packets,
                packet_bytes_remaining,
                ..
            } = stream;
            let StreamCodec::Decoder(decoder) = codec else {
                return Err(Error::config(format!("stream {index} is not open for reading")));
            };

            if decoder.inner.receive_frame()? {
                stream.advance_clock();
                return Ok(true);
            }
            if decoder.eof_sent {
                return Ok(false);
            }

            // empty packets would read as a flush request
            while packets.front().is_some_and(|p| p.size() == 0) {
                packets.pop();
            }

            if packets.is_empty() {
                if !self.pull(index)? {
                    self.decoder_mut(index)?.send_eof()?;
                    continue;
                }
                let stream = self.stream_mut(index)?;
                stream.packet_bytes_remaining = stream.packets.front().map_or(0, |p| p.size());
                continue;
            }

            let Some(packet) = packets.front() else {
                continue;
            };
            match decoder.inner.send_packet(packet) {
                Ok(()) => {
                    *packet_bytes_remaining = 0;
                    packets.pop();
                }
                // the decoder has frames pending; collect them first
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {}
                Err(err) => {
                    log::warn!("stream {}: dropping undecodable packet: {}", index, err);
                    *packet_bytes_remaining = 0;
                    packets.pop();
                    return Err(err.into());
                }
            }
        }
    }

    /// Decodes the next video frame of stream `index` into `image`, scaled to
    /// the image's size. `Ok(false)` at end of stream, leaving `image` as is.
    pub fn read_image<R: Raster + ?Sized>(&mut self, index: usize, image: &mut R) -> Result<bool> {
        if self.stream_mut(index)?.kind != MediaKind::Video {
            return Err(Error::unsupported("image transfer on a non-video stream"));
        }
        if !self.decode_next(index)? {
            return Ok(false);
        }

        let stream = self.stream_mut(index)?;
        let StreamSession { codec, bridge, .. } = stream;
        let frame = match codec {
            StreamCodec::Decoder(decoder) => decoder.video_frame(),
            StreamCodec::Encoder(_) => None,
        }
        .ok_or_else(|| Error::codec("no decoded picture"))?;
        bridge.to_image(frame, image)?;
        Ok(true)
    }

    fn decoder_mut(&mut self, index: usize) -> Result<&mut Decoder> {
        match &mut self.stream_mut(index)?.codec {
            StreamCodec::Decoder(decoder) => Ok(decoder),
            StreamCodec::Encoder(_) => Err(Error::config(format!("stream {index} is not open for reading"))),
        }
    }
}
