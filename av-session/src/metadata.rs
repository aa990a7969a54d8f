//! Stream listing of an open container, printed in an ffprobe-like layout.

use std::fmt;

use ffmpeg_next::format::stream::Stream;
use ffmpeg_next::{Rational, codec};

use crate::container::{Context, ContainerSession, Slot};
use crate::stream::{MediaKind, stream_duration};

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub path: String,
    /// Short muxer/demuxer name, e.g. "nut" or "mov,mp4,m4a,3gp,3g2,mj2".
    pub format_name: String,
    /// Container duration in seconds; None when unknown or still being written.
    pub duration_sec: Option<f64>,
    /// Total bitrate in bps; 0 if unknown.
    pub bit_rate: i64,
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    /// None for data and attachment streams.
    pub kind: Option<MediaKind>,
    pub codec_name: String,
    pub time_base: Rational,
    /// Seconds on the stream's own clock (`time_base`), 0 when unknown.
    pub duration_sec: f64,
    /// Average frame rate, video only.
    pub frame_rate: Option<Rational>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    /// Whether a stream session currently holds this stream.
    pub open: bool,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "filename={}", self.path)?;
        writeln!(f, "format_name={}", self.format_name)?;
        match self.duration_sec {
            Some(d) => writeln!(f, "duration={:.3}", d)?,
            None => writeln!(f, "duration=N/A")?,
        }
        writeln!(f, "bit_rate={}", self.bit_rate)?;
        writeln!(f, "nb_streams={}", self.streams.len())?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.kind.map_or("data", |k| k.as_str()))?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}/{}", s.time_base.numerator(), s.time_base.denominator())?;
            writeln!(f, "duration={:.3}", s.duration_sec)?;
            if let Some(rate) = s.frame_rate {
                writeln!(f, "avg_frame_rate={}/{}", rate.numerator(), rate.denominator())?;
            }
            if let (Some(w), Some(h)) = (s.width, s.height) {
                writeln!(f, "width={}", w)?;
                writeln!(f, "height={}", h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "open={}", s.open)?;
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

impl ContainerSession {
    /// Lists the container's streams as the engine currently sees them.
    pub fn describe(&self) -> MediaInfo {
        let (streams, duration_sec, bit_rate): (Vec<Stream>, _, _) = match &self.context {
            Context::Input(input) => {
                // container duration is in AV_TIME_BASE units
                let d = input.duration();
                let duration_sec = if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
                    None
                } else {
                    Some(d as f64 / ffmpeg_next::ffi::AV_TIME_BASE as f64)
                };
                (input.streams().collect(), duration_sec, input.bit_rate())
            }
            Context::Output(output) => (output.streams().collect(), None, 0),
        };

        let streams = streams
            .iter()
            .map(|stream| {
                let index = stream.index();
                let open = matches!(self.slots.get(index), Some(Slot::Open(_)));
                stream_info(stream, open)
            })
            .collect();

        MediaInfo {
            path: self.path().display().to_string(),
            format_name: self.format_name(),
            duration_sec,
            bit_rate,
            streams,
        }
    }
}

fn stream_info(stream: &Stream, open: bool) -> StreamInfo {
    let params = stream.parameters();
    let kind = MediaKind::try_from(params.medium()).ok();
    let (width, height) = match kind {
        Some(MediaKind::Video) => {
            let (w, h) = video_size(&params);
            (Some(w), Some(h))
        }
        _ => (None, None),
    };
    let (sample_rate, channels) = match kind {
        Some(MediaKind::Audio) => {
            let (sr, ch) = audio_layout(&params);
            (Some(sr), Some(ch))
        }
        _ => (None, None),
    };
    let time_base = stream.time_base();
    let tick = if time_base.denominator() == 0 { 0.0 } else { f64::from(time_base) };
    let frame_rate = Some(stream.avg_frame_rate())
        .filter(|rate| kind == Some(MediaKind::Video) && rate.denominator() != 0 && rate.numerator() != 0);

    StreamInfo {
        index: stream.index(),
        kind,
        codec_name: params.id().name().to_string(),
        time_base,
        duration_sec: stream_duration(stream.duration(), tick),
        frame_rate,
        width,
        height,
        sample_rate,
        channels,
        open,
    }
}

/// Width and height from codec parameters (not exposed by ffmpeg-next).
fn video_size(params: &codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
    }
}

fn audio_layout(params: &codec::Parameters) -> (u32, u32) {
    unsafe {
        let ptr = params.as_ptr();
        ((*ptr).sample_rate.max(0) as u32, (*ptr).ch_layout.nb_channels.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_layout() {
        let info = MediaInfo {
            path: "clip.nut".into(),
            format_name: "nut".into(),
            duration_sec: None,
            bit_rate: 0,
            streams: vec![StreamInfo {
                index: 0,
                kind: Some(MediaKind::Video),
                codec_name: "rawvideo".into(),
                time_base: Rational::new(1, 24),
                duration_sec: 0.125,
                frame_rate: Some(Rational::new(24, 1)),
                width: Some(2),
                height: Some(2),
                sample_rate: None,
                channels: None,
                open: true,
            }],
        };
        let text = info.to_string();
        assert!(text.starts_with("[FORMAT]\nfilename=clip.nut\nformat_name=nut\nduration=N/A\n"));
        assert!(text.contains("codec_type=video\ncodec_name=rawvideo\ntime_base=1/24\nduration=0.125\n"));
        assert!(text.contains("width=2\nheight=2\n"));
        assert!(!text.contains("sample_rate"));
        assert!(text.ends_with("open=true\n[/STREAM]\n"));
    }
}
