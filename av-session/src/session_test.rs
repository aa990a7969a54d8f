use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::Error;
use crate::options::{ContainerOptions, StreamOptions};
use crate::packet::DEFAULT_CAPACITY;
use crate::raster::{ALPHA_MAX, Raster, TrueColor, TrueColorImage};
use crate::session::SessionTable;
use crate::stream::{MediaKind, StreamCodec, StreamSelector, StreamSession};

fn rgba_options(width: u32, height: u32) -> StreamOptions {
    StreamOptions::from_value(json!({
        "codec": "rawvideo",
        "pixel format": "rgba",
        "width": width,
        "height": height,
    }))
    .unwrap()
}

fn pattern(seed: u8, width: u32, height: u32) -> TrueColorImage {
    TrueColorImage::from_fn(width, height, |x, y| {
        let x = x as u8;
        let y = y as u8;
        TrueColor::new(
            seed.wrapping_add(x.wrapping_mul(40)),
            y.wrapping_mul(90),
            200 - seed,
            (seed + x * 13 + y * 29) % (ALPHA_MAX + 1),
        )
    })
}

fn audio_options(codec: &str) -> StreamOptions {
    StreamOptions::from_value(json!({
        "codec": codec,
        "sample rate": 44_100,
        "channels": 2,
        "bit rate": 128_000,
    }))
    .unwrap()
}

fn assert_clock(session: &StreamSession) {
    let expected = session.frame_count() as f64 * session.time_unit();
    assert!(
        (session.frame_time() - expected).abs() < 1e-9,
        "frame time {} after {} units of {}",
        session.frame_time(),
        session.frame_count(),
        session.time_unit()
    );
}

/// Writes `frames` into every one of `streams` video streams of a NUT file.
fn write_clip(dir: &Path, name: &str, streams: usize, frames: &[TrueColorImage]) -> PathBuf {
    let path = dir.join(name);
    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "w", None).unwrap();
    let (width, height) = (frames[0].width(), frames[0].height());
    let handles: Vec<_> = (0..streams)
        .map(|_| {
            table
                .open_stream(container, MediaKind::Video, Some(&rgba_options(width, height)))
                .unwrap()
        })
        .collect();
    for frame in frames {
        for handle in &handles {
            table.write_image(*handle, frame).unwrap();
        }
    }
    for handle in handles {
        assert!(table.close_stream(handle).unwrap());
    }
    assert!(table.close_container(container).unwrap());
    path
}

#[test]
fn test_round_trip_rgba() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..3).map(|i| pattern(i * 50, 2, 2)).collect();
    let path = write_clip(dir.path(), "clip.nut", 1, &frames);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let stream = table.open_stream(container, MediaKind::Video, None).unwrap();

    let time_unit = table.stream(stream).unwrap().time_unit();
    assert!(time_unit > 0.0);
    assert_eq!(table.stream(stream).unwrap().frame_time(), 0.0);

    let mut image = TrueColorImage::new(2, 2);
    for (n, expected) in frames.iter().enumerate() {
        assert!(table.read_image(stream, &mut image).unwrap());
        assert_eq!(&image, expected, "frame {n}");
        let session = table.stream(stream).unwrap();
        assert_eq!(session.frame_count(), n as u64 + 1);
        assert!((session.frame_time() - (n + 1) as f64 * time_unit).abs() < 1e-9);
    }
    assert!(!table.read_image(stream, &mut image).unwrap());
    assert!(!table.read_image(stream, &mut image).unwrap());
}

#[test]
fn test_writer_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lifecycle.nut");
    let mut table = SessionTable::new().unwrap();

    let container = table.open_container(&path, "w", None).unwrap();
    let video = table
        .open_stream(container, MediaKind::Video, Some(&rgba_options(2, 2)))
        .unwrap();
    assert!(!table.container(container).unwrap().header_written());

    table.write_image(video, &pattern(1, 2, 2)).unwrap();
    let session = table.container(container).unwrap();
    assert!(session.header_written());
    assert_eq!(session.format_name(), "nut");

    let err = table
        .open_stream(container, MediaKind::Video, Some(&rgba_options(2, 2)))
        .unwrap_err();
    assert!(err.is_config());

    assert!(table.close_stream(video).unwrap());
    assert!(table.container(container).unwrap().trailer_written());
    assert!(matches!(table.close_stream(video), Err(Error::InvalidHandle)));
    assert!(table.close_container(container).unwrap());
    assert!(matches!(table.close_container(container), Err(Error::InvalidHandle)));
}

#[test]
fn test_write_format_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = SessionTable::new().unwrap();

    let err = table
        .open_container(dir.path().join("out.xyz"), "w", None)
        .unwrap_err();
    assert!(err.is_config());

    let named = table
        .open_container(
            dir.path().join("out.xyz"),
            "w",
            Some(&ContainerOptions::with_format("nut")),
        )
        .unwrap();
    assert_eq!(table.container(named).unwrap().format_name(), "nut");

    let err = table
        .open_container(dir.path().join("out.nut"), "q", None)
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_read_selectors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path(), "video.nut", 1, &[pattern(0, 2, 2)]);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    assert_eq!(table.container(container).unwrap().slot_count(), 1);

    for selector in [
        StreamSelector::Kind(MediaKind::Audio),
        StreamSelector::Kind(MediaKind::Subtitle),
        StreamSelector::Index(2),
        StreamSelector::Index(1),
    ] {
        let err = table.open_stream(container, selector, None).unwrap_err();
        assert!(err.is_config(), "{selector:?}: {err}");
    }
    assert!("sound".parse::<StreamSelector>().unwrap_err().is_config());

    let stream = table.open_stream(container, 0usize, None).unwrap();
    assert_eq!(table.stream(stream).unwrap().kind(), MediaKind::Video);
    assert!(table.open_stream(container, 0usize, None).unwrap_err().is_config());

    assert!(table.close_stream(stream).unwrap());
    let err = table.open_stream(container, MediaKind::Video, None).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_append_mode_reads() {
    let dir = tempfile::tempdir().unwrap();
    let frames = [pattern(3, 2, 2)];
    let path = write_clip(dir.path(), "append.nut", 1, &frames);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "a", None).unwrap();
    let mode = table.container(container).unwrap().mode();
    assert!(mode.read && mode.write && mode.append);

    let stream = table.open_stream(container, MediaKind::Video, None).unwrap();
    let mut image = TrueColorImage::new(2, 2);
    assert!(table.read_image(stream, &mut image).unwrap());
    assert_eq!(image, frames[0]);
}

#[test]
fn test_container_outlives_released_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path(), "two.nut", 2, &[pattern(0, 2, 2), pattern(9, 2, 2)]);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let first = table.open_stream(container, 0usize, None).unwrap();
    let second = table.open_stream(container, 1usize, None).unwrap();

    assert!(!table.close_container(container).unwrap());
    assert!(table.container(container).is_none());
    assert_eq!(table.resident_containers(), 1);
    assert!(matches!(
        table.open_stream(container, 0usize, None),
        Err(Error::InvalidHandle)
    ));

    // streams keep working after the handle is gone
    let mut image = TrueColorImage::new(2, 2);
    assert!(table.read_image(second, &mut image).unwrap());
    assert_eq!(image, pattern(0, 2, 2));

    assert!(table.close_stream(first).unwrap());
    assert_eq!(table.resident_containers(), 1);
    assert!(table.read_image(second, &mut image).unwrap());
    assert_eq!(image, pattern(9, 2, 2));

    assert!(table.close_stream(second).unwrap());
    assert_eq!(table.resident_containers(), 0);
    assert_eq!(table.open_streams(), 0);
}

#[test]
fn test_streams_closed_before_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path(), "order.nut", 2, &[pattern(0, 2, 2)]);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let first = table.open_stream(container, 0usize, None).unwrap();
    let second = table.open_stream(container, 1usize, None).unwrap();

    assert!(table.close_stream(second).unwrap());
    assert_eq!(table.container(container).unwrap().open_stream_count(), 1);
    assert!(table.close_stream(first).unwrap());
    assert_eq!(table.resident_containers(), 1);

    assert!(table.close_container(container).unwrap());
    assert_eq!(table.resident_containers(), 0);
}

#[test]
fn test_picture_reallocated_per_size_change() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..5).map(|i| pattern(i * 10, 2, 2)).collect();
    let path = write_clip(dir.path(), "sizes.nut", 1, &frames);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let stream = table.open_stream(container, MediaKind::Video, None).unwrap();
    let allocations = |table: &SessionTable| table.stream(stream).unwrap().bridge().allocations();

    let mut small = TrueColorImage::new(2, 2);
    let mut large = TrueColorImage::new(4, 4);
    assert!(table.read_image(stream, &mut small).unwrap());
    assert!(table.read_image(stream, &mut small).unwrap());
    assert_eq!(allocations(&table), 1);

    assert!(table.read_image(stream, &mut large).unwrap());
    assert!(table.read_image(stream, &mut large).unwrap());
    assert_eq!(allocations(&table), 2);
    assert_eq!(table.stream(stream).unwrap().bridge().picture_size(), Some((4, 4)));

    assert!(table.read_image(stream, &mut small).unwrap());
    assert_eq!(allocations(&table), 3);
}

#[test]
fn test_image_transfer_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path(), "errors.nut", 1, &[pattern(0, 2, 2)]);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let stream = table.open_stream(container, MediaKind::Video, None).unwrap();

    let err = table.write_image(stream, &pattern(0, 2, 2)).unwrap_err();
    assert!(err.is_config(), "{err}");
    let err = table.read_image(stream, &mut TrueColorImage::new(0, 2)).unwrap_err();
    assert!(err.is_config(), "{err}");

    table.close_stream(stream).unwrap();
    assert!(matches!(
        table.read_image(stream, &mut TrueColorImage::new(2, 2)),
        Err(Error::InvalidHandle)
    ));
}

#[test]
fn test_describe_read_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path(), "probe.nut", 1, &[pattern(0, 2, 2), pattern(1, 2, 2)]);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let info = table.container(container).unwrap().describe();
    assert_eq!(info.format_name, "nut");
    assert_eq!(info.streams.len(), 1);
    let stream = &info.streams[0];
    assert_eq!(stream.kind, Some(MediaKind::Video));
    assert_eq!(stream.codec_name, "rawvideo");
    assert_eq!((stream.width, stream.height), (Some(2), Some(2)));
    assert!(!stream.open);
}

#[test]
fn test_video_pts_advances_from_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(dir.path(), "pts.nut", 1, &[pattern(0, 2, 2), pattern(1, 2, 2)]);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let time_base = table.container(container).unwrap().describe().streams[0].time_base;
    let stream = table.open_stream(container, MediaKind::Video, None).unwrap();

    for n in 1..=2 {
        assert!(table.decode_next(stream).unwrap());
        let StreamCodec::Decoder(decoder) = &table.stream(stream).unwrap().codec else {
            panic!("read stream without a decoder");
        };
        let pts = decoder.video_frame().and_then(|frame| frame.pts()).unwrap();
        let seconds = pts as f64 * f64::from(time_base);
        assert!((seconds - n as f64 / 24.0).abs() < 1e-9, "frame {n} at {seconds}s");
    }
}

#[test]
fn test_full_queue_drops_newest_packets() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..20).map(|i| pattern(i * 9, 2, 2)).collect();
    let path = write_clip(dir.path(), "busy.nut", 2, &frames);

    let mut table = SessionTable::new().unwrap();
    let container = table.open_container(&path, "r", None).unwrap();
    let first = table.open_stream(container, 0usize, None).unwrap();
    let second = table.open_stream(container, 1usize, None).unwrap();
    let queued = |table: &SessionTable| table.stream(first).unwrap().queued_packets();

    // draining the second stream parks the first one's packets until its queue fills
    let mut image = TrueColorImage::new(2, 2);
    for (n, expected) in frames.iter().enumerate() {
        assert!(table.read_image(second, &mut image).unwrap());
        assert_eq!(&image, expected, "second stream frame {n}");
        assert!(queued(&table) <= DEFAULT_CAPACITY);
    }
    assert!(!table.read_image(second, &mut image).unwrap());
    assert_eq!(queued(&table), DEFAULT_CAPACITY);

    // the oldest packets survived, the ones that arrived on a full queue are gone
    for (n, expected) in frames[..DEFAULT_CAPACITY].iter().enumerate() {
        assert!(table.read_image(first, &mut image).unwrap());
        assert_eq!(&image, expected, "first stream frame {n}");
        assert!(queued(&table) < DEFAULT_CAPACITY);
    }
    assert!(!table.read_image(first, &mut image).unwrap());
    assert_eq!(table.stream(first).unwrap().frame_count(), DEFAULT_CAPACITY as u64);
    assert_eq!(queued(&table), 0);
}

/// Encodes `frames` silent frames with `codec` into a NUT file and decodes
/// them back, checking the stream clock on both sides. Returns the time units
/// of the write and the read stream.
fn audio_round_trip(dir: &Path, codec: &str, frames: u64) -> (f64, f64) {
    let path = dir.join(format!("{codec}.nut"));
    let mut table = SessionTable::new().unwrap();

    let container = table.open_container(&path, "w", None).unwrap();
    let writer = table
        .open_stream(container, MediaKind::Audio, Some(&audio_options(codec)))
        .unwrap();
    let err = table.write_image(writer, &pattern(0, 2, 2)).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err}");
    for n in 1..=frames {
        assert!(table.encode_next(writer).unwrap());
        let session = table.stream(writer).unwrap();
        assert_eq!(session.frame_count(), n);
        assert_clock(session);
    }
    let write_unit = table.stream(writer).unwrap().time_unit();
    assert!(table.close_stream(writer).unwrap());
    assert!(table.close_container(container).unwrap());

    let container = table.open_container(&path, "r", None).unwrap();
    let reader = table.open_stream(container, MediaKind::Audio, None).unwrap();
    assert_eq!(table.stream(reader).unwrap().kind(), MediaKind::Audio);
    let err = table.read_image(reader, &mut TrueColorImage::new(2, 2)).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err}");

    let mut decoded = 0;
    while table.decode_next(reader).unwrap() {
        decoded += 1;
        let session = table.stream(reader).unwrap();
        assert_eq!(session.frame_count(), decoded);
        assert_clock(session);
    }
    assert!(decoded > 0);
    assert!(!table.decode_next(reader).unwrap());
    (write_unit, table.stream(reader).unwrap().time_unit())
}

#[test]
fn test_audio_variable_frame_size() {
    let dir = tempfile::tempdir().unwrap();
    let (write_unit, read_unit) = audio_round_trip(dir.path(), "pcm_s16le", 5);
    // one unit per sample
    assert!((write_unit - 1.0 / 44_100.0).abs() < 1e-12);
    assert!(read_unit > 0.0);
}

#[test]
fn test_audio_fixed_frame_size() {
    let dir = tempfile::tempdir().unwrap();
    SessionTable::new().unwrap();
    if ffmpeg_next::encoder::find_by_name("mp2").is_none() {
        return;
    }
    let (write_unit, read_unit) = audio_round_trip(dir.path(), "mp2", 5);
    // one unit per frame of 1152 samples
    assert!((write_unit - 1152.0 / 44_100.0).abs() < 1e-12);
    assert!(read_unit > 0.0);
}
