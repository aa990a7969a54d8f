use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use av_session::{MediaKind, SessionTable, StreamOptions, TrueColorImage};
use clap::{Parser, Subcommand};

/// Frame-level access to media files.
#[derive(Parser)]
#[command(name = "av-frames", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the streams of a media file.
    Info {
        input: PathBuf,
    },
    /// Decode the first video frames and save them as JPEG files.
    Snapshot {
        input: PathBuf,
        /// Directory the frames are written to.
        out_dir: PathBuf,

        #[arg(short, long, default_value_t = 1)]
        count: u32,

        /// Output width; defaults to the stream's width.
        #[arg(long)]
        width: Option<u32>,

        /// Output height; defaults to the stream's height.
        #[arg(long)]
        height: Option<u32>,
    },
    /// Re-encode the video of one file into another.
    Copy {
        input: PathBuf,
        output: PathBuf,

        /// Stream options as a JSON object, e.g. '{"codec": "mpeg4", "frame rate": 25}'.
        #[arg(short, long)]
        options: Option<String>,

        /// Stop after this many frames.
        #[arg(short, long)]
        count: Option<u64>,
    },
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("av_session", log::LevelFilter::Debug)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut table = SessionTable::new().context("engine init")?;

    match cli.command {
        Command::Info { input } => info(&mut table, &input),
        Command::Snapshot {
            input,
            out_dir,
            count,
            width,
            height,
        } => snapshot(&mut table, &input, &out_dir, count, width, height),
        Command::Copy {
            input,
            output,
            options,
            count,
        } => copy(&mut table, &input, &output, options.as_deref(), count),
    }
}

fn info(table: &mut SessionTable, input: &Path) -> Result<()> {
    let container = table
        .open_container(input, "r", None)
        .with_context(|| format!("opening {}", input.display()))?;
    if let Some(session) = table.container(container) {
        print!("{}", session.describe());
    }
    table.close_container(container)?;
    Ok(())
}

/// Size of the first video stream as probed from the container.
fn video_size(table: &SessionTable, container: av_session::ContainerHandle) -> Result<(u32, u32)> {
    let info = table
        .container(container)
        .map(|session| session.describe())
        .context("container released")?;
    info.streams
        .iter()
        .filter(|s| s.kind == Some(MediaKind::Video))
        .find_map(|s| s.width.zip(s.height))
        .filter(|&(w, h)| w > 0 && h > 0)
        .context("no video stream with a known size")
}

fn snapshot(
    table: &mut SessionTable,
    input: &Path,
    out_dir: &Path,
    count: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<()> {
    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let container = table
        .open_container(input, "r", None)
        .with_context(|| format!("opening {}", input.display()))?;
    let (stream_width, stream_height) = video_size(table, container)?;
    let (width, height) = (width.unwrap_or(stream_width), height.unwrap_or(stream_height));
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        bail!("{}x{} is too large for JPEG", width, height);
    }
    let stream = table.open_stream(container, MediaKind::Video, None)?;

    let mut image = TrueColorImage::new(width, height);
    let mut saved = 0;
    while saved < count && table.read_image(stream, &mut image)? {
        let path = out_dir.join(format!("frame_{:04}.jpg", saved));
        let encoder = jpeg_encoder::Encoder::new_file(&path, 90)
            .with_context(|| format!("creating {}", path.display()))?;
        encoder
            .encode(&image.to_rgba8(), width as u16, height as u16, jpeg_encoder::ColorType::Rgba)
            .with_context(|| format!("encoding {}", path.display()))?;
        log::info!("saved {}", path.display());
        saved += 1;
    }
    if saved < count {
        log::warn!("stream ended after {} of {} frames", saved, count);
    }

    table.close_stream(stream)?;
    table.close_container(container)?;
    Ok(())
}

fn copy(
    table: &mut SessionTable,
    input: &Path,
    output: &Path,
    options: Option<&str>,
    count: Option<u64>,
) -> Result<()> {
    let source = table
        .open_container(input, "r", None)
        .with_context(|| format!("opening {}", input.display()))?;
    let (width, height) = video_size(table, source)?;

    let mut value = match options {
        Some(json) => serde_json::from_str(json).context("parsing stream options")?,
        None => serde_json::json!({}),
    };
    let Some(map) = value.as_object_mut() else {
        bail!("stream options must be a JSON object");
    };
    map.entry("width").or_insert(width.into());
    map.entry("height").or_insert(height.into());
    let stream_options = StreamOptions::from_value(value)?;

    let sink = table
        .open_container(output, "w", None)
        .with_context(|| format!("creating {}", output.display()))?;
    let reader = table.open_stream(source, MediaKind::Video, None)?;
    let writer = table.open_stream(sink, MediaKind::Video, Some(&stream_options))?;

    let mut image = TrueColorImage::new(width, height);
    let mut frames = 0u64;
    while count.is_none_or(|limit| frames < limit) && table.read_image(reader, &mut image)? {
        table.write_image(writer, &image)?;
        frames += 1;
    }
    log::info!("copied {} frames to {}", frames, output.display());

    table.close_stream(writer)?;
    table.close_stream(reader)?;
    table.close_container(sink)?;
    table.close_container(source)?;
    Ok(())
}
