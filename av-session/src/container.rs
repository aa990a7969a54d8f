//! Container sessions: one opened media file, its slot table of streams and
//! the deferred teardown that keeps the file alive while streams are open.

use std::ffi::{CString, c_char};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::str::FromStr;

use ffmpeg_next::{ffi, format};

use crate::error::{Error, Result};
use crate::options::{ContainerOptions, StreamOptions};
use crate::stream::{StreamCodec, StreamSelector, StreamSession};

/// Capabilities parsed from a mode string made of `r`, `w` and `a`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::config("empty open mode"));
        }
        let mut mode = OpenMode::default();
        for c in s.chars() {
            match c {
                'r' => mode.read = true,
                'w' => mode.write = true,
                'a' => {
                    mode.read = true;
                    mode.write = true;
                    mode.append = true;
                }
                other => return Err(Error::config(format!("invalid open mode character: {other:?}"))),
            }
        }
        Ok(mode)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.append {
            return f.write_str("a");
        }
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        Ok(())
    }
}

/// Picks the muxer for a new file: explicit format name, then MIME type, then
/// the path's extension.
pub fn resolve_output_format(path: &Path, options: &ContainerOptions) -> Result<format::format::Output> {
    if let Some(name) = options.format.as_deref() {
        return guess_format(Some(name), None, None)
            .ok_or_else(|| Error::config(format!("cannot find output format: {name}")));
    }
    if let Some(mime) = options.mime.as_deref() {
        match guess_format(None, None, Some(mime)) {
            Some(format) => return Ok(format),
            None => log::debug!("no output format for mime type {}, trying the file name", mime),
        }
    }
    let filename = path.to_string_lossy();
    guess_format(None, Some(&filename), None).ok_or_else(|| {
        Error::config(format!(
            "cannot deduce output format from file name: {}",
            path.display()
        ))
    })
}

fn guess_format(name: Option<&str>, filename: Option<&str>, mime: Option<&str>) -> Option<format::format::Output> {
    fn c_string(value: Option<&str>) -> Option<Option<CString>> {
        value.map(CString::new).transpose().ok()
    }
    fn c_ptr(value: &Option<CString>) -> *const c_char {
        value.as_ref().map_or(ptr::null(), |s| s.as_ptr())
    }

    let (name, filename, mime) = (c_string(name)?, c_string(filename)?, c_string(mime)?);
    let oformat = unsafe { ffi::av_guess_format(c_ptr(&name), c_ptr(&filename), c_ptr(&mime)) };
    if oformat.is_null() {
        None
    } else {
        Some(unsafe { format::format::Output::wrap(oformat as *mut _) })
    }
}

pub(crate) enum Context {
    Input(format::context::Input),
    Output(format::context::Output),
}

/// One entry of the slot table. A slot never goes back to `Vacant`, so a
/// closed stream cannot be reopened under the same index.
pub enum Slot {
    Vacant,
    Open(Box<StreamSession>),
    Closed,
}

impl Slot {
    pub fn is_open(&self) -> bool {
        matches!(self, Slot::Open(_))
    }
}

pub struct ContainerSession {
    path: PathBuf,
    mode: OpenMode,
    pub(crate) context: Context,
    pub(crate) slots: Vec<Slot>,
    open_streams: usize,
    header_written: bool,
    trailer_written: bool,
    marked_for_free: bool,
}

impl ContainerSession {
    pub fn open(path: impl AsRef<Path>, mode: &str, options: &ContainerOptions) -> Result<Self> {
        let path = path.as_ref();
        let mode: OpenMode = mode.parse()?;

        let (context, slots) = if mode.read {
            let input = format::input(&path).map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            let slots = (0..input.nb_streams()).map(|_| Slot::Vacant).collect();
            log::debug!(
                "opened {} for reading: format {}, {} streams",
                path.display(),
                input.format().name(),
                input.nb_streams()
            );
            (Context::Input(input), slots)
        } else {
            let oformat = resolve_output_format(path, options)?;
            let output = format::output_as(&path, oformat.name()).map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            log::debug!("opened {} for writing: format {}", path.display(), oformat.name());
            (Context::Output(output), Vec::new())
        };

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            context,
            slots,
            open_streams: 0,
            header_written: false,
            trailer_written: false,
            marked_for_free: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn format_name(&self) -> String {
        match &self.context {
            Context::Input(input) => input.format().name().to_string(),
            Context::Output(output) => output.format().name().to_string(),
        }
    }

    pub fn open_stream_count(&self) -> usize {
        self.open_streams
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn trailer_written(&self) -> bool {
        self.trailer_written
    }

    pub fn is_marked_for_free(&self) -> bool {
        self.marked_for_free
    }

    pub fn stream(&self, index: usize) -> Option<&StreamSession> {
        match self.slots.get(index) {
            Some(Slot::Open(stream)) => Some(stream),
            _ => None,
        }
    }

    pub(crate) fn stream_mut(&mut self, index: usize) -> Result<&mut StreamSession> {
        match self.slots.get_mut(index) {
            Some(Slot::Open(stream)) => Ok(stream),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Opens a stream and returns its slot index.
    ///
    /// Reading, `selector` picks the best stream of a kind or an explicit
    /// index. Writing, it must name a kind and a new stream is appended to the
    /// container, configured from `options`.
    pub fn open_stream(&mut self, selector: StreamSelector, options: &StreamOptions) -> Result<usize> {
        let stream = match &mut self.context {
            Context::Input(input) => {
                let index = match selector {
                    StreamSelector::Kind(kind) => input
                        .streams()
                        .best(kind.into())
                        .map(|stream| stream.index())
                        .ok_or_else(|| Error::config(format!("cannot find a stream of type '{kind}'")))?,
                    StreamSelector::Index(index) => {
                        if index >= self.slots.len() {
                            return Err(Error::config(format!(
                                "stream index must be between 0 and {}",
                                self.slots.len().saturating_sub(1)
                            )));
                        }
                        index
                    }
                };
                match self.slots.get(index) {
                    Some(Slot::Vacant) => {}
                    Some(Slot::Open(_)) => return Err(Error::config(format!("stream {index} is already open"))),
                    Some(Slot::Closed) => return Err(Error::config(format!("stream {index} was already closed"))),
                    None => return Err(Error::config(format!("no stream at index {index}"))),
                }
                StreamSession::open_decoder(input, index)?
            }
            Context::Output(output) => {
                if self.header_written {
                    return Err(Error::config("cannot add a stream after the header was written"));
                }
                let StreamSelector::Kind(kind) = selector else {
                    return Err(Error::config("write streams are selected by media kind"));
                };
                StreamSession::open_encoder(output, &self.path, kind, options)?
            }
        };

        let index = stream.index();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || Slot::Vacant);
        }
        self.slots[index] = Slot::Open(Box::new(stream));
        self.open_streams += 1;
        log::debug!(
            "{}: stream {} opened ({} open)",
            self.path.display(),
            index,
            self.open_streams
        );
        Ok(index)
    }

    /// Closes stream `index`, flushing its encoder when writing. Returns true
    /// when this was the last stream of a container already marked for free,
    /// meaning the container can now be dropped.
    pub fn close_stream(&mut self, index: usize) -> Result<bool> {
        let Some(slot) = self.slots.get_mut(index).filter(|slot| slot.is_open()) else {
            return Err(Error::InvalidHandle);
        };
        let Slot::Open(mut stream) = std::mem::replace(slot, Slot::Closed) else {
            return Err(Error::InvalidHandle);
        };

        if let (Context::Output(output), StreamCodec::Encoder(encoder)) = (&mut self.context, &mut stream.codec) {
            if self.header_written {
                if let Err(e) = encoder.flush(output, index) {
                    log::warn!("{}: flushing stream {} failed: {}", self.path.display(), index, e);
                }
            }
        }
        drop(stream);
        self.open_streams -= 1;
        log::debug!(
            "{}: stream {} closed ({} open)",
            self.path.display(),
            index,
            self.open_streams
        );

        if self.open_streams == 0 {
            self.finish();
        }
        Ok(self.marked_for_free && self.open_streams == 0)
    }

    /// Marks the container for release. Returns true if no stream is open, in
    /// which case it can be dropped right away; otherwise it stays alive until
    /// its last stream closes.
    pub fn close(&mut self) -> bool {
        self.marked_for_free = true;
        log::debug!(
            "{}: close requested with {} open streams",
            self.path.display(),
            self.open_streams
        );
        self.open_streams == 0
    }

    pub(crate) fn ensure_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let Context::Output(output) = &mut self.context else {
            return Err(Error::config("container is not open for writing"));
        };
        output.write_header()?;
        self.header_written = true;
        log::debug!("{}: header written", self.path.display());
        Ok(())
    }

    pub(crate) fn output_and_stream(
        &mut self,
        index: usize,
    ) -> Result<(&mut format::context::Output, &mut StreamSession)> {
        let Context::Output(output) = &mut self.context else {
            return Err(Error::config("container is not open for writing"));
        };
        match self.slots.get_mut(index) {
            Some(Slot::Open(stream)) => Ok((output, stream)),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Writes the trailer once, if a header went out.
    fn finish(&mut self) {
        if let Context::Output(output) = &mut self.context {
            if self.header_written && !self.trailer_written {
                match output.write_trailer() {
                    Ok(()) => log::debug!("{}: trailer written", self.path.display()),
                    Err(e) => log::warn!("{}: writing trailer failed: {}", self.path.display(), e),
                }
                self.trailer_written = true;
            }
        }
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].is_open() {
                let _ = self.close_stream(index);
            }
        }
        self.finish();
        log::debug!("{}: released", self.path.display());
    }
}
