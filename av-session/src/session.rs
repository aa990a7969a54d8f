//! Handle table through which callers drive containers and streams.
//!
//! Containers and streams are referred to by opaque integer handles. A
//! stream handle records the container handle and slot index it lives at, so
//! nothing holds a reference into a container that may already be gone.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::container::ContainerSession;
use crate::error::{Error, Result};
use crate::options::{ContainerOptions, StreamOptions};
use crate::raster::Raster;
use crate::stream::{StreamSelector, StreamSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContainerHandle(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
struct StreamEntry {
    container: ContainerHandle,
    index: usize,
}

pub struct SessionTable {
    containers: HashMap<ContainerHandle, ContainerSession>,
    streams: HashMap<StreamHandle, StreamEntry>,
    next_handle: u64,
}

impl SessionTable {
    pub fn new() -> Result<Self> {
        crate::init()?;
        Ok(Self {
            containers: HashMap::new(),
            streams: HashMap::new(),
            next_handle: 1,
        })
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn open_container(
        &mut self,
        path: impl AsRef<Path>,
        mode: &str,
        options: Option<&ContainerOptions>,
    ) -> Result<ContainerHandle> {
        let default = ContainerOptions::default();
        let session = ContainerSession::open(path, mode, options.unwrap_or(&default))?;
        let handle = ContainerHandle(self.allocate());
        log::debug!("{} -> {}", handle, session.path().display());
        self.containers.insert(handle, session);
        Ok(handle)
    }

    /// Releases the caller's container handle. Returns true if the container
    /// was freed right away; otherwise it lives on until its last stream
    /// closes.
    pub fn close_container(&mut self, handle: ContainerHandle) -> Result<bool> {
        let container = self.live_container_mut(handle)?;
        let freed = container.close();
        if freed {
            self.containers.remove(&handle);
            log::debug!("{} freed", handle);
        } else {
            log::debug!("{} marked for free", handle);
        }
        Ok(freed)
    }

    pub fn open_stream(
        &mut self,
        container: ContainerHandle,
        selector: impl Into<StreamSelector>,
        options: Option<&StreamOptions>,
    ) -> Result<StreamHandle> {
        let default = StreamOptions::default();
        let session = self.live_container_mut(container)?;
        let index = session.open_stream(selector.into(), options.unwrap_or(&default))?;
        let handle = StreamHandle(self.allocate());
        self.streams.insert(handle, StreamEntry { container, index });
        log::debug!("{} -> {} index {}", handle, container, index);
        Ok(handle)
    }

    /// Closes a stream; the last stream of a released container takes the
    /// container down with it.
    pub fn close_stream(&mut self, handle: StreamHandle) -> Result<bool> {
        let entry = self.streams.remove(&handle).ok_or(Error::InvalidHandle)?;
        let container = self
            .containers
            .get_mut(&entry.container)
            .ok_or(Error::InvalidHandle)?;
        if container.close_stream(entry.index)? {
            self.containers.remove(&entry.container);
            log::debug!("{} freed after its last stream closed", entry.container);
        }
        Ok(true)
    }

    /// Decodes the next frame of a video stream into `image`. `Ok(false)` at
    /// end of stream.
    pub fn read_image<R: Raster + ?Sized>(&mut self, handle: StreamHandle, image: &mut R) -> Result<bool> {
        let (container, index) = self.resolve(handle)?;
        container.read_image(index, image)
    }

    /// Encodes `image` as the next frame of a video stream.
    pub fn write_image<R: Raster + ?Sized>(&mut self, handle: StreamHandle, image: &R) -> Result<()> {
        let (container, index) = self.resolve(handle)?;
        container.write_image(index, image)
    }

    pub fn decode_next(&mut self, handle: StreamHandle) -> Result<bool> {
        let (container, index) = self.resolve(handle)?;
        container.decode_next(index)
    }

    pub fn encode_next(&mut self, handle: StreamHandle) -> Result<bool> {
        let (container, index) = self.resolve(handle)?;
        container.encode_next(index)
    }

    /// Container behind a handle the caller has not released yet.
    pub fn container(&self, handle: ContainerHandle) -> Option<&ContainerSession> {
        self.containers
            .get(&handle)
            .filter(|container| !container.is_marked_for_free())
    }

    pub fn stream(&self, handle: StreamHandle) -> Option<&StreamSession> {
        let entry = self.streams.get(&handle)?;
        self.containers.get(&entry.container)?.stream(entry.index)
    }

    /// Containers still holding engine resources, released or not.
    pub fn resident_containers(&self) -> usize {
        self.containers.len()
    }

    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    fn live_container_mut(&mut self, handle: ContainerHandle) -> Result<&mut ContainerSession> {
        self.containers
            .get_mut(&handle)
            .filter(|container| !container.is_marked_for_free())
            .ok_or(Error::InvalidHandle)
    }

    fn resolve(&mut self, handle: StreamHandle) -> Result<(&mut ContainerSession, usize)> {
        let entry = *self.streams.get(&handle).ok_or(Error::InvalidHandle)?;
        let container = self
            .containers
            .get_mut(&entry.container)
            .ok_or(Error::InvalidHandle)?;
        Ok((container, entry.index))
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
