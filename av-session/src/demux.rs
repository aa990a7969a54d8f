use ffmpeg_next::Packet;

use crate::container::{Context, ContainerSession, Slot};
use crate::error::{Error, Result};

impl ContainerSession {
    /// Reads packets from the container, routing each into the queue of the
    /// open stream it belongs to, until one lands in `target`'s queue.
    ///
    /// Returns `Ok(true)` as soon as `target` has a packet queued, including
    /// one queued by an earlier call, and `Ok(false)` once the container is
    /// exhausted. Packets for streams nobody opened are discarded.
    pub fn pull(&mut self, target: usize) -> Result<bool> {
        let ContainerSession { context, slots, .. } = self;
        let Context::Input(input) = context else {
            return Err(Error::config("container is not open for reading"));
        };
        match slots.get(target) {
            Some(Slot::Open(stream)) if !stream.packets.is_empty() => return Ok(true),
            Some(Slot::Open(_)) => {}
            _ => return Err(Error::InvalidHandle),
        }

        loop {
            let mut packet = Packet::empty();
            match packet.read(input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => {
                    log::debug!("end of container while pulling for stream {}", target);
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }

            let index = packet.stream();
            match slots.get_mut(index) {
                Some(Slot::Open(stream)) => match stream.packets.push(packet) {
                    Ok(()) => {
                        log::trace!("queued packet for stream {} ({} queued)", index, stream.packets.len());
                        if index == target {
                            return Ok(true);
                        }
                    }
                    Err(dropped) => {
                        log::warn!(
                            "packet queue of stream {} is full, dropping packet of {} bytes",
                            index,
                            dropped.size()
                        );
                    }
                },
                Some(_) => log::trace!("discarding packet for unopened stream {}", index),
                None => log::warn!("invalid stream index: {}", index),
            }
        }
    }
}
