//! Fixed-capacity circular queue of coded packets, one per open stream.

/// Queue depth allocated for every stream at open time.
pub const DEFAULT_CAPACITY: usize = 16;

/// Circular FIFO with a hard capacity. When full, new items are refused and
/// handed back to the caller; queued items are never overwritten.
pub struct PacketBuffer<T = ffmpeg_next::Packet> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl<T> PacketBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Read cursor.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Write cursor.
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Queues `item` at the tail. Returns it untouched if the buffer is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
        Ok(())
    }

    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_mut()
    }

    /// Releases the item at the head and advances the read cursor.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        self.count -= 1;
        if self.count == 0 {
            self.head = 0;
            self.tail = 0;
        } else {
            self.head = (self.head + 1) % self.slots.len();
        }
        item
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

impl<T> Default for PacketBuffer<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
