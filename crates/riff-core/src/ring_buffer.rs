//! Single-producer/single-consumer sample queue
//!
//! Moves audio from the real-time callback to the analysis thread over an
//! [`rtrb`] ring, the same wait-free queue the engine uses for commands.
//! The queue is split into a [`Producer`] and a [`Consumer`] at
//! construction so there can never be a second writer or reader.
//!
//! A queue built with capacity `C` holds at most `C - 1` items and
//! `available() + space() == C - 1` at all times.
//!
//! Writes and reads are all-or-nothing: a request that does not fit returns
//! `false` and leaves the queue untouched. Neither side blocks or allocates
//! after construction.

/// Constructor namespace for the split queue
pub struct RingBuffer;

impl RingBuffer {
    /// Create a queue with `capacity` slots (usable capacity is `capacity - 1`)
    ///
    /// A capacity below 2 is raised to 2 so the queue can hold one item.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Copy + Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
        let (producer, consumer) = rtrb::RingBuffer::new(capacity.max(2) - 1);
        (Producer { inner: producer }, Consumer { inner: consumer })
    }
}

/// Writing half, owned by the audio thread
pub struct Producer<T> {
    inner: rtrb::Producer<T>,
}

impl<T: Copy> Producer<T> {
    /// Append all of `data`, or nothing if it does not fit
    pub fn write(&mut self, data: &[T]) -> bool {
        self.inner.push_entire_slice(data).is_ok()
    }

    /// Items currently queued
    pub fn available(&self) -> usize {
        self.inner.buffer().capacity() - self.inner.slots()
    }

    /// Items that can be written right now
    pub fn space(&self) -> usize {
        self.inner.slots()
    }

    /// Total slots (one more than the usable capacity)
    pub fn capacity(&self) -> usize {
        self.inner.buffer().capacity() + 1
    }
}

/// Reading half, owned by the analysis thread
pub struct Consumer<T> {
    inner: rtrb::Consumer<T>,
}

impl<T: Copy> Consumer<T> {
    /// Fill all of `out`, or read nothing if not enough data is queued
    pub fn read(&mut self, out: &mut [T]) -> bool {
        self.inner.pop_entire_slice(out).is_ok()
    }

    /// Drop everything currently queued
    pub fn discard_all(&mut self) {
        let queued = self.inner.slots();
        if let Ok(chunk) = self.inner.read_chunk(queued) {
            chunk.commit_all();
        }
    }

    /// Items currently queued
    pub fn available(&self) -> usize {
        self.inner.slots()
    }

    /// Items that could be written right now
    pub fn space(&self) -> usize {
        self.inner.buffer().capacity() - self.inner.slots()
    }

    /// Total slots (one more than the usable capacity)
    pub fn capacity(&self) -> usize {
        self.inner.buffer().capacity() + 1
    }
}
