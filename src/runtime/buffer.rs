//! Per-connection byte queues.
//!
//! Each connection owns two of these: `inbound` holds bytes read from the
//! socket that have not been parsed into a request yet, `outbound` holds
//! encoded responses that have not been flushed to the socket yet.
//!
//! Backed by `BytesMut`, so consuming from the front is an O(1) cursor
//! advance and the space is reclaimed the next time the buffer reserves.
//! Pipelined reads that trim many small frames off the front never shift
//! the remaining bytes one frame at a time.
//!
//! A buffer that grew for one large frame gives the memory back once it
//! drains, so an idle connection does not pin its peak allocation.

use bytes::{Buf, BytesMut};

/// Default initial capacity for a connection buffer.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// A drained buffer that held more than this is reallocated.
const SHRINK_THRESHOLD: usize = 64 * 1024;

/// Append-at-back, consume-from-front byte queue.
#[derive(Debug)]
pub struct ByteBuffer {
    buf: BytesMut,
    /// Capacity to return to once drained.
    initial_capacity: usize,
    /// Most bytes held at once since the last reallocation.
    peak: usize,
}

impl ByteBuffer {
    /// Create an empty buffer with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            initial_capacity: capacity,
            peak: 0,
        }
    }

    /// Append bytes to the logical end.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Remove `n` bytes from the logical front.
    ///
    /// # Panics
    /// Panics if `n` exceeds the number of buffered bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.buf.len(),
            "cannot consume {} bytes from a buffer holding {}",
            n,
            self.buf.len()
        );
        // Encoders write through `buf_mut`, so the peak is sampled here.
        self.peak = self.peak.max(self.buf.len());
        self.buf.advance(n);

        if self.buf.is_empty() && self.peak > SHRINK_THRESHOLD.max(self.initial_capacity) {
            self.buf = BytesMut::with_capacity(self.initial_capacity);
            self.peak = 0;
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// View the buffered bytes in order.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the backing storage, for encoders that write
    /// through `BufMut`.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
