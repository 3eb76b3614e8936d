//! # Circular Buffer
//!
//! Fixed-capacity byte ring used for the receive and transmit directions of a
//! [`SocketTransport`](crate::transport::SocketTransport).
//!
//! The buffer exposes its free space and its contents as one or two
//! contiguous regions (before and after the wrap point) so that vectored
//! socket calls can fill or drain it without an intermediate copy:
//!
//! ```text
//!   head (read)         tail (write)
//!     │                   │
//! ┌───▼───────────────────▼──────────┐
//! │   ░░░░░░░ available ░░░  space   │  head < tail: one read region
//! └──────────────────────────────────┘
//!
//!   tail (write)        head (read)
//!     │                   │
//! ┌───▼───────────────────▼──────────┐
//! │ ░░  space           ░░ available │  wrapped: two read regions
//! └──────────────────────────────────┘
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::BufferError;

/// Fixed-capacity byte ring.
///
/// `available() + space() == capacity()` holds after every operation; writes
/// never let the write cursor lap the read cursor.
#[derive(Debug)]
pub struct CircularBuffer {
    data: Box<[u8]>,
    /// Read cursor.
    head: usize,
    /// Write cursor.
    tail: usize,
    /// Bytes currently held.
    len: usize,
}

impl CircularBuffer {
    /// Allocate a ring of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(CircularBuffer {
            data: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes ready to be read.
    #[inline]
    pub fn available(&self) -> usize {
        self.len
    }

    /// Bytes that can still be written.
    #[inline]
    pub fn space(&self) -> usize {
        self.data.len() - self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Copy as much of `src` as fits. Returns the number of bytes accepted,
    /// which is zero when the buffer is full.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.space());
        if n == 0 {
            return 0;
        }
        let (first, second) = self.write_regions();
        let split = n.min(first.len());
        first[..split].copy_from_slice(&src[..split]);
        second[..n - split].copy_from_slice(&src[split..n]);
        self.advance_tail(n);
        n
    }

    /// Copy all of `src` or nothing.
    pub fn write_all(&mut self, src: &[u8]) -> Result<(), BufferError> {
        if src.len() > self.space() {
            return Err(BufferError::Overflow {
                requested: src.len(),
                space: self.space(),
            });
        }
        self.write(src);
        Ok(())
    }

    /// Remove and return up to `max` bytes.
    pub fn read(&mut self, max: usize) -> Bytes {
        let n = max.min(self.len);
        let mut out = BytesMut::with_capacity(n);
        let (first, second) = self.read_regions();
        let split = n.min(first.len());
        out.extend_from_slice(&first[..split]);
        out.extend_from_slice(&second[..n - split]);
        self.advance_head(n);
        out.freeze()
    }

    /// Remove up to `dst.len()` bytes into `dst`. Returns the count copied.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.peek_into(dst);
        self.advance_head(n);
        n
    }

    /// Copy up to `dst.len()` bytes into `dst` without consuming them.
    pub fn peek_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        let (first, second) = self.read_regions();
        let split = n.min(first.len());
        dst[..split].copy_from_slice(&first[..split]);
        dst[split..n].copy_from_slice(&second[..n - split]);
        n
    }

    /// Held bytes as (pre-wrap, post-wrap) slices. The second slice is empty
    /// unless the data straddles the end of the ring.
    pub fn read_regions(&self) -> (&[u8], &[u8]) {
        if self.len == 0 {
            return (Default::default(), Default::default());
        }
        let (head, tail) = (self.head, self.tail);
        if head < tail {
            (&self.data[head..tail], Default::default())
        } else {
            (&self.data[head..], &self.data[..tail])
        }
    }

    /// Free space as (pre-wrap, post-wrap) slices. Fill them, then call
    /// [`commit`](Self::commit) with the number of bytes written.
    pub fn write_regions(&mut self) -> (&mut [u8], &mut [u8]) {
        if self.is_full() {
            return (Default::default(), Default::default());
        }
        let (head, tail) = (self.head, self.tail);
        if tail >= head {
            let (front, back) = self.data.split_at_mut(tail);
            (back, &mut front[..head])
        } else {
            (&mut self.data[tail..head], Default::default())
        }
    }

    /// Mark `n` bytes of the write regions as filled.
    pub fn commit(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.space() {
            return Err(BufferError::Overflow {
                requested: n,
                space: self.space(),
            });
        }
        self.advance_tail(n);
        Ok(())
    }

    /// Discard `n` bytes from the read side.
    pub fn consume(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.len {
            return Err(BufferError::Underflow {
                requested: n,
                available: self.len,
            });
        }
        self.advance_head(n);
        Ok(())
    }

    /// Drop all held bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    fn advance_tail(&mut self, n: usize) {
        self.tail = (self.tail + n) % self.data.len();
        self.len += n;
    }

    fn advance_head(&mut self, n: usize) {
        self.len -= n;
        if self.len == 0 {
            // Both cursors rewind together so an empty ring never looks wrapped.
            self.head = 0;
            self.tail = 0;
        } else {
            self.head = (self.head + n) % self.data.len();
        }
    }
}
