//! Per-connection read and write buffers.
//!
//! Both buffers are allocated once when the connection is accepted and never
//! grow. They are sized for one maximum frame (`MAX_FRAME`), which is all a
//! connection ever needs: the state machine decodes before it reads again,
//! and only one response is outstanding at a time.
//!
//! ```text
//! ReadBuffer:   [ consumed | pending ............ | spare          ]
//!               0          start                  end              cap
//!
//! WriteBuffer:  [ sent     | unsent ............. | unused         ]
//!               0          sent                   filled           cap
//! ```

use crate::protocols::frame::{self, ProtocolError, MAX_FRAME};

/// Socket read accumulator with a decode cursor.
pub struct ReadBuffer {
    buf: Box<[u8]>,
    /// Decode cursor: bytes before this have been consumed as frames.
    start: usize,
    /// Bytes received from the socket.
    end: usize,
}

impl ReadBuffer {
    /// Create a read buffer holding at most one maximum-sized frame.
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAME)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Advance the decode cursor past `n` consumed bytes.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consumed past filled length");
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move pending bytes to the front so the spare region is contiguous.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.buf.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Free space after the pending bytes, for the next socket read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }

    /// Record that `n` bytes were read into [`spare_mut`](Self::spare_mut).
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.buf.len(), "commit past capacity");
        self.end += n;
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one encoded response while it drains to the socket.
pub struct WriteBuffer {
    buf: Box<[u8]>,
    /// Bytes already accepted by the socket.
    sent: usize,
    /// Length of the encoded response.
    filled: usize,
}

impl WriteBuffer {
    /// Create a write buffer holding at most one maximum-sized frame.
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAME)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            sent: 0,
            filled: 0,
        }
    }

    /// Encode `payload` as the next response.
    ///
    /// Fails with `BufferBusy` if the previous response has not been fully
    /// flushed, and with `FrameTooLarge` if the frame does not fit.
    pub fn fill(&mut self, payload: &[u8]) -> Result<usize, ProtocolError> {
        if !self.is_empty() {
            return Err(ProtocolError::BufferBusy);
        }
        let len = frame::encode_into(payload, &mut self.buf)?;
        self.sent = 0;
        self.filled = len;
        Ok(len)
    }

    /// Bytes from the sent offset to the end of the response.
    pub fn unsent(&self) -> &[u8] {
        &self.buf[self.sent..self.filled]
    }

    /// Record that the socket accepted `n` more bytes.
    ///
    /// Returns `true` once the response is fully flushed, at which point the
    /// buffer is empty again.
    pub fn advance(&mut self, n: usize) -> bool {
        debug_assert!(self.sent + n <= self.filled, "advanced past filled length");
        self.sent += n;
        if self.sent == self.filled {
            self.sent = 0;
            self.filled = 0;
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
