//! Circular output window
//!
//! Holds the most recent `capacity` bytes of output for back-references.
//! Bytes are produced into the buffer and handed to the sink in whole-buffer
//! chunks: when the write position reaches the end the buffer is flushed and
//! the position wraps to zero. [`SlidingWindow::finish`] flushes the partial
//! remainder once at the end of a stream.
//!
//! Match copies run one byte at a time so that a short distance with a long
//! length replicates the pattern, exactly as an unbounded buffer would.

use std::io::Write;

use crate::error::{PkError, PkResult};

pub struct SlidingWindow {
    buf: Vec<u8>,
    /// Next write position
    pos: usize,
    /// Start of bytes not yet handed to the sink
    flushed: usize,
    /// Set once the buffer has been filled at least once
    wrapped: bool,
    /// Total bytes produced this session
    total: u64,
}

impl SlidingWindow {
    /// Allocate a zero-filled window of `size` bytes
    pub fn new(size: usize) -> PkResult<Self> {
        if size == 0 {
            return Err(PkError::parameter("window size must be non-zero"));
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|e| PkError::memory(format!("cannot allocate {size} byte window: {e}")))?;
        buf.resize(size, 0);
        Ok(Self::from_vec(buf))
    }

    /// Adopt a caller-supplied buffer; its length is the capacity
    pub fn from_vec(buf: Vec<u8>) -> Self {
        debug_assert!(!buf.is_empty());
        Self {
            buf,
            pos: 0,
            flushed: 0,
            wrapped: false,
            total: 0,
        }
    }

    /// Start a new session over the same allocation
    pub fn reset(&mut self) {
        self.pos = 0;
        self.flushed = 0;
        self.wrapped = false;
        self.total = 0;
    }

    /// Reset and zero the history, so early references read zeros
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.reset();
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// How far back a reference may reach: the whole buffer once it has
    /// wrapped, otherwise only what this session produced.
    #[inline]
    pub fn history(&self) -> usize {
        if self.wrapped {
            self.buf.len()
        } else {
            self.pos
        }
    }

    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn push_byte<W: Write>(&mut self, byte: u8, out: &mut W) -> PkResult<()> {
        self.buf[self.pos] = byte;
        self.pos += 1;
        self.total += 1;
        if self.pos == self.buf.len() {
            self.flush_full(out)?;
        }
        Ok(())
    }

    pub fn push_slice<W: Write>(&mut self, mut data: &[u8], out: &mut W) -> PkResult<()> {
        while !data.is_empty() {
            let n = data.len().min(self.buf.len() - self.pos);
            self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
            self.pos += n;
            self.total += n as u64;
            data = &data[n..];
            if self.pos == self.buf.len() {
                self.flush_full(out)?;
            }
        }
        Ok(())
    }

    /// Copy `length` bytes starting `distance` bytes back.
    ///
    /// Only checks the distance against the buffer size; callers that must
    /// not read unproduced bytes compare against [`history`](Self::history).
    pub fn copy_match<W: Write>(
        &mut self,
        distance: usize,
        length: usize,
        out: &mut W,
    ) -> PkResult<()> {
        let cap = self.capacity();
        if distance == 0 || distance > cap {
            return Err(PkError::Data("invalid distance too far back"));
        }
        let mut src = (self.pos + cap - distance) % cap;
        for _ in 0..length {
            let byte = self.buf[src];
            self.push_byte(byte, out)?;
            src += 1;
            if src == cap {
                src = 0;
            }
        }
        Ok(())
    }

    /// Hand any unflushed bytes to the sink
    pub fn finish<W: Write>(&mut self, out: &mut W) -> PkResult<()> {
        if self.pos > self.flushed {
            out.write_all(&self.buf[self.flushed..self.pos])
                .map_err(PkError::Write)?;
            self.flushed = self.pos;
        }
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn flush_full<W: Write>(&mut self, out: &mut W) -> PkResult<()> {
        out.write_all(&self.buf[self.flushed..])
            .map_err(PkError::Write)?;
        self.pos = 0;
        self.flushed = 0;
        self.wrapped = true;
        Ok(())
    }
}
