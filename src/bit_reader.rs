//! Bit accumulator over a pull-style byte source
//!
//! Both decoders read LSB-first bit fields from a `{hold, bits}` register that
//! is refilled one byte at a time from a [`BufRead`]. Bytes are only taken from
//! the source when a field actually needs them, so after a stream ends the
//! source is positioned right after the last byte that carried stream bits.
//!
//! A source that reports end of input while bits are still demanded produces
//! [`PkError::InputExhausted`]; a source error produces [`PkError::Read`].

use std::io::{self, BufRead, Write};

use crate::error::{PkError, PkResult};
use crate::window::SlidingWindow;

/// Bit reader for deflate-family streams
pub struct BitReader<R> {
    input: R,
    /// Pending bits, least significant first
    hold: u64,
    /// Number of valid bits in `hold` (always < 64)
    bits: u32,
    /// Bytes moved out of `input`
    consumed: u64,
}

impl<R: BufRead> BitReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            hold: 0,
            bits: 0,
            consumed: 0,
        }
    }

    /// Number of bits currently buffered
    #[inline]
    pub fn available(&self) -> u32 {
        self.bits
    }

    /// Bytes taken from the source so far
    #[inline]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Load one more byte into the accumulator
    pub fn pull_byte(&mut self) -> PkResult<()> {
        let byte = loop {
            match self.input.fill_buf() {
                Ok(buf) => break buf.first().copied(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PkError::Read(e)),
            }
        };
        let byte = byte.ok_or(PkError::InputExhausted)?;
        self.input.consume(1);
        self.consumed += 1;
        self.hold |= u64::from(byte) << self.bits;
        self.bits += 8;
        Ok(())
    }

    /// Make sure at least `n` bits are buffered
    #[inline]
    pub fn need(&mut self, n: u32) -> PkResult<()> {
        debug_assert!(n <= 32);
        while self.bits < n {
            self.pull_byte()?;
        }
        Ok(())
    }

    /// Low `n` bits of the accumulator, without consuming them.
    /// Bits past `available()` read as zero.
    #[inline]
    pub fn peek(&self, n: u32) -> u32 {
        (self.hold & low_mask(n)) as u32
    }

    /// Complemented low `n` bits; Implode codes are stored inverted.
    /// Bits past `available()` read as one.
    #[inline]
    pub fn peek_inverted(&self, n: u32) -> u32 {
        (!self.hold & low_mask(n)) as u32
    }

    #[inline]
    pub fn drop_bits(&mut self, n: u32) {
        debug_assert!(n <= self.bits);
        self.hold >>= n;
        self.bits -= n;
    }

    /// Read an `n`-bit field (n <= 32)
    #[inline]
    pub fn take(&mut self, n: u32) -> PkResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        self.need(n)?;
        let value = self.peek(n);
        self.drop_bits(n);
        Ok(value)
    }

    /// Discard bits up to the next byte boundary
    #[inline]
    pub fn align_to_byte(&mut self) {
        self.drop_bits(self.bits & 7);
    }

    /// Copy `len` raw bytes into the window. Must be byte-aligned.
    pub fn copy_aligned<W: Write>(
        &mut self,
        mut len: usize,
        window: &mut SlidingWindow,
        out: &mut W,
    ) -> PkResult<()> {
        debug_assert!(self.bits % 8 == 0);

        // Whole bytes already sitting in the accumulator go first
        while len > 0 && self.bits >= 8 {
            window.push_byte(self.hold as u8, out)?;
            self.drop_bits(8);
            len -= 1;
        }

        while len > 0 {
            self.ensure_buffered()?;
            let buf = self.input.fill_buf().map_err(PkError::Read)?;
            let n = buf.len().min(len);
            window.push_slice(&buf[..n], out)?;
            self.input.consume(n);
            self.consumed += n as u64;
            len -= n;
        }
        Ok(())
    }

    /// Block until the source has at least one byte buffered
    fn ensure_buffered(&mut self) -> PkResult<()> {
        loop {
            match self.input.fill_buf() {
                Ok(buf) if buf.is_empty() => return Err(PkError::InputExhausted),
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PkError::Read(e)),
            }
        }
    }
}

#[inline]
fn low_mask(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}
