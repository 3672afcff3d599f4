//! Host glue for ZIP members
//!
//! Container readers locate a member's compressed bytes and metadata, then
//! hand them here. This module picks the codec from the method id, derives
//! Implode parameters from the general purpose flags, and checks the produced
//! output against the declared size and CRC-32.
//!
//! Cancellation is cooperative. A [`CancelToken`] shared with
//! [`CancellableReader`] and [`CancellableWriter`] makes the reader report
//! end of input and the writer refuse bytes, which the decoders surface as
//! buffer errors.

use std::io::{self, BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{PkError, PkResult};
use crate::explode::{ExplodeParams, Exploder};
use crate::inflate64::Inflate64;

/// ZIP compression method ids this crate decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Implode,
    Deflate64,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            6 => CompressionMethod::Implode,
            9 => CompressionMethod::Deflate64,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Implode => 6,
            CompressionMethod::Deflate64 => 9,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Member metadata from the archive directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    pub method: CompressionMethod,
    /// General purpose bit flags
    pub flags: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// See [`ExplodeParams::pkzip10x_compat`]
    pub pkzip10x_compat: bool,
    /// Fail with [`PkError::Checksum`] when the output CRC-32 differs
    pub verify_crc: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            pkzip10x_compat: false,
            verify_crc: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub bytes_consumed: u64,
    pub bytes_written: u64,
    pub crc32: u32,
}

/// Counts and checksums everything that reaches the sink
struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    fn finish(self) -> (u32, u64) {
        (self.hasher.finalize(), self.written)
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decode one member's compressed bytes from `input` into `output`.
///
/// At most `compressed_size` bytes are read. A size disagreement is only
/// logged; a CRC-32 disagreement fails when `verify_crc` is set.
pub fn decode_member<R: BufRead, W: Write>(
    info: &MemberInfo,
    options: &DecodeOptions,
    input: R,
    output: W,
) -> PkResult<DecodeSummary> {
    debug!(
        method = info.method.as_u16(),
        flags = info.flags,
        compressed = info.compressed_size,
        uncompressed = info.uncompressed_size,
        "decoding member"
    );

    let mut sink = CrcWriter::new(output);
    let bytes_consumed = match info.method {
        CompressionMethod::Deflate64 => {
            let mut session = Inflate64::new()?;
            session
                .run(input.take(info.compressed_size), &mut sink)?
                .bytes_consumed
        }
        CompressionMethod::Implode => {
            let params = ExplodeParams::from_zip_flags(
                info.flags,
                info.compressed_size,
                info.uncompressed_size,
            )
            .with_pkzip10x_compat(options.pkzip10x_compat);
            let mut session = Exploder::new(params)?;
            session.run(input, &mut sink)?;
            session.bytes_consumed()
        }
        CompressionMethod::Unknown(id) => return Err(PkError::UnsupportedMethod(id)),
    };

    let (crc32, bytes_written) = sink.finish();
    if bytes_written != info.uncompressed_size {
        warn!(
            declared = info.uncompressed_size,
            actual = bytes_written,
            "member size disagrees with directory"
        );
    }
    if options.verify_crc && crc32 != info.crc32 {
        return Err(PkError::Checksum {
            expected: info.crc32,
            actual: crc32,
        });
    }

    Ok(DecodeSummary {
        bytes_consumed,
        bytes_written,
        crc32,
    })
}

// =============================================================================
// Cancellation
// =============================================================================

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reader that reports end of input once its token is cancelled
pub struct CancellableReader<R> {
    inner: R,
    token: CancelToken,
}

impl<R> CancellableReader<R> {
    pub fn new(inner: R, token: CancelToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Ok(0);
        }
        self.inner.read(buf)
    }
}

impl<R: BufRead> BufRead for CancellableReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.token.is_cancelled() {
            return Ok(&[]);
        }
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

/// Writer that refuses bytes once its token is cancelled
pub struct CancellableWriter<W> {
    inner: W,
    token: CancelToken,
}

impl<W> CancellableWriter<W> {
    pub fn new(inner: W, token: CancelToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CancellableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "decode cancelled"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
