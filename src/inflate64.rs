//! Deflate64 (Enhanced Deflate) Decoder
//!
//! A block-at-a-time inflater for ZIP method 9. The stream layout is
//! DEFLATE's, with a 64 KiB window, length symbol 285 carrying 16 extra bits,
//! and distance symbols 30/31 reaching back to 65536.
//!
//! # Architecture
//!
//! ```text
//!   Type ──stored──> Stored ──────────────┐
//!    │  ──fixed───> Len(fixed tables) ────┤
//!    │  ──dynamic─> Table ─> Len(built) ──┤
//!    └──last block done──> Done           └──> Type
//! ```
//!
//! Any malformed field aborts the session with a fixed diagnostic; output
//! flushed before the failure stays with the sink. Bytes are pulled from the
//! input only when a field needs them, so after a clean end the caller's
//! reader sits right after the stream.

use std::io::{BufRead, Write};

use tracing::debug;

use crate::bit_reader::BitReader;
use crate::error::{PkError, PkResult, Status, TableKind};
use crate::huffman::{self, BuildError, HuffmanTable, SymbolClass};
use crate::inflate64_tables::{
    code_length_options, distance_options, fixed_distances, fixed_lengths, length_options, Code,
    CODE_LENGTH_ORDER, DISTANCE_CLASS, EXTRA_MASK, LENGTH_CLASS, OP_END, OP_INVALID, WINDOW_SIZE,
};
use crate::window::SlidingWindow;

/// Block counts by type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounts {
    pub stored: u32,
    pub fixed: u32,
    pub dynamic: u32,
}

/// Result of one successful [`Inflate64::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inflate64Summary {
    /// Compressed bytes taken from the input
    pub bytes_consumed: u64,
    pub bytes_written: u64,
    pub blocks: BlockCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Next block header
    Type,
    Stored,
    /// Dynamic block table description
    Table,
    /// Compressed data with the fixed or the freshly built tables
    Len { fixed: bool },
    Done,
}

/// Literal/length and distance tables of a dynamic block
struct DynamicTables {
    lengths: HuffmanTable<Code>,
    distances: HuffmanTable<Code>,
}

/// Deflate64 decode session.
///
/// Owns the 64 KiB window. Each [`run`](Self::run) decodes one complete
/// stream and reuses the allocation.
pub struct Inflate64 {
    window: SlidingWindow,
    status: Status,
    message: Option<&'static str>,
}

impl Inflate64 {
    pub fn new() -> PkResult<Self> {
        Ok(Self::from_window(SlidingWindow::new(WINDOW_SIZE)?))
    }

    /// Adopt a caller-allocated window, which must be exactly 64 KiB
    pub fn with_window(buf: Vec<u8>) -> PkResult<Self> {
        if buf.len() != WINDOW_SIZE {
            return Err(PkError::parameter(format!(
                "Deflate64 window must be {} bytes, got {}",
                WINDOW_SIZE,
                buf.len()
            )));
        }
        Ok(Self::from_window(SlidingWindow::from_vec(buf)))
    }

    fn from_window(window: SlidingWindow) -> Self {
        Self {
            window,
            status: Status::Ok,
            message: None,
        }
    }

    /// Outcome of the last run
    pub fn status(&self) -> Status {
        self.status
    }

    /// Diagnostic for the first data error of the last run
    pub fn message(&self) -> Option<&'static str> {
        self.message
    }

    /// Tear down the session and hand back the window buffer
    pub fn into_window(self) -> Vec<u8> {
        self.window.into_inner()
    }

    /// Decode one Deflate64 stream from `input` into `output`
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        input: R,
        mut output: W,
    ) -> PkResult<Inflate64Summary> {
        self.window.reset();
        self.status = Status::Ok;
        self.message = None;

        let mut bits = BitReader::new(input);
        let mut blocks = BlockCounts::default();

        match self.decode(&mut bits, &mut output, &mut blocks) {
            Ok(()) => {
                self.status = Status::StreamEnd;
                let summary = Inflate64Summary {
                    bytes_consumed: bits.consumed(),
                    bytes_written: self.window.bytes_written(),
                    blocks,
                };
                debug!(
                    consumed = summary.bytes_consumed,
                    written = summary.bytes_written,
                    "deflate64 stream end"
                );
                Ok(summary)
            }
            Err(err) => {
                if let PkError::Data(msg) = &err {
                    self.message.get_or_insert(*msg);
                }
                self.status = err.status();
                debug!(
                    consumed = bits.consumed(),
                    written = self.window.bytes_written(),
                    error = %err,
                    "deflate64 stream failed"
                );
                Err(err)
            }
        }
    }

    fn decode<R: BufRead, W: Write>(
        &mut self,
        bits: &mut BitReader<R>,
        out: &mut W,
        blocks: &mut BlockCounts,
    ) -> PkResult<()> {
        let mut mode = Mode::Type;
        let mut last = false;
        let mut dynamic: Option<DynamicTables> = None;

        loop {
            mode = match mode {
                Mode::Type => {
                    if last {
                        Mode::Done
                    } else {
                        let header = bits.take(3)?;
                        last = header & 1 != 0;
                        match header >> 1 {
                            0 => {
                                blocks.stored += 1;
                                Mode::Stored
                            }
                            1 => {
                                blocks.fixed += 1;
                                debug!(last, "fixed block");
                                Mode::Len { fixed: true }
                            }
                            2 => {
                                blocks.dynamic += 1;
                                Mode::Table
                            }
                            _ => return Err(PkError::Data("invalid block type")),
                        }
                    }
                }
                Mode::Stored => {
                    bits.align_to_byte();
                    let lengths = bits.take(32)?;
                    let len = lengths & 0xffff;
                    if len != (lengths >> 16) ^ 0xffff {
                        return Err(PkError::Data("invalid stored block lengths"));
                    }
                    debug!(last, len, "stored block");
                    bits.copy_aligned(len as usize, &mut self.window, out)?;
                    Mode::Type
                }
                Mode::Table => {
                    dynamic = Some(read_tables(bits)?);
                    Mode::Len { fixed: false }
                }
                Mode::Len { fixed } => {
                    let (lengths, distances) = match (&dynamic, fixed) {
                        (Some(tables), false) => (&tables.lengths, &tables.distances),
                        _ => (fixed_lengths(), fixed_distances()),
                    };
                    inflate_codes(bits, &mut self.window, out, lengths, distances)?;
                    Mode::Type
                }
                Mode::Done => {
                    self.window.finish(out)?;
                    out.flush().map_err(PkError::Write)?;
                    return Ok(());
                }
            };
        }
    }
}

fn table_error(err: BuildError, table: TableKind, msg: &'static str) -> PkError {
    match err {
        BuildError::Capacity { needed, capacity } => PkError::Capacity {
            table,
            needed,
            capacity,
        },
        _ => PkError::Data(msg),
    }
}

/// Read a dynamic block's code length description and build its tables
fn read_tables<R: BufRead>(bits: &mut BitReader<R>) -> PkResult<DynamicTables> {
    let nlen = bits.take(5)? as usize + 257;
    let ndist = bits.take(5)? as usize + 1;
    let ncode = bits.take(4)? as usize + 4;
    if nlen > 286 {
        return Err(PkError::Data("too many length symbols"));
    }

    let mut lens = [0u8; 286 + 32];
    for &slot in CODE_LENGTH_ORDER.iter().take(ncode) {
        lens[slot] = bits.take(3)? as u8;
    }
    let codes: HuffmanTable<Code> =
        huffman::build(&lens[..19], SymbolClass::Literals, &code_length_options())
            .map_err(|e| table_error(e, TableKind::CodeLengths, "invalid code lengths set"))?;

    let total = nlen + ndist;
    let mut have = 0;
    while have < total {
        let here = decode_symbol(bits, &codes)?;
        if here.op & OP_INVALID != 0 {
            return Err(PkError::Data("invalid code length code"));
        }
        let symbol = here.val;
        if symbol < 16 {
            lens[have] = symbol as u8;
            have += 1;
            continue;
        }

        let (value, repeat) = match symbol {
            16 => {
                if have == 0 {
                    return Err(PkError::Data("invalid bit length repeat"));
                }
                (lens[have - 1], 3 + bits.take(2)? as usize)
            }
            17 => (0, 3 + bits.take(3)? as usize),
            _ => (0, 11 + bits.take(7)? as usize),
        };
        if have + repeat > total {
            return Err(PkError::Data("invalid bit length repeat"));
        }
        lens[have..have + repeat].fill(value);
        have += repeat;
    }

    if lens[256] == 0 {
        return Err(PkError::Data("invalid code -- missing end-of-block"));
    }

    let lengths = huffman::build(&lens[..nlen], LENGTH_CLASS, &length_options())
        .map_err(|e| table_error(e, TableKind::LiteralLength, "invalid literal/lengths set"))?;
    let distances = huffman::build(&lens[nlen..total], DISTANCE_CLASS, &distance_options())
        .map_err(|e| table_error(e, TableKind::Distance, "invalid distances set"))?;

    debug!(nlen, ndist, ncode, "dynamic block");
    Ok(DynamicTables { lengths, distances })
}

/// Decode one symbol, following a sub-table link if the root entry has one
#[inline]
fn decode_symbol<R: BufRead>(
    bits: &mut BitReader<R>,
    table: &HuffmanTable<Code>,
) -> PkResult<Code> {
    let root = table.root_bits();
    let mut here = loop {
        let here = table.root(bits.peek(root));
        if here.bits as u32 <= bits.available() {
            break here;
        }
        bits.pull_byte()?;
    };

    if here.is_link() {
        let link = here;
        let width = link.bits as u32 + link.op as u32;
        here = loop {
            let here = table.sub(link.sub_table(), bits.peek(width) >> link.bits);
            if link.bits as u32 + here.bits as u32 <= bits.available() {
                break here;
            }
            bits.pull_byte()?;
        };
        bits.drop_bits(link.bits as u32);
    }

    bits.drop_bits(here.bits as u32);
    Ok(here)
}

/// Decode literals and matches until end of block
fn inflate_codes<R: BufRead, W: Write>(
    bits: &mut BitReader<R>,
    window: &mut SlidingWindow,
    out: &mut W,
    lengths: &HuffmanTable<Code>,
    distances: &HuffmanTable<Code>,
) -> PkResult<()> {
    loop {
        let here = decode_symbol(bits, lengths)?;
        if here.op == 0 {
            window.push_byte(here.val as u8, out)?;
            continue;
        }
        if here.op & OP_END != 0 {
            return Ok(());
        }
        if here.op & OP_INVALID != 0 {
            return Err(PkError::Data("invalid literal/length code"));
        }
        let length = here.val as usize + bits.take((here.op & EXTRA_MASK) as u32)? as usize;

        let here = decode_symbol(bits, distances)?;
        if here.op & OP_INVALID != 0 {
            return Err(PkError::Data("invalid distance code"));
        }
        let distance = here.val as usize + bits.take((here.op & EXTRA_MASK) as u32)? as usize;
        if distance > window.history() {
            return Err(PkError::Data("invalid distance too far back"));
        }

        window.copy_match(distance, length, out)?;
    }
}
