//! PKZIP Implode (method 6) Decoder
//!
//! An imploded member starts with up to three Shannon-Fano tree descriptions
//! followed by a bit stream of literals and matches:
//!
//! ```text
//! [literal tree]   only when general purpose flag bit 2 is set (256 symbols)
//! length tree      64 symbols
//! distance tree    64 symbols
//! repeat until uncompressed_size bytes are out:
//!   1 + literal    raw 8 bits, or a literal tree code
//!   0 + match      6/7 low distance bits, distance code, length code,
//!                  8 more length bits after the top length code
//! ```
//!
//! Tree descriptions are byte-packed run lengths: one byte holding the pair
//! count minus one, then one byte per run with `count - 1` in the high nibble
//! and `length - 1` in the low nibble. Codes are stored bit-complemented.
//!
//! Failures collapse into one [`PkError::Explode`] with a sub-code; the
//! counters stay readable afterwards for cross-checking against the archive.

use std::io::{BufRead, Write};

use tracing::debug;

use crate::bit_reader::BitReader;
use crate::error::{ExplodeCode, PkError, PkResult, TableKind};
use crate::huffman::{
    self, BuildError, BuildOptions, HuffmanTable, SubTable, SymbolClass, TableEntry,
};
use crate::window::SlidingWindow;

const LITERAL_SYMBOLS: usize = 256;
const LENGTH_SYMBOLS: usize = 64;
const DISTANCE_SYMBOLS: usize = 64;

const LITERAL_ROOT_BITS: u8 = 9;
const LENGTH_ROOT_BITS: u8 = 7;
const MAX_BITS: u8 = 16;

/// Compressed size above which the distance table gets an 8-bit root
const LARGE_INPUT: u64 = 200_000;

/// Sliding dictionary size, ZIP general purpose flag bit 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionarySize {
    Size4K,
    Size8K,
}

impl DictionarySize {
    pub fn bytes(self) -> usize {
        match self {
            DictionarySize::Size4K => 4096,
            DictionarySize::Size8K => 8192,
        }
    }

    /// Raw low distance bits ahead of each distance code
    fn low_bits(self) -> u32 {
        match self {
            DictionarySize::Size4K => 6,
            DictionarySize::Size8K => 7,
        }
    }
}

/// Per-member Implode configuration from archive metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplodeParams {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub dictionary: DictionarySize,
    /// Literals are Huffman coded rather than raw bytes
    pub literal_tree: bool,
    /// Reproduce PKZIP 1.01/1.02, which picks the minimum match length from
    /// the dictionary size instead of the literal tree flag
    pub pkzip10x_compat: bool,
}

impl ExplodeParams {
    pub fn new(compressed_size: u64, uncompressed_size: u64) -> Self {
        Self {
            compressed_size,
            uncompressed_size,
            dictionary: DictionarySize::Size4K,
            literal_tree: false,
            pkzip10x_compat: false,
        }
    }

    /// Read dictionary size (bit 1) and literal tree (bit 2) from a ZIP
    /// general purpose flag word
    pub fn from_zip_flags(flags: u16, compressed_size: u64, uncompressed_size: u64) -> Self {
        let dictionary = if flags & 0x02 != 0 {
            DictionarySize::Size8K
        } else {
            DictionarySize::Size4K
        };
        Self::new(compressed_size, uncompressed_size)
            .with_dictionary(dictionary)
            .with_literal_tree(flags & 0x04 != 0)
    }

    pub fn with_dictionary(mut self, dictionary: DictionarySize) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn with_literal_tree(mut self, literal_tree: bool) -> Self {
        self.literal_tree = literal_tree;
        self
    }

    pub fn with_pkzip10x_compat(mut self, compat: bool) -> Self {
        self.pkzip10x_compat = compat;
        self
    }

    /// Shortest match the length tree encodes
    pub fn min_match(&self) -> u16 {
        let long = if self.pkzip10x_compat {
            self.dictionary == DictionarySize::Size8K
        } else {
            self.literal_tree
        };
        if long {
            3
        } else {
            2
        }
    }

    fn distance_root_bits(&self) -> u8 {
        if self.compressed_size > LARGE_INPUT {
            8
        } else {
            7
        }
    }
}

// =============================================================================
// Tree tables
// =============================================================================

/// Decode table entry for the Implode trees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeEntry {
    /// Literal byte, or a length/distance base with trailing raw bits
    Value { value: u16, extra: u8, bits: u8 },
    Link { sub_bits: u8, root_bits: u8, sub: SubTable },
    Invalid { bits: u8 },
}

impl TreeEntry {
    #[inline]
    fn bits(self) -> u32 {
        match self {
            TreeEntry::Value { bits, .. } | TreeEntry::Invalid { bits } => bits as u32,
            TreeEntry::Link { root_bits, .. } => root_bits as u32,
        }
    }
}

impl TableEntry for TreeEntry {
    fn literal(value: u16, bits: u8) -> Self {
        TreeEntry::Value {
            value,
            extra: 0,
            bits,
        }
    }

    fn end_of_block(bits: u8) -> Self {
        // No Implode tree has an end-of-block symbol
        TreeEntry::Invalid { bits }
    }

    fn mapped(base: u16, extra: u8, bits: u8) -> Self {
        TreeEntry::Value {
            value: base,
            extra,
            bits,
        }
    }

    fn link(sub_bits: u8, root_bits: u8, sub: SubTable) -> Self {
        TreeEntry::Link {
            sub_bits,
            root_bits,
            sub,
        }
    }

    fn invalid(bits: u8) -> Self {
        TreeEntry::Invalid { bits }
    }
}

type Tree = HuffmanTable<TreeEntry>;

#[inline]
fn match_length(index: u16, min_match: u16) -> Option<(u16, u8)> {
    (index < LENGTH_SYMBOLS as u16).then(|| (min_match + index, if index == 63 { 8 } else { 0 }))
}

fn length_min2(index: u16) -> Option<(u16, u8)> {
    match_length(index, 2)
}

fn length_min3(index: u16) -> Option<(u16, u8)> {
    match_length(index, 3)
}

/// High distance bits for the 4K dictionary; the low 6 come raw
fn distance_4k(index: u16) -> Option<(u16, u8)> {
    (index < DISTANCE_SYMBOLS as u16).then(|| (1 + (index << 6), 0))
}

fn distance_8k(index: u16) -> Option<(u16, u8)> {
    (index < DISTANCE_SYMBOLS as u16).then(|| (1 + (index << 7), 0))
}

/// Largest arena a complete code over `symbols` can need: the root, plus at
/// most one sub-table per root slot, none wider than `MAX_BITS - root`.
fn tree_capacity(root_bits: u8, symbols: usize) -> usize {
    let root = 1usize << root_bits;
    root + symbols.min(root) * (1usize << (MAX_BITS - root_bits))
}

/// Read a run-length tree description into one code length per symbol
fn read_lengths<R: BufRead>(bits: &mut BitReader<R>, symbols: usize) -> PkResult<Vec<u8>> {
    let runs = bits.take(8)? as usize + 1;
    let mut lens = Vec::with_capacity(symbols);
    for _ in 0..runs {
        let byte = bits.take(8)?;
        let len = (byte & 0x0f) as u8 + 1;
        let count = (byte >> 4) as usize + 1;
        if lens.len() + count > symbols {
            return Err(PkError::Data("tree description overruns its symbols"));
        }
        lens.resize(lens.len() + count, len);
    }
    if lens.len() != symbols {
        return Err(PkError::Data("tree description is short"));
    }
    Ok(lens)
}

fn read_tree<R: BufRead>(
    bits: &mut BitReader<R>,
    kind: TableKind,
    symbols: usize,
    root_bits: u8,
    class: SymbolClass,
) -> PkResult<Tree> {
    let lens = read_lengths(bits, symbols)?;
    let opts = BuildOptions {
        kind,
        root_bits,
        max_bits: MAX_BITS,
        capacity: tree_capacity(root_bits, symbols),
        allow_incomplete: false,
    };
    huffman::build(&lens, class, &opts).map_err(|err| match err {
        BuildError::Capacity { needed, capacity } => PkError::Capacity {
            table: kind,
            needed,
            capacity,
        },
        _ => PkError::Data("invalid tree code lengths"),
    })
}

/// Decode one complemented code, returning `(value, extra_bits)`
#[inline]
fn decode<R: BufRead>(bits: &mut BitReader<R>, tree: &Tree) -> PkResult<(u16, u8)> {
    let root = tree.root_bits();
    let mut entry = loop {
        let entry = tree.root(bits.peek_inverted(root));
        if entry.bits() <= bits.available() {
            break entry;
        }
        bits.pull_byte()?;
    };

    if let TreeEntry::Link {
        sub_bits,
        root_bits,
        sub,
    } = entry
    {
        let skip = root_bits as u32;
        let width = skip + sub_bits as u32;
        entry = loop {
            let entry = tree.sub(sub, bits.peek_inverted(width) >> skip);
            if skip + entry.bits() <= bits.available() {
                break entry;
            }
            bits.pull_byte()?;
        };
        bits.drop_bits(skip);
    }

    match entry {
        TreeEntry::Value { value, extra, bits: n } => {
            bits.drop_bits(n as u32);
            Ok((value, extra))
        }
        _ => Err(PkError::Data("invalid code")),
    }
}

// =============================================================================
// Session
// =============================================================================

/// Implode decode session for one archive member
pub struct Exploder {
    params: ExplodeParams,
    window: SlidingWindow,
    error: Option<ExplodeCode>,
    consumed: u64,
    written: u64,
}

impl Exploder {
    pub fn new(params: ExplodeParams) -> PkResult<Self> {
        Ok(Self {
            window: SlidingWindow::new(params.dictionary.bytes())?,
            params,
            error: None,
            consumed: 0,
            written: 0,
        })
    }

    pub fn params(&self) -> &ExplodeParams {
        &self.params
    }

    /// Failure sub-code of the last run
    pub fn error(&self) -> Option<ExplodeCode> {
        self.error
    }

    /// Compressed bytes taken, never more than `compressed_size`
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed.min(self.params.compressed_size)
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Decode the member. Reads at most `compressed_size` bytes from `input`
    /// and writes exactly `uncompressed_size` bytes on success.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> PkResult<()> {
        self.window.clear();
        self.error = None;
        self.consumed = 0;
        self.written = 0;

        debug!(
            compressed = self.params.compressed_size,
            uncompressed = self.params.uncompressed_size,
            dictionary = self.params.dictionary.bytes(),
            literal_tree = self.params.literal_tree,
            min_match = self.params.min_match(),
            "explode start"
        );

        let mut bits = BitReader::new(input.take(self.params.compressed_size));
        let result = self.explode(&mut bits, &mut output);
        self.consumed = bits.consumed();
        self.written = self.window.bytes_written();

        if let Err(err) = result {
            let code = match &err {
                PkError::InputExhausted => ExplodeCode::InsufficientData,
                PkError::Read(_) | PkError::Write(_) => ExplodeCode::Io,
                _ => ExplodeCode::BadData,
            };
            self.error.get_or_insert(code);
            debug!(
                consumed = self.bytes_consumed(),
                written = self.written,
                error = %err,
                "explode failed"
            );
            return Err(PkError::Explode(code));
        }

        debug!(
            consumed = self.bytes_consumed(),
            written = self.written,
            "explode done"
        );
        Ok(())
    }

    fn explode<R: BufRead, W: Write>(
        &mut self,
        bits: &mut BitReader<R>,
        out: &mut W,
    ) -> PkResult<()> {
        let params = self.params;

        let literals = if params.literal_tree {
            Some(read_tree(
                bits,
                TableKind::ImplodeLiteral,
                LITERAL_SYMBOLS,
                LITERAL_ROOT_BITS,
                SymbolClass::Literals,
            )?)
        } else {
            None
        };
        let length_class = if params.min_match() == 3 {
            SymbolClass::Mapped(length_min3)
        } else {
            SymbolClass::Mapped(length_min2)
        };
        let lengths = read_tree(
            bits,
            TableKind::ImplodeLength,
            LENGTH_SYMBOLS,
            LENGTH_ROOT_BITS,
            length_class,
        )?;
        let distance_class = match params.dictionary {
            DictionarySize::Size4K => SymbolClass::Mapped(distance_4k),
            DictionarySize::Size8K => SymbolClass::Mapped(distance_8k),
        };
        let distances = read_tree(
            bits,
            TableKind::ImplodeDistance,
            DISTANCE_SYMBOLS,
            params.distance_root_bits(),
            distance_class,
        )?;

        let low_bits = params.dictionary.low_bits();
        let mut remaining = params.uncompressed_size;
        while remaining > 0 {
            if bits.take(1)? != 0 {
                let byte = match &literals {
                    Some(tree) => decode(bits, tree)?.0 as u8,
                    None => bits.take(8)? as u8,
                };
                self.window.push_byte(byte, out)?;
                remaining -= 1;
            } else {
                let low = bits.take(low_bits)?;
                let (base, _) = decode(bits, &distances)?;
                let distance = base as usize + low as usize;

                let (base, extra) = decode(bits, &lengths)?;
                let length = base as u64 + bits.take(extra as u32)? as u64;

                // The last match may run past the declared size
                let n = length.min(remaining);
                self.window.copy_match(distance, n as usize, out)?;
                remaining -= n;
            }
        }

        self.window.finish(out)?;
        out.flush().map_err(PkError::Write)
    }
}
