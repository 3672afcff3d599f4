//! Canonical Huffman Decode Table Builder
//!
//! Builds multi-level lookup tables from an array of code lengths. Both
//! decoders use the same construction but store different entry encodings,
//! so the builder is generic over [`TableEntry`].
//!
//! # Table Layout
//!
//! ```text
//! entries[0 .. 1<<root]            root table, indexed by the low `root` bits
//! entries[off .. off + (1<<sub)]   sub-table for codes longer than `root`,
//!                                  reached through a link entry in the root
//! ```
//!
//! Short codes are replicated across every root slot they prefix. Codes
//! longer than the root width share a sub-table per root slot; each sub-table
//! is as narrow as the remaining length counts allow. All tables live in a
//! single arena and links carry a [`SubTable`] offset into it.
//!
//! # Validation
//!
//! - Over-subscribed lengths are always rejected.
//! - Incomplete lengths are rejected unless the caller allows them, or the
//!   only code is a single one-bit code. Unused slots decode as invalid.
//! - An all-zero length array yields a one-bit table of invalid entries.
//! - The arena never grows past the caller's capacity bound.

use thiserror::Error;
use tracing::trace;

use crate::error::TableKind;

/// Longest code any supported format uses (Implode goes to 16)
pub const MAX_CODE_BITS: usize = 16;

/// Offset of a sub-table inside a [`HuffmanTable`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubTable(u16);

impl SubTable {
    pub(crate) const fn from_offset(offset: u16) -> Self {
        SubTable(offset)
    }

    #[inline]
    pub fn offset(self) -> usize {
        self.0 as usize
    }
}

/// Constructors a decode table entry type must provide.
///
/// `bits` is always the number of bits the entry consumes at its own level
/// (root bits for a root entry, bits past the root for a sub-table entry).
pub trait TableEntry: Copy {
    fn literal(value: u16, bits: u8) -> Self;
    fn end_of_block(bits: u8) -> Self;
    fn mapped(base: u16, extra: u8, bits: u8) -> Self;
    fn link(sub_bits: u8, root_bits: u8, sub: SubTable) -> Self;
    fn invalid(bits: u8) -> Self;
}

/// Maps a symbol index to `(base, extra_bits)`, or `None` for a symbol that
/// is valid in the length array but must never be decoded.
pub type SymbolLookup = fn(u16) -> Option<(u16, u8)>;

/// How symbols turn into entries
#[derive(Clone, Copy)]
pub enum SymbolClass {
    /// Every symbol is a plain value
    Literals,
    /// Symbols below `end` are plain values, `end` ends a block, and symbols
    /// above it go through `lookup` with index `symbol - end - 1`
    Split { end: u16, lookup: SymbolLookup },
    /// Every symbol goes through the lookup
    Mapped(SymbolLookup),
}

impl SymbolClass {
    #[inline]
    fn entry<E: TableEntry>(&self, symbol: u16, bits: u8) -> E {
        match *self {
            SymbolClass::Literals => E::literal(symbol, bits),
            SymbolClass::Split { end, lookup } => {
                if symbol < end {
                    E::literal(symbol, bits)
                } else if symbol == end {
                    E::end_of_block(bits)
                } else {
                    mapped_entry(lookup, symbol - end - 1, bits)
                }
            }
            SymbolClass::Mapped(lookup) => mapped_entry(lookup, symbol, bits),
        }
    }
}

#[inline]
fn mapped_entry<E: TableEntry>(lookup: SymbolLookup, index: u16, bits: u8) -> E {
    match lookup(index) {
        Some((base, extra)) => E::mapped(base, extra, bits),
        None => E::invalid(bits),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub kind: TableKind,
    /// Requested root width; clamped to the shortest and longest code
    pub root_bits: u8,
    /// Longest length accepted in the input array
    pub max_bits: u8,
    /// Upper bound on arena entries
    pub capacity: usize,
    pub allow_incomplete: bool,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("over-subscribed code lengths")]
    OverSubscribed,
    #[error("incomplete code lengths")]
    Incomplete,
    #[error("code length {0} out of range")]
    LengthOutOfRange(u8),
    #[error("table needs {needed} entries (capacity {capacity})")]
    Capacity { needed: usize, capacity: usize },
}

/// Root table plus chained sub-tables in one arena
#[derive(Debug, Clone)]
pub struct HuffmanTable<E> {
    entries: Vec<E>,
    root_bits: u8,
}

impl<E: TableEntry> HuffmanTable<E> {
    #[inline]
    pub fn root_bits(&self) -> u32 {
        self.root_bits as u32
    }

    /// Root entry for the low `root_bits` of `index`
    #[inline]
    pub fn root(&self, index: u32) -> E {
        self.entries[(index & ((1 << self.root_bits) - 1)) as usize]
    }

    #[inline]
    pub fn sub(&self, sub: SubTable, index: u32) -> E {
        self.entries[sub.offset() + index as usize]
    }

    /// Total arena entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Next canonical code in bit-reversed order
#[inline]
fn next_code(huff: usize, len: usize) -> usize {
    let mut incr = 1usize << (len - 1);
    while huff & incr != 0 {
        incr >>= 1;
    }
    if incr != 0 {
        (huff & (incr - 1)) + incr
    } else {
        0
    }
}

/// Build a decode table for `lens`, where `lens[symbol]` is that symbol's
/// code length and 0 marks an unused symbol.
pub fn build<E: TableEntry>(
    lens: &[u8],
    class: SymbolClass,
    opts: &BuildOptions,
) -> Result<HuffmanTable<E>, BuildError> {
    let max_bits = opts.max_bits as usize;
    debug_assert!(max_bits <= MAX_CODE_BITS);

    // Number of codes of each length
    let mut count = [0u16; MAX_CODE_BITS + 1];
    for &len in lens {
        if len as usize > max_bits {
            return Err(BuildError::LengthOutOfRange(len));
        }
        count[len as usize] += 1;
    }

    let max = match (1..=max_bits).rev().find(|&len| count[len] != 0) {
        Some(max) => max,
        None => {
            trace!(table = %opts.kind, "no codes, built reject-all table");
            return Ok(HuffmanTable {
                entries: vec![E::invalid(1); 2],
                root_bits: 1,
            });
        }
    };
    let min = (1..=max).find(|&len| count[len] != 0).unwrap_or(max);
    let root = (opts.root_bits as usize).clamp(min, max);

    let mut left: i32 = 1;
    for &n in &count[1..=max_bits] {
        left <<= 1;
        left -= n as i32;
        if left < 0 {
            return Err(BuildError::OverSubscribed);
        }
    }
    if left > 0 && !(opts.allow_incomplete || max == 1) {
        return Err(BuildError::Incomplete);
    }

    // Sort symbols by length, stable within a length
    let mut offs = [0u16; MAX_CODE_BITS + 1];
    for len in 1..max_bits {
        offs[len + 1] = offs[len] + count[len];
    }
    let mut work = vec![0u16; lens.len()];
    for (symbol, &len) in lens.iter().enumerate() {
        if len != 0 {
            work[offs[len as usize] as usize] = symbol as u16;
            offs[len as usize] += 1;
        }
    }

    let mut used = 1usize << root;
    if used > opts.capacity {
        return Err(BuildError::Capacity {
            needed: used,
            capacity: opts.capacity,
        });
    }
    let mut entries = vec![E::invalid(root as u8); used];
    let mask = used - 1;

    let mut huff = 0usize; // current code, bit-reversed
    let mut sym = 0usize; // index into work
    let mut len = min;
    let mut next = 0usize; // start of the table being filled
    let mut curr = root; // width of that table
    let mut drop = 0usize; // bits consumed before that table
    let mut low = usize::MAX; // root slot owning the current sub-table

    loop {
        let here: E = class.entry(work[sym], (len - drop) as u8);

        // Replicate across every slot this code prefixes
        let incr = 1usize << (len - drop);
        let size = 1usize << curr;
        let mut fill = size;
        loop {
            fill -= incr;
            entries[next + (huff >> drop) + fill] = here;
            if fill == 0 {
                break;
            }
        }

        huff = next_code(huff, len);
        sym += 1;

        count[len] -= 1;
        if count[len] == 0 {
            if len == max {
                break;
            }
            len = lens[work[sym] as usize] as usize;
        }

        // Open a new sub-table once codes outgrow the root and the root
        // slot changes
        if len > root && (huff & mask) != low {
            if drop == 0 {
                drop = root;
            }
            next += size;

            // Widen until the remaining codes fill it
            curr = len - drop;
            let mut avail: i32 = 1 << curr;
            while curr + drop < max {
                avail -= count[curr + drop] as i32;
                if avail <= 0 {
                    break;
                }
                curr += 1;
                avail <<= 1;
            }

            used += 1 << curr;
            if used > opts.capacity {
                return Err(BuildError::Capacity {
                    needed: used,
                    capacity: opts.capacity,
                });
            }
            entries.resize(used, E::invalid(curr as u8));

            low = huff & mask;
            entries[low] = E::link(curr as u8, root as u8, SubTable::from_offset(next as u16));
        }
    }

    // Mark whatever an incomplete code left unassigned
    while huff != 0 {
        if drop != 0 && (huff & mask) != low {
            drop = 0;
            len = root;
            next = 0;
        }
        entries[next + (huff >> drop)] = E::invalid((len - drop) as u8);
        huff = next_code(huff, len);
    }

    trace!(table = %opts.kind, root, used, "built decode table");
    Ok(HuffmanTable {
        entries,
        root_bits: root as u8,
    })
}
