//! Deflate64 constant tables
//!
//! Deflate64 keeps the DEFLATE symbol alphabet but reinterprets two codes:
//! length symbol 285 becomes base 3 with 16 extra bits (lengths 3..=65538),
//! and distance symbols 30 and 31 reach back to 65536.
//!
//! The fixed-block Huffman tables are built once per process and shared
//! read-only between sessions.

use std::sync::OnceLock;

use crate::error::TableKind;
use crate::huffman::{self, BuildOptions, HuffmanTable, SubTable, SymbolClass, TableEntry};

/// Window size, also the longest distance
pub const WINDOW_SIZE: usize = 1 << 16;

/// Longest code in any Deflate64 table
pub const MAX_BITS: u8 = 15;

pub const LENGTH_ROOT_BITS: u8 = 9;
pub const DISTANCE_ROOT_BITS: u8 = 6;
pub const CODE_LENGTH_ROOT_BITS: u8 = 7;

/// Worst-case arena sizes for the root widths above
pub const ENOUGH_LENGTHS: usize = 852;
pub const ENOUGH_DISTANCES: usize = 594;
pub const ENOUGH_CODE_LENGTHS: usize = 1 << CODE_LENGTH_ROOT_BITS;

/// Order in which code-length code lengths are transmitted
pub const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Length symbols 257..=285
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 3,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 16,
];

const DISTANCE_BASE: [u16; 32] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577, 32769, 49153,
];
const DISTANCE_EXTRA: [u8; 32] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13, 14, 14,
];

/// Length symbol `257 + index`; symbols 286 and 287 have no meaning
pub fn length_code(index: u16) -> Option<(u16, u8)> {
    let i = index as usize;
    Some((*LENGTH_BASE.get(i)?, LENGTH_EXTRA[i]))
}

pub fn distance_code(index: u16) -> Option<(u16, u8)> {
    let i = index as usize;
    Some((*DISTANCE_BASE.get(i)?, DISTANCE_EXTRA[i]))
}

/// Literal/length symbol classes: 0..=255 bytes, 256 end of block
pub const LENGTH_CLASS: SymbolClass = SymbolClass::Split {
    end: 256,
    lookup: length_code,
};
pub const DISTANCE_CLASS: SymbolClass = SymbolClass::Mapped(distance_code);

// =============================================================================
// Table entry encoding
// =============================================================================

/// One decode table entry, packed the classic inflate way.
///
/// `op` values:
/// - `0`: literal byte in `val`
/// - `0000tttt` (non-zero): link to a sub-table `t` bits wide at offset `val`;
///   `bits` holds the root width
/// - `32 | 64`: end of block
/// - `64`: invalid code
/// - `128 | e`: length or distance base `val` followed by `e` extra bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    pub op: u8,
    pub bits: u8,
    pub val: u16,
}

pub const OP_END: u8 = 32;
pub const OP_INVALID: u8 = 64;
pub const OP_BASE: u8 = 128;
pub const EXTRA_MASK: u8 = 31;

impl Code {
    #[inline]
    pub fn is_link(self) -> bool {
        self.op != 0 && self.op & 0xf0 == 0
    }

    #[inline]
    pub fn sub_table(self) -> SubTable {
        SubTable::from_offset(self.val)
    }
}

impl TableEntry for Code {
    fn literal(value: u16, bits: u8) -> Self {
        Code {
            op: 0,
            bits,
            val: value,
        }
    }

    fn end_of_block(bits: u8) -> Self {
        Code {
            op: OP_END | OP_INVALID,
            bits,
            val: 0,
        }
    }

    fn mapped(base: u16, extra: u8, bits: u8) -> Self {
        Code {
            op: OP_BASE | extra,
            bits,
            val: base,
        }
    }

    fn link(sub_bits: u8, root_bits: u8, sub: SubTable) -> Self {
        Code {
            op: sub_bits,
            bits: root_bits,
            val: sub.offset() as u16,
        }
    }

    fn invalid(bits: u8) -> Self {
        Code {
            op: OP_INVALID,
            bits,
            val: 0,
        }
    }
}

pub fn length_options() -> BuildOptions {
    BuildOptions {
        kind: TableKind::LiteralLength,
        root_bits: LENGTH_ROOT_BITS,
        max_bits: MAX_BITS,
        capacity: ENOUGH_LENGTHS,
        allow_incomplete: false,
    }
}

pub fn distance_options() -> BuildOptions {
    BuildOptions {
        kind: TableKind::Distance,
        root_bits: DISTANCE_ROOT_BITS,
        max_bits: MAX_BITS,
        capacity: ENOUGH_DISTANCES,
        allow_incomplete: false,
    }
}

pub fn code_length_options() -> BuildOptions {
    BuildOptions {
        kind: TableKind::CodeLengths,
        root_bits: CODE_LENGTH_ROOT_BITS,
        max_bits: 7,
        capacity: ENOUGH_CODE_LENGTHS,
        allow_incomplete: true,
    }
}

// =============================================================================
// Fixed block tables
// =============================================================================

fn fixed_length_lens() -> [u8; 288] {
    let mut lens = [0u8; 288];
    lens[..144].fill(8);
    lens[144..256].fill(9);
    lens[256..280].fill(7);
    lens[280..].fill(8);
    lens
}

/// Fixed literal/length table, 9-bit root
pub fn fixed_lengths() -> &'static HuffmanTable<Code> {
    static FIXED_LENGTHS: OnceLock<HuffmanTable<Code>> = OnceLock::new();
    FIXED_LENGTHS.get_or_init(|| {
        let opts = BuildOptions {
            root_bits: 9,
            ..length_options()
        };
        huffman::build(&fixed_length_lens(), LENGTH_CLASS, &opts)
            .expect("fixed literal/length code is complete")
    })
}

/// Fixed distance table, 5-bit root
pub fn fixed_distances() -> &'static HuffmanTable<Code> {
    static FIXED_DISTANCES: OnceLock<HuffmanTable<Code>> = OnceLock::new();
    FIXED_DISTANCES.get_or_init(|| {
        let opts = BuildOptions {
            root_bits: 5,
            ..distance_options()
        };
        huffman::build(&[5u8; 32], DISTANCE_CLASS, &opts)
            .expect("fixed distance code is complete")
    })
}
