//! Shared test helpers: slice assertions, an LSB-first bit writer, and
//! minimal stream writers for Deflate64 (stored, fixed and hand-built dynamic
//! blocks) and for Implode, whose trees are coded Shannon-Fano style.

use crate::explode::{DictionarySize, ExplodeParams};
use crate::inflate64_tables::{distance_code, length_code, CODE_LENGTH_ORDER};

#[macro_export]
macro_rules! assert_slices_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_slices_eq!($left, $right, "slices differ")
    };
    ($left:expr, $right:expr, $msg:expr) => {{
        let left = &$left[..];
        let right = &$right[..];
        if left != right {
            if left.len() != right.len() {
                panic!(
                    "{}: left len {}, right len {}",
                    $msg,
                    left.len(),
                    right.len()
                );
            }
            let i = left
                .iter()
                .zip(right.iter())
                .position(|(a, b)| a != b)
                .unwrap_or(0);
            let start = i.saturating_sub(16);
            let end = (i + 16).min(left.len());
            panic!(
                "{}: first difference at index {}\n  left:  {:02X?}\n  right: {:02X?}",
                $msg,
                i,
                &left[start..end],
                &right[start..end]
            );
        }
    }};
}

// =============================================================================
// Bit writer
// =============================================================================

/// Packs bit fields least significant bit first
#[derive(Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    n: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `bits` bits of `value`
    pub fn put(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return;
        }
        self.acc |= u64::from(value & (u32::MAX >> (32 - bits))) << self.n;
        self.n += bits;
        while self.n >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.n -= 8;
        }
    }

    /// Append a Huffman code given most significant bit first
    pub fn put_code(&mut self, code: u32, len: u32) {
        self.put(code.reverse_bits() >> (32 - len), len);
    }

    /// Pad with zero bits to a byte boundary
    pub fn align(&mut self) {
        if self.n > 0 {
            self.put(0, 8 - self.n);
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.n, 0);
        self.out.extend_from_slice(bytes);
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.out
    }
}

/// Canonical codes for `lens`, most significant bit first
pub fn canonical_codes(lens: &[u8]) -> Vec<u32> {
    let max = lens.iter().copied().max().unwrap_or(0) as usize;
    let mut count = vec![0u32; max + 1];
    for &len in lens.iter().filter(|&&len| len != 0) {
        count[len as usize] += 1;
    }
    let mut next = vec![0u32; max + 1];
    let mut code = 0u32;
    for bits in 1..=max {
        code = (code + count[bits - 1]) << 1;
        next[bits] = code;
    }
    lens.iter()
        .map(|&len| {
            if len == 0 {
                return 0;
            }
            let c = next[len as usize];
            next[len as usize] += 1;
            c
        })
        .collect()
}

// =============================================================================
// Deflate64 fixed-block writer
// =============================================================================

/// Writes Deflate64 streams made of stored and fixed-Huffman blocks
#[derive(Default)]
pub struct FixedEncoder {
    w: BitWriter,
}

impl FixedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_block(&mut self, last: bool) {
        self.w.put(last as u32, 1);
        self.w.put(1, 2);
    }

    fn symbol(&mut self, symbol: u32) {
        match symbol {
            0..=143 => self.w.put_code(0x30 + symbol, 8),
            144..=255 => self.w.put_code(0x190 + (symbol - 144), 9),
            256..=279 => self.w.put_code(symbol - 256, 7),
            _ => self.w.put_code(0xC0 + (symbol - 280), 8),
        }
    }

    pub fn literal(&mut self, byte: u8) {
        self.symbol(byte as u32);
    }

    pub fn end_block(&mut self) {
        self.symbol(256);
    }

    /// Length 3..=65538, distance 1..=65536
    pub fn copy(&mut self, length: usize, distance: usize) {
        let (index, base, extra) = (0..28u16)
            .filter_map(|i| length_code(i).map(|(b, e)| (i, b as usize, e as u32)))
            .find(|&(_, b, e)| length >= b && length - b < (1 << e).max(1))
            .unwrap_or((28, 3, 16));
        self.symbol(257 + index as u32);
        self.w.put((length - base) as u32, extra);

        let (index, base, extra) = (0..32u16)
            .filter_map(|i| distance_code(i).map(|(b, e)| (i, b as usize, e as u32)))
            .find(|&(_, b, e)| distance >= b && distance - b < (1 << e))
            .expect("distance in range");
        self.w.put_code(index as u32, 5);
        self.w.put((distance - base) as u32, extra);
    }

    pub fn stored_block(&mut self, last: bool, data: &[u8]) {
        assert!(data.len() <= 0xffff);
        self.w.put(last as u32, 1);
        self.w.put(0, 2);
        self.w.align();
        self.w.put(data.len() as u32, 16);
        self.w.put(!(data.len() as u32) & 0xffff, 16);
        self.w.put_bytes(data);
    }

    /// Raw access for hand-built dynamic blocks
    pub fn bits(&mut self) -> &mut BitWriter {
        &mut self.w
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.finish()
    }
}

/// Dynamic block header for the given literal/length and distance code
/// lengths. The code length code gives symbols 0-15 four bits each, so every
/// length is sent as its own value with code `len`.
pub fn dynamic_header(w: &mut BitWriter, last: bool, lit_lens: &[u8], dist_lens: &[u8]) {
    assert!((257..=286).contains(&lit_lens.len()));
    assert!((1..=32).contains(&dist_lens.len()));
    w.put(last as u32, 1);
    w.put(2, 2);
    w.put((lit_lens.len() - 257) as u32, 5);
    w.put((dist_lens.len() - 1) as u32, 5);
    w.put(15, 4); // all 19 code length codes
    for &slot in CODE_LENGTH_ORDER.iter() {
        w.put(if slot < 16 { 4 } else { 0 }, 3);
    }
    for &len in lit_lens.iter().chain(dist_lens) {
        debug_assert!(len < 16);
        w.put_code(len as u32, 4);
    }
}

// =============================================================================
// Implode writer
// =============================================================================

/// Run-length tree description for a list of code lengths (1..=16)
pub fn describe_tree(lens: &[u8]) -> Vec<u8> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < lens.len() {
        let len = lens[i];
        let mut count = 1;
        while i + count < lens.len() && lens[i + count] == len && count < 16 {
            count += 1;
        }
        runs.push((((count - 1) as u8) << 4) | (len - 1));
        i += count;
    }
    let mut out = vec![(runs.len() - 1) as u8];
    out.extend(runs);
    out
}

/// Shannon-Fano codes as PKWARE's APPNOTE generates them for imploded
/// trees: stable ascending sort by bit length, then walk from the last
/// entry giving each the running code left-aligned in 16 bits, stepping by
/// `1 << (16 - len)`. The result is bit-reversed so it can be written least
/// significant bit first.
pub fn shannon_fano_codes(lens: &[u8]) -> Vec<u16> {
    let mut order: Vec<usize> = (0..lens.len()).collect();
    order.sort_by_key(|&i| lens[i]);

    let mut codes = vec![0u16; lens.len()];
    let mut code = 0u32;
    let mut increment = 0u32;
    let mut last_len = 0u8;
    for &symbol in order.iter().rev() {
        code += increment;
        let len = lens[symbol];
        if len != last_len {
            last_len = len;
            increment = 1 << (16 - len as u32);
        }
        codes[symbol] = (code as u16).reverse_bits();
    }
    codes
}

struct Coder {
    lens: Vec<u8>,
    codes: Vec<u16>,
}

impl Coder {
    fn new(lens: &[u8]) -> Self {
        Self {
            lens: lens.to_vec(),
            codes: shannon_fano_codes(lens),
        }
    }

    fn put(&self, w: &mut BitWriter, symbol: usize) {
        w.put(self.codes[symbol] as u32, self.lens[symbol] as u32);
    }
}

/// Writes an Implode member given its trees
pub struct ImplodeWriter {
    w: BitWriter,
    literals: Option<Coder>,
    lengths: Coder,
    distances: Coder,
    low_bits: u32,
    min_match: usize,
}

impl ImplodeWriter {
    pub fn new(
        params: &ExplodeParams,
        literal_lens: Option<&[u8]>,
        length_lens: &[u8],
        distance_lens: &[u8],
    ) -> Self {
        assert_eq!(literal_lens.is_some(), params.literal_tree);
        let mut w = BitWriter::new();
        for lens in literal_lens.into_iter().chain([length_lens, distance_lens]) {
            for byte in describe_tree(lens) {
                w.put(byte as u32, 8);
            }
        }
        Self {
            w,
            literals: literal_lens.map(Coder::new),
            lengths: Coder::new(length_lens),
            distances: Coder::new(distance_lens),
            low_bits: match params.dictionary {
                DictionarySize::Size4K => 6,
                DictionarySize::Size8K => 7,
            },
            min_match: params.min_match() as usize,
        }
    }

    pub fn literal(&mut self, byte: u8) {
        self.w.put(1, 1);
        match &self.literals {
            Some(coder) => coder.put(&mut self.w, byte as usize),
            None => self.w.put(byte as u32, 8),
        }
    }

    pub fn copy(&mut self, length: usize, distance: usize) {
        assert!(length >= self.min_match && length <= self.max_match());
        self.w.put(0, 1);
        let d = distance - 1;
        self.w.put((d & ((1 << self.low_bits) - 1)) as u32, self.low_bits);
        self.distances.put(&mut self.w, d >> self.low_bits);
        let l = length - self.min_match;
        if l >= 63 {
            self.lengths.put(&mut self.w, 63);
            self.w.put((l - 63) as u32, 8);
        } else {
            self.lengths.put(&mut self.w, l);
        }
    }

    pub fn max_match(&self) -> usize {
        self.min_match + 63 + 255
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.finish()
    }
}

/// Greedy Implode encoding of `data` with a last-occurrence hash on 3-byte
/// prefixes. Good enough to exercise every decode path.
pub fn implode_greedy(
    data: &[u8],
    params: &ExplodeParams,
    literal_lens: Option<&[u8]>,
    length_lens: &[u8],
    distance_lens: &[u8],
) -> Vec<u8> {
    let mut w = ImplodeWriter::new(params, literal_lens, length_lens, distance_lens);
    let window = params.dictionary.bytes();
    let min_match = params.min_match() as usize;
    let max_match = w.max_match();
    let mut last_seen = vec![usize::MAX; 1 << 16];
    let hash = |p: usize| {
        ((data[p] as usize) << 8 ^ (data[p + 1] as usize) << 4 ^ data[p + 2] as usize) & 0xffff
    };

    let mut pos = 0;
    while pos < data.len() {
        let mut best = 0;
        let mut best_distance = 0;
        if pos + 3 <= data.len() {
            let h = hash(pos);
            let candidate = last_seen[h];
            last_seen[h] = pos;
            if candidate != usize::MAX && pos - candidate <= window {
                let limit = (data.len() - pos).min(max_match);
                let len = (0..limit)
                    .take_while(|&i| data[candidate + i] == data[pos + i])
                    .count();
                if len >= min_match {
                    best = len;
                    best_distance = pos - candidate;
                }
            }
        }

        if best > 0 {
            w.copy(best, best_distance);
            pos += best;
        } else {
            w.literal(data[pos]);
            pos += 1;
        }
    }
    w.finish()
}

/// Pseudo-random English-like text from a small vocabulary
pub fn word_text(len: usize, seed: u64) -> Vec<u8> {
    const WORDS: &[&str] = &[
        "the", "window", "archive", "member", "deflate", "implode", "table", "code", "length",
        "distance", "literal", "block", "stream", "header", "tree", "symbol", "match", "byte",
        "root", "bits", "of", "and", "a", "to", "in", "is", "for", "with", "on", "that", "by",
        "from", "copy", "fixed", "stored", "dynamic", "end", "read", "write", "buffer", "reader",
        "writer", "zip", "pkware", "sixty", "four", "kilobyte", "history", "prefix", "huffman",
    ];
    let mut state = seed;
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let word = WORDS[(state >> 33) as usize % WORDS.len()];
        out.extend_from_slice(word.as_bytes());
        out.push(if (state >> 20) % 13 == 0 { b'\n' } else { b' ' });
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_writer_order() {
        let mut w = BitWriter::new();
        w.put(0b1, 1);
        w.put(0b10, 2);
        w.put_code(0b110, 3);
        assert_eq!(w.finish(), vec![0b0001_1101]);
    }

    #[test]
    fn test_canonical_codes() {
        // RFC 1951 section 3.2.2 example
        let lens = [3u8, 3, 3, 3, 3, 2, 4, 4];
        assert_eq!(
            canonical_codes(&lens),
            vec![0b010, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111]
        );
    }

    #[test]
    fn test_shannon_fano_worked_example() {
        // Lengths 1, 2, 3, 3 give MSB-first codes 1, 01, 001, 000
        assert_eq!(shannon_fano_codes(&[1, 2, 3, 3]), vec![0b1, 0b10, 0b100, 0b000]);
        // Ties keep file order: the later symbol gets the smaller code
        assert_eq!(shannon_fano_codes(&[2, 2, 2, 2]), vec![0b11, 0b01, 0b10, 0b00]);
    }

    #[test]
    fn test_shannon_fano_is_complemented_canonical() {
        let mut mixed = vec![2u8, 2, 2, 6];
        mixed.resize(64, 8);
        let skewed: Vec<u8> = (0..=255u8)
            .map(|b| match b {
                b' ' | b'a'..=b'o' => 5,
                0..=127 => 8,
                _ => 11,
            })
            .collect();
        // One code of every length, plus a second 16-bit code
        let mut deep: Vec<u8> = (1..=16).collect();
        deep.push(16);

        for lens in [mixed, skewed, vec![6u8; 64], vec![8u8; 256], deep] {
            let canonical = canonical_codes(&lens);
            let shannon = shannon_fano_codes(&lens);
            for (i, &len) in lens.iter().enumerate() {
                let mask = (1u32 << len) - 1;
                let msb_first = u32::from(shannon[i].reverse_bits()) >> (16 - len as u32);
                assert_eq!(msb_first, !canonical[i] & mask, "symbol {i} of {}", lens.len());
            }
        }
    }
}
