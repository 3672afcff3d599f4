//! pkinflate - Deflate64 and PKZIP Implode decoders
//!
//! Decoders for the two legacy ZIP compression methods that general purpose
//! inflaters skip: Deflate64 ("enhanced deflate", method 9) and Implode
//! (method 6). Both stream from a [`std::io::BufRead`] into a
//! [`std::io::Write`], keep their history in a single sliding window, and
//! never read past the end of the compressed member.
//!
//! # Architecture
//!
//! ```text
//!   adapter ──method 9──> inflate64 ──┐
//!      │                              ├──> bit_reader, huffman, window
//!      └────method 6──> explode ──────┘
//! ```
//!
//! Container parsing stays with the caller; [`adapter::decode_member`] takes
//! the member's directory metadata and checks the output against it.

#[cfg(test)]
#[macro_use]
mod test_utils;

pub mod adapter;
pub mod bit_reader;
pub mod error;
pub mod explode;
pub mod huffman;
pub mod inflate64;
pub mod inflate64_tables;
pub mod window;


pub use adapter::{
    decode_member, CancelToken, CancellableReader, CancellableWriter, CompressionMethod,
    DecodeOptions, DecodeSummary, MemberInfo,
};
pub use error::{ExplodeCode, PkError, PkResult, Status, TableKind};
pub use explode::{DictionarySize, ExplodeParams, Exploder};
pub use inflate64::{BlockCounts, Inflate64, Inflate64Summary};

/// Decode a complete Deflate64 stream held in memory
pub fn inflate64(data: &[u8]) -> PkResult<Vec<u8>> {
    let mut session = Inflate64::new()?;
    let mut out = Vec::new();
    session.run(data, &mut out)?;
    Ok(out)
}

/// Decode a complete Implode member held in memory.
///
/// A zero `compressed_size` in `params` means "all of `data`".
pub fn explode(data: &[u8], params: &ExplodeParams) -> PkResult<Vec<u8>> {
    let mut params = *params;
    if params.compressed_size == 0 {
        params.compressed_size = data.len() as u64;
    }
    let mut session = Exploder::new(params)?;
    let mut out = Vec::with_capacity(params.uncompressed_size.min(1 << 24) as usize);
    session.run(data, &mut out)?;
    Ok(out)
}
