//! Compression codecs for event bodies.
//!
//! The algorithm is a container property, written once into the file header
//! as a 4-character tag. Readers dispatch on the first character only.
//!
//! - `None`: payload bytes stored as-is
//! - `Lz4`: `lz4_flex` block format without a size prefix (the size lives in
//!   the event's size-info word). The level is ignored.
//! - `Zstd`: `zstd` bulk API at the configured level

use std::fmt;
use std::str::FromStr;

use pds_core::{PdsError, PdsResult};

use crate::format::{bytes_to_word_vec, bytes_to_words, copy_bytes_into, words_to_bytes};

/// Default compression level (zstd's high-ratio setting).
pub const DEFAULT_LEVEL: i32 = 18;

/// Body compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Identity copy-through
    None,
    /// LZ4 block format
    Lz4,
    /// Zstandard
    #[default]
    Zstd,
}

impl Compression {
    /// 4-byte tag written into the file header.
    pub const fn tag(self) -> [u8; 4] {
        match self {
            Self::None => *b"NONE",
            Self::Lz4 => *b"LZ4\0",
            Self::Zstd => *b"ZSTD",
        }
    }

    /// Select an algorithm by the first character of a header tag.
    pub fn from_tag(tag: [u8; 4]) -> PdsResult<Self> {
        match tag[0] {
            b'N' => Ok(Self::None),
            b'L' => Ok(Self::Lz4),
            b'Z' => Ok(Self::Zstd),
            _ => Err(PdsError::Corruption(format!(
                "unknown compression tag {:?}",
                String::from_utf8_lossy(&tag)
            ))),
        }
    }

    /// Reject a level the algorithm cannot use.
    pub fn validate_level(self, level: i32) -> PdsResult<()> {
        if self == Self::Zstd {
            let range = zstd::compression_level_range();
            if !range.contains(&level) {
                return Err(PdsError::Configuration(format!(
                    "zstd level {level} outside {}..={}",
                    range.start(),
                    range.end()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Lz4 => write!(f, "lz4"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = PdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            _ => Err(PdsError::UnknownCompression(s.to_string())),
        }
    }
}

/// Compressed payload placed inside a word buffer with reserved framing words.
#[derive(Debug)]
pub struct CompressedWords {
    /// `lead` reserved words, the zero-padded payload, `trail` reserved words
    pub words: Vec<u32>,
    /// Exact compressed byte count, before padding
    pub compressed_bytes: usize,
}

/// Compress a word buffer, reserving `lead` words before and `trail` words
/// after the payload.
pub fn compress_words(
    compression: Compression,
    level: i32,
    raw: &[u32],
    lead: usize,
    trail: usize,
) -> PdsResult<CompressedWords> {
    let input = words_to_bytes(raw);
    let compressed = match compression {
        Compression::None => input,
        Compression::Lz4 => lz4_flex::block::compress(&input),
        Compression::Zstd => zstd::bulk::compress(&input, level)
            .map_err(|e| PdsError::Compression(format!("zstd compression failed: {e}")))?,
    };

    let payload_words = bytes_to_words(compressed.len());
    let mut words = vec![0u32; lead + payload_words + trail];
    copy_bytes_into(&mut words[lead..lead + payload_words], &compressed);

    Ok(CompressedWords {
        words,
        compressed_bytes: compressed.len(),
    })
}

/// Decompress a payload whose uncompressed size is known.
///
/// Fails with corruption if the decoded size differs from
/// `uncompressed_bytes` or is not a whole number of words.
pub fn decompress(
    compression: Compression,
    payload: &[u8],
    uncompressed_bytes: usize,
) -> PdsResult<Vec<u32>> {
    let decoded = match compression {
        Compression::None => payload.to_vec(),
        Compression::Lz4 => lz4_flex::block::decompress(payload, uncompressed_bytes)
            .map_err(|e| PdsError::Corruption(format!("LZ4 decompression failed: {e}")))?,
        Compression::Zstd => zstd::bulk::decompress(payload, uncompressed_bytes)
            .map_err(|e| PdsError::Corruption(format!("zstd decompression failed: {e}")))?,
    };

    if decoded.len() != uncompressed_bytes {
        return Err(PdsError::size_mismatch(uncompressed_bytes, decoded.len()));
    }
    if decoded.len() % 4 != 0 {
        return Err(PdsError::Corruption(format!(
            "decompressed body of {} bytes is not word aligned",
            decoded.len()
        )));
    }
    Ok(bytes_to_word_vec(&decoded))
}
