//! Word-level layout of PDS records.
//!
//! Everything in a container is a little-endian `u32` word. Byte payloads
//! (compressed bodies, product blobs, name tables) are packed into words and
//! zero-padded at the end.
//!
//! ```text
//! event   = [0][run][lumi][eventHi][eventLo]            5-word header
//!           [L][sizeInfo][payload ...][L]               body, L = 1 + payload words
//! sizeInfo = uncompressed_bytes | (compressed_bytes % 4)
//! ```
//!
//! The uncompressed size is always a multiple of four (the assembled event
//! buffer is a word buffer), which frees its two low bits to carry the
//! residue of the compressed byte count.

use std::io::{self, Read, Write};

use pds_core::{EventIdentifier, PdsError, PdsResult};

use crate::compression::{self, Compression};

/// Magic word for the standard variant; the variant flag is added to it.
pub const MAGIC_BASE: u32 = 3_141_592 * 256 + 1;

/// Reserved file id word.
pub const FILE_ID: u32 = 0;

/// Words in an event header.
pub const EVENT_HEADER_WORDS: usize = 5;

/// Record-kind word leading every event header.
pub const EVENT_RECORD_KIND: u32 = 0;

/// Words reserved ahead of a compressed payload: length and size-info.
pub const BODY_LEAD_WORDS: usize = 2;

/// Words reserved after a compressed payload: the length repeat.
pub const BODY_TRAIL_WORDS: usize = 1;

const WORD: usize = 4;

/// Number of words needed to hold `bytes` bytes.
pub const fn bytes_to_words(bytes: usize) -> usize {
    bytes.div_ceil(WORD)
}

/// Flatten words into their little-endian bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * WORD);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

/// Pack bytes into words, zero-padding the final word.
pub fn bytes_to_word_vec(bytes: &[u8]) -> Vec<u32> {
    let mut out = vec![0u32; bytes_to_words(bytes.len())];
    copy_bytes_into(&mut out, bytes);
    out
}

/// Copy bytes into the front of a word slice, zero-padding the last word.
pub(crate) fn copy_bytes_into(words: &mut [u32], bytes: &[u8]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks(WORD)) {
        let mut raw = [0u8; WORD];
        raw[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_le_bytes(raw);
    }
}

/// Write words to a sink in little-endian order.
pub fn write_words<W: Write + ?Sized>(out: &mut W, words: &[u32]) -> io::Result<()> {
    out.write_all(&words_to_bytes(words))
}

/// Fill `buf` completely, or report that the stream ended before its first byte.
///
/// Returns `Ok(false)` only when zero bytes were available. A stream that ends
/// part-way through `buf` is corruption inside `what`.
pub(crate) fn read_exact_or_eof<R: Read + ?Sized>(
    input: &mut R,
    buf: &mut [u8],
    what: &str,
) -> PdsResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(PdsError::truncated(what)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Read exactly `count` words. Any shortfall is corruption inside `what`.
///
/// Reads through `take` so a corrupted length word cannot force a huge
/// up-front allocation.
pub(crate) fn read_words<R: Read + ?Sized>(
    input: &mut R,
    count: usize,
    what: &str,
) -> PdsResult<Vec<u32>> {
    let want = count
        .checked_mul(WORD)
        .ok_or_else(|| PdsError::Corruption(format!("{what} declares {count} words")))?;
    let mut bytes = Vec::new();
    input.take(want as u64).read_to_end(&mut bytes)?;
    if bytes.len() != want {
        return Err(PdsError::truncated(what));
    }
    Ok(bytes_to_word_vec(&bytes))
}

/// Pack an uncompressed byte count and the compressed byte residue into one word.
pub fn pack_size_info(uncompressed_bytes: usize, compressed_bytes: usize) -> PdsResult<u32> {
    debug_assert_eq!(uncompressed_bytes % WORD, 0);
    if uncompressed_bytes % WORD != 0 {
        return Err(PdsError::Corruption(format!(
            "uncompressed size {uncompressed_bytes} is not a whole number of words"
        )));
    }
    let packed = u32::try_from(uncompressed_bytes).map_err(|_| {
        PdsError::Compression(format!(
            "event of {uncompressed_bytes} bytes exceeds the 32-bit size field"
        ))
    })?;
    Ok(packed | (compressed_bytes % WORD) as u32)
}

/// Split a size-info word into (uncompressed bytes, compressed byte residue).
pub const fn unpack_size_info(word: u32) -> (usize, usize) {
    ((word & !0b11) as usize, (word & 0b11) as usize)
}

/// Exact compressed byte count for a record of `record_words` words.
pub fn compressed_byte_count(record_words: usize, residue: usize) -> PdsResult<usize> {
    let payload_bytes = record_words
        .checked_sub(1)
        .ok_or_else(|| PdsError::Corruption("event body has zero length".into()))?
        * WORD;
    let padding = if residue == 0 { 0 } else { WORD - residue };
    payload_bytes.checked_sub(padding).ok_or_else(|| {
        PdsError::Corruption(format!(
            "residue {residue} impossible for an empty payload"
        ))
    })
}

/// Five-word event header.
pub const fn event_header_words(id: EventIdentifier) -> [u32; EVENT_HEADER_WORDS] {
    [
        EVENT_RECORD_KIND,
        id.run,
        id.lumi,
        id.event_high(),
        id.event_low(),
    ]
}

/// Parse an event header, checking the record-kind word.
pub fn parse_event_header(words: &[u32]) -> PdsResult<EventIdentifier> {
    match words {
        [kind, run, lumi, high, low] if *kind == EVENT_RECORD_KIND => {
            Ok(EventIdentifier::from_words(*run, *lumi, *high, *low))
        }
        [kind, ..] if words.len() == EVENT_HEADER_WORDS => Err(PdsError::Corruption(format!(
            "event header record kind {kind}, expected {EVENT_RECORD_KIND}"
        ))),
        _ => Err(PdsError::truncated("event header")),
    }
}

/// Compress an assembled event buffer into a framed body:
/// `[L][sizeInfo][payload][L]`.
pub fn encode_event_body(
    compression: Compression,
    level: i32,
    raw: &[u32],
) -> PdsResult<Vec<u32>> {
    let compressed =
        compression::compress_words(compression, level, raw, BODY_LEAD_WORDS, BODY_TRAIL_WORDS)?;
    let record_words = bytes_to_words(compressed.compressed_bytes) + 1;
    let mut body = compressed.words;

    if body.len() != record_words + BODY_LEAD_WORDS {
        return Err(PdsError::Corruption(format!(
            "event body buffer holds {} words, record length {record_words} implies {}",
            body.len(),
            record_words + BODY_LEAD_WORDS
        )));
    }
    let length = u32::try_from(record_words).map_err(|_| {
        PdsError::Compression(format!("event body of {record_words} words is too large"))
    })?;

    body[0] = length;
    body[1] = pack_size_info(raw.len() * WORD, compressed.compressed_bytes)?;
    body[record_words + 1] = length;

    let trailing = body[record_words + 1];
    if trailing != body[0] {
        return Err(PdsError::length_mismatch("event body", body[0], trailing));
    }
    Ok(body)
}

/// Decompress an event body read from a stream.
///
/// `body` is everything after the leading length word: the size-info word,
/// the payload and the trailing repeat.
pub fn decode_event_body(
    compression: Compression,
    record_words: u32,
    body: &[u32],
) -> PdsResult<Vec<u32>> {
    let len = record_words as usize;
    if body.len() != len + 1 {
        return Err(PdsError::truncated("event body"));
    }
    let trailing = body[len];
    if trailing != record_words {
        return Err(PdsError::length_mismatch("event body", record_words, trailing));
    }

    let (uncompressed, residue) = unpack_size_info(body[0]);
    let compressed = compressed_byte_count(len, residue)?;
    let mut bytes = words_to_bytes(&body[1..len]);
    bytes.truncate(compressed);

    compression::decompress(compression, &bytes, uncompressed)
}

/// One product entry of a decoded event buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductBlob {
    /// Canonical product index
    pub index: usize,
    /// Blob words, zero-padded
    pub words: Vec<u32>,
}

impl ProductBlob {
    /// Blob bytes as stored, including trailing padding.
    pub fn bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words)
    }
}

/// Split an event buffer into its `[index][sizeWords][blob]` entries.
pub fn split_products(buffer: &[u32], product_count: usize) -> PdsResult<Vec<ProductBlob>> {
    let mut blobs = Vec::new();
    let mut pos = 0;
    while pos < buffer.len() {
        let (index, size) = match buffer.get(pos..pos + 2) {
            Some([index, size]) => (*index as usize, *size as usize),
            _ => {
                return Err(PdsError::Corruption(format!(
                    "product entry header overruns event buffer at word {pos}"
                )))
            }
        };
        if index >= product_count {
            return Err(PdsError::Corruption(format!(
                "product index {index} outside product list of {product_count}"
            )));
        }
        let start = pos + 2;
        let words = start
            .checked_add(size)
            .and_then(|end| buffer.get(start..end))
            .ok_or_else(|| {
                PdsError::Corruption(format!(
                    "product {index} of {size} words overruns event buffer"
                ))
            })?;
        blobs.push(ProductBlob {
            index,
            words: words.to_vec(),
        });
        pos = start + size;
    }
    Ok(blobs)
}
