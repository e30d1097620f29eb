//! File header: magic word, compression tag and product schema.
//!
//! ```text
//! [MAGIC_BASE + variant][fileId = 0][compression tag][N]
//! [header body, N words]
//! [N]
//! ```
//!
//! The header body holds, in order, the record-kind name table, the sorted
//! type-name table, an empty secondary type table and the product list.
//! String tables are a word count followed by null-terminated strings,
//! zero-padded to a word boundary as a whole. Each product entry is its class
//! index followed by its null-terminated name, padded to 4 bytes on its own.

use std::collections::BTreeSet;
use std::io::{Read, Write};

use pds_core::{PdsError, PdsResult, ProductDescriptor, ProductInfo, Serialization};
use tracing::debug;

use crate::compression::Compression;
use crate::format::{
    bytes_to_word_vec, bytes_to_words, read_words, write_words, words_to_bytes, FILE_ID,
    MAGIC_BASE,
};

/// Record kinds a container declares. Only events are written.
const RECORD_KINDS: [&str; 1] = ["Event"];

/// Decoded or to-be-written file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Variant recorded in the magic word
    pub serialization: Serialization,
    /// Body compression algorithm
    pub compression: Compression,
    /// Record-kind names
    pub record_kinds: Vec<String>,
    /// Sorted, deduplicated class names
    pub type_names: Vec<String>,
    /// Products in canonical index order
    pub products: Vec<ProductInfo>,
}

impl FileHeader {
    /// Build the header for a lane's product list.
    pub fn from_descriptors(
        serialization: Serialization,
        compression: Compression,
        descriptors: &[ProductDescriptor],
    ) -> Self {
        let type_names: Vec<String> = descriptors
            .iter()
            .map(|d| d.class_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let products = descriptors
            .iter()
            .map(|d| {
                // Every class name is in the table by construction.
                let index = type_names
                    .binary_search(&d.class_name)
                    .unwrap_or_default();
                ProductInfo {
                    name: d.name.clone(),
                    class_index: index as u32,
                    class_name: d.class_name.clone(),
                }
            })
            .collect();

        Self {
            serialization,
            compression,
            record_kinds: RECORD_KINDS.iter().map(|s| s.to_string()).collect(),
            type_names,
            products,
        }
    }

    /// Header body words, excluding the 4-word preamble and trailing repeat.
    pub fn body_words(&self) -> PdsResult<Vec<u32>> {
        let mut body = encode_string_table(&self.record_kinds)?;
        body.extend(encode_string_table(&self.type_names)?);
        // secondary type table, always empty
        body.push(0);

        body.push(to_word(self.products.len(), "product count")?);
        for product in &self.products {
            body.push(product.class_index);
            body.extend(null_terminated_words(&product.name));
        }
        Ok(body)
    }

    /// Serialize the complete header. Returns the number of words written.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> PdsResult<usize> {
        let body = self.body_words()?;
        let len = to_word(body.len(), "header body")?;

        let mut words = Vec::with_capacity(body.len() + 5);
        words.push(MAGIC_BASE + self.serialization.flag());
        words.push(FILE_ID);
        words.push(u32::from_le_bytes(self.compression.tag()));
        words.push(len);
        words.extend(body);
        words.push(len);

        write_words(out, &words)?;
        debug!(
            products = self.products.len(),
            types = self.type_names.len(),
            compression = %self.compression,
            words = words.len(),
            "wrote file header"
        );
        Ok(words.len())
    }

    /// Read and validate a header from the start of a stream.
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> PdsResult<Self> {
        let preamble = read_words(input, 4, "file header")?;
        let magic = preamble[0];
        let serialization = magic
            .checked_sub(MAGIC_BASE)
            .and_then(Serialization::from_flag)
            .ok_or_else(|| PdsError::Corruption(format!("unrecognised magic word {magic:#010x}")))?;
        let compression = Compression::from_tag(preamble[2].to_le_bytes())?;
        let len = preamble[3];

        let mut body = read_words(input, len as usize + 1, "file header")?;
        let trailing = body.pop().unwrap_or_default();
        if trailing != len {
            return Err(PdsError::length_mismatch("file header", len, trailing));
        }

        let mut cursor = WordCursor::new(&body);
        let record_kinds = cursor.string_table()?;
        let type_names = cursor.string_table()?;
        let _secondary = cursor.string_table()?;

        let count = cursor.word()? as usize;
        let mut products = Vec::with_capacity(count.min(body.len()));
        for _ in 0..count {
            let class_index = cursor.word()?;
            let name = cursor.null_terminated()?;
            let class_name = type_names
                .get(class_index as usize)
                .cloned()
                .ok_or_else(|| {
                    PdsError::Corruption(format!(
                        "product '{name}' has class index {class_index} outside type table of {}",
                        type_names.len()
                    ))
                })?;
            products.push(ProductInfo {
                name,
                class_index,
                class_name,
            });
        }
        if !cursor.is_exhausted() {
            return Err(PdsError::Corruption(format!(
                "file header body has {} unread words",
                cursor.remaining()
            )));
        }

        Ok(Self {
            serialization,
            compression,
            record_kinds,
            type_names,
            products,
        })
    }
}

fn to_word(n: usize, what: &str) -> PdsResult<u32> {
    u32::try_from(n).map_err(|_| PdsError::Configuration(format!("{what} {n} exceeds u32")))
}

fn null_terminated_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes_to_word_vec(&bytes)
}

fn encode_string_table(names: &[String]) -> PdsResult<Vec<u32>> {
    let mut bytes = Vec::new();
    for name in names {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
    }
    let words = bytes_to_word_vec(&bytes);
    let mut table = Vec::with_capacity(words.len() + 1);
    table.push(to_word(words.len(), "string table")?);
    table.extend(words);
    Ok(table)
}

struct WordCursor<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.words.len()
    }

    fn word(&mut self) -> PdsResult<u32> {
        let w = *self
            .words
            .get(self.pos)
            .ok_or_else(|| PdsError::truncated("file header body"))?;
        self.pos += 1;
        Ok(w)
    }

    fn take(&mut self, n: usize) -> PdsResult<&'a [u32]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.words.len())
            .ok_or_else(|| PdsError::truncated("file header body"))?;
        let slice = &self.words[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn string_table(&mut self) -> PdsResult<Vec<String>> {
        let n = self.word()? as usize;
        let bytes = words_to_bytes(self.take(n)?);
        bytes
            .split(|b| *b == 0)
            .take_while(|s| !s.is_empty())
            .map(utf8)
            .collect()
    }

    fn null_terminated(&mut self) -> PdsResult<String> {
        let bytes = words_to_bytes(&self.words[self.pos..]);
        let end = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| PdsError::Corruption("product name is not null-terminated".into()))?;
        let name = utf8(&bytes[..end])?;
        self.pos += bytes_to_words(end + 1);
        Ok(name)
    }
}

fn utf8(bytes: &[u8]) -> PdsResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| PdsError::Corruption(format!("header string is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors() -> Vec<ProductDescriptor> {
        vec![
            ProductDescriptor::new("tracks", "Vec<f32>"),
            ProductDescriptor::new("hits", "Vec<u32>"),
            ProductDescriptor::new("vertices", "Vec<f32>"),
        ]
    }

    #[test]
    fn test_type_table_sorted_and_deduplicated() {
        let header = FileHeader::from_descriptors(
            Serialization::Standard,
            Compression::Zstd,
            &descriptors(),
        );
        assert_eq!(header.type_names, vec!["Vec<f32>", "Vec<u32>"]);
        for p in &header.products {
            assert_eq!(header.type_names[p.class_index as usize], p.class_name);
        }
    }

    #[test]
    fn test_record_kind_table_layout() {
        let header =
            FileHeader::from_descriptors(Serialization::Standard, Compression::None, &[]);
        let body = header.body_words().unwrap();
        assert_eq!(body[0], 2);
        assert_eq!(&words_to_bytes(&body[1..3]), b"Event\0\0\0");
        // empty type table, empty secondary table, zero products
        assert_eq!(&body[3..], &[0, 0, 0]);
    }

    #[test]
    fn test_roundtrip_through_bytes() {
        let header = FileHeader::from_descriptors(
            Serialization::Unrolled,
            Compression::Lz4,
            &descriptors(),
        );
        let mut bytes = Vec::new();
        let words = header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), words * 4);

        let back = FileHeader::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_name_padding_on_word_boundary() {
        // "abc" + NUL is exactly one word; "abcd" + NUL needs two
        assert_eq!(null_terminated_words("abc").len(), 1);
        assert_eq!(null_terminated_words("abcd").len(), 2);
        assert_eq!(null_terminated_words("").len(), 1);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let header =
            FileHeader::from_descriptors(Serialization::Standard, Compression::None, &[]);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        bytes[0] = bytes[0].wrapping_add(2);
        let err = FileHeader::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_trailing_length_mismatch_rejected() {
        let header = FileHeader::from_descriptors(
            Serialization::Standard,
            Compression::Zstd,
            &descriptors(),
        );
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        let last = bytes.len() - 4;
        bytes[last] ^= 1;
        let err = FileHeader::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_class_index_out_of_range_rejected() {
        let mut header = FileHeader::from_descriptors(
            Serialization::Standard,
            Compression::None,
            &descriptors(),
        );
        header.products[0].class_index = 9;
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        let err = FileHeader::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_stream_is_corruption() {
        let err = FileHeader::read_from(&mut [0u8; 0].as_slice()).unwrap_err();
        assert!(err.is_corruption());
    }
}
