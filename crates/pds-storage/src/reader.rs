//! PDS container reader.
//!
//! [`PdsReader`] validates the file header on open, then yields one
//! [`DecodedEvent`] per record. End-of-stream exactly at an event boundary is
//! the only clean termination; a stream that ends anywhere inside a record is
//! reported as corruption.
//!
//! With a seekable stream the reader can also skip records using only their
//! length words, without decompressing, and build an offset index.
//!
//! Input is buffered internally; pass the raw `File` or cursor.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use pds_core::{
    BlobCodec, CodecRegistry, DecodedValue, EventIdentifier, PdsError, PdsResult, ProductInfo,
    Serialization,
};
use tracing::{debug, trace};

use crate::compression::Compression;
use crate::format::{
    compressed_byte_count, decode_event_body, parse_event_header, read_exact_or_eof, read_words,
    split_products, unpack_size_info, ProductBlob, EVENT_HEADER_WORDS,
};
use crate::header::FileHeader;

/// Event header plus the body length word.
const PREFIX_WORDS: usize = EVENT_HEADER_WORDS + 1;

/// One event as stored: identifier and per-product blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Event identifier from the record header
    pub id: EventIdentifier,
    /// Product entries in buffer order
    pub products: Vec<ProductBlob>,
}

impl DecodedEvent {
    /// Blob of the product with canonical index `index`
    pub fn blob(&self, index: usize) -> Option<&ProductBlob> {
        self.products.iter().find(|b| b.index == index)
    }
}

/// Position of one record in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIndexEntry {
    /// Event identifier
    pub id: EventIdentifier,
    /// Byte offset of the event header
    pub offset: u64,
    /// Body length word (size-info word plus payload words)
    pub body_words: u32,
}

/// Running totals for a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// Events decoded
    pub events: u64,
    /// Events skipped without decompression
    pub skipped: u64,
    /// Compressed payload bytes of decoded events
    pub compressed_bytes: u64,
    /// Uncompressed buffer bytes of decoded events
    pub uncompressed_bytes: u64,
}

impl ContainerStats {
    /// Uncompressed over compressed size, 1.0 when nothing was read
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.uncompressed_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Codecs resolved once for every product in a header.
pub struct ProductDecoders {
    codecs: Vec<Arc<dyn BlobCodec>>,
}

impl ProductDecoders {
    /// Resolve a codec for each product's class and the file's variant.
    pub fn resolve(header: &FileHeader, registry: &CodecRegistry) -> PdsResult<Self> {
        let codecs = header
            .products
            .iter()
            .map(|p| registry.resolve(&p.class_name, header.serialization))
            .collect::<PdsResult<Vec<_>>>()?;
        Ok(Self { codecs })
    }

    /// Decode every blob of an event into its product value.
    pub fn decode(&self, event: &DecodedEvent) -> PdsResult<Vec<(usize, DecodedValue)>> {
        event
            .products
            .iter()
            .map(|blob| {
                let codec = self.codecs.get(blob.index).ok_or_else(|| {
                    PdsError::Corruption(format!("no product at index {}", blob.index))
                })?;
                Ok((blob.index, codec.decode(&blob.bytes())?))
            })
            .collect()
    }
}

/// Reads events from a PDS container.
pub struct PdsReader<R> {
    input: BufReader<R>,
    header: FileHeader,
    stats: ContainerStats,
}

impl PdsReader<File> {
    /// Open a container file and read its header.
    pub fn open(path: impl AsRef<Path>) -> PdsResult<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opening PDS container");
        Self::new(file)
    }
}

impl<R: Read> PdsReader<R> {
    /// Read and validate the file header from the start of `input`.
    pub fn new(input: R) -> PdsResult<Self> {
        let mut input = BufReader::new(input);
        let header = FileHeader::read_from(&mut input)?;
        debug!(
            products = header.products.len(),
            compression = %header.compression,
            serialization = %header.serialization,
            "read PDS header"
        );
        Ok(Self {
            input,
            header,
            stats: ContainerStats::default(),
        })
    }

    /// Decoded file header
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Product schema in canonical index order
    pub fn products(&self) -> &[ProductInfo] {
        &self.header.products
    }

    /// Body compression algorithm
    pub fn compression(&self) -> Compression {
        self.header.compression
    }

    /// Serialization variant from the magic word
    pub fn serialization(&self) -> Serialization {
        self.header.serialization
    }

    /// Totals so far
    pub fn stats(&self) -> ContainerStats {
        self.stats
    }

    /// Resolve product codecs against a registry.
    pub fn decoders(&self, registry: &CodecRegistry) -> PdsResult<ProductDecoders> {
        ProductDecoders::resolve(&self.header, registry)
    }

    /// Recover the buffered stream, positioned after the last record read.
    pub fn into_inner(self) -> BufReader<R> {
        self.input
    }

    /// Event header and length word, or `None` at a clean end of stream.
    fn read_prefix(&mut self) -> PdsResult<Option<(EventIdentifier, u32)>> {
        let mut raw = [0u8; PREFIX_WORDS * 4];
        if !read_exact_or_eof(&mut self.input, &mut raw, "event header")? {
            return Ok(None);
        }
        let words: Vec<u32> = raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let id = parse_event_header(&words[..EVENT_HEADER_WORDS])?;
        Ok(Some((id, words[EVENT_HEADER_WORDS])))
    }

    /// Read the next event, or `None` at the end of the container.
    pub fn read_event(&mut self) -> PdsResult<Option<DecodedEvent>> {
        let Some((id, record_words)) = self.read_prefix()? else {
            return Ok(None);
        };
        let body = read_words(&mut self.input, record_words as usize + 1, "event body")?;
        let buffer = decode_event_body(self.header.compression, record_words, &body)?;
        let products = split_products(&buffer, self.header.products.len())?;

        let (uncompressed, residue) = unpack_size_info(body[0]);
        self.stats.events += 1;
        self.stats.uncompressed_bytes += uncompressed as u64;
        self.stats.compressed_bytes +=
            compressed_byte_count(record_words as usize, residue)? as u64;
        trace!(run = id.run, event = id.event, products = products.len(), "read event");

        Ok(Some(DecodedEvent { id, products }))
    }

    /// Iterate over the remaining events.
    pub fn events(&mut self) -> Events<'_, R> {
        Events {
            reader: self,
            done: false,
        }
    }
}

impl<R: Read + Seek> PdsReader<R> {
    /// Current byte offset in the stream
    pub fn position(&mut self) -> PdsResult<u64> {
        Ok(self.input.stream_position()?)
    }

    /// Continue reading at a record offset taken from [`index_events`](Self::index_events).
    pub fn seek_to(&mut self, offset: u64) -> PdsResult<()> {
        self.input.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Skip the next event using only its length words.
    ///
    /// Returns `false` at a clean end of stream. The trailing length repeat is
    /// still checked.
    pub fn skip_to_next_event(&mut self) -> PdsResult<bool> {
        Ok(self.skip_record()?.is_some())
    }

    fn skip_record(&mut self) -> PdsResult<Option<(EventIdentifier, u32)>> {
        let Some((id, record_words)) = self.read_prefix()? else {
            return Ok(None);
        };
        self.input.seek_relative(i64::from(record_words) * 4)?;
        let trailing = read_words(&mut self.input, 1, "event body")?[0];
        if trailing != record_words {
            return Err(PdsError::length_mismatch("event body", record_words, trailing));
        }
        self.stats.skipped += 1;
        Ok(Some((id, record_words)))
    }

    /// Record offsets from the current position to the end of the container.
    pub fn index_events(&mut self) -> PdsResult<Vec<EventIndexEntry>> {
        let mut index = Vec::new();
        loop {
            let offset = self.position()?;
            match self.skip_record()? {
                Some((id, body_words)) => index.push(EventIndexEntry {
                    id,
                    offset,
                    body_words,
                }),
                None => break,
            }
        }
        debug!(events = index.len(), "indexed PDS container");
        Ok(index)
    }
}

/// Iterator over a reader's remaining events. Stops after the first error.
pub struct Events<'a, R> {
    reader: &'a mut PdsReader<R>,
    done: bool,
}

impl<R: Read> Iterator for Events<'_, R> {
    type Item = PdsResult<DecodedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
