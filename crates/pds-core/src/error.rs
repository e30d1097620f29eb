//! Error taxonomy for the PDS container engine.
//!
//! `PdsError` groups failures into the categories the container format cares
//! about:
//!
//! - **Structural corruption** (`Corruption`): a length/crosscheck mismatch, a
//!   decompressed-size mismatch, an unknown magic word or compression tag, or a
//!   short read in the middle of a record. Always fatal. The format carries no
//!   redundancy beyond the doubled length word, so nothing is retried.
//! - **Configuration** (`Configuration`, `UnknownCompression`,
//!   `UnknownSerialization`): rejected before any I/O begins.
//! - **I/O** (`Io`): wraps `std::io::Error`.
//! - **Codec** (`Compression`, `Codec`, `UnknownClass`): a compression library
//!   or a typed blob codec refused its input.
//! - **Writer protocol** (`LaneNotSetUp`, `ProductsNotReady`,
//!   `ProductAlreadyReady`, `SinkPoisoned`, `WriterClosed`, `Task`): the
//!   writer was driven out of order, a previous write failed, or a background
//!   task died.
//!
//! Clean end-of-stream at an event boundary is not an error; readers report it
//! as `Ok(None)` / `Ok(false)`.

use thiserror::Error;

use crate::codec::Serialization;

/// Convenience alias for results using the PDS error type.
pub type PdsResult<T> = std::result::Result<T, PdsError>;

/// Primary error type for reading and writing PDS containers.
#[derive(Error, Debug)]
pub enum PdsError {
    /// The byte stream violates the container layout.
    ///
    /// **Error Type**: Permanent. The file is unreadable past this point.
    #[error("Structural corruption: {0}")]
    Corruption(String),

    /// Configuration values parsed but are semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Compression algorithm name not recognised.
    #[error("Unknown compression algorithm '{0}'. Must be one of: none, lz4, zstd")]
    UnknownCompression(String),

    /// Serialization variant name not recognised.
    #[error("Unknown serialization '{0}'. Must be one of: standard, unrolled")]
    UnknownSerialization(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression library failure.
    #[error("Compression error: {0}")]
    Compression(String),

    /// A blob codec could not encode or decode a product.
    #[error("Codec error for class '{class}': {message}")]
    Codec {
        /// Class name the codec is registered under
        class: String,
        /// Codec-specific failure description
        message: String,
    },

    /// No codec is registered for a class name and serialization variant.
    #[error("No blob codec registered for class '{class}' ({variant})")]
    UnknownClass {
        /// Requested class name
        class: String,
        /// Requested serialization variant
        variant: Serialization,
    },

    /// An operation referenced a lane that was never set up.
    #[error("Lane {0} has not been set up")]
    LaneNotSetUp(usize),

    /// Event output requested before every product reported ready.
    #[error("Lane {lane}: only {ready} of {expected} products ready for output")]
    ProductsNotReady {
        /// Lane index
        lane: usize,
        /// Products that reported ready
        ready: usize,
        /// Products the lane was set up with
        expected: usize,
    },

    /// A product reported ready a second time before its event was output.
    #[error("Lane {lane}: product {index} already reported ready for this event")]
    ProductAlreadyReady {
        /// Lane index
        lane: usize,
        /// Canonical product index
        index: usize,
    },

    /// A previous write failed; the output stream no longer ends on a record boundary.
    #[error("Output sink is poisoned by an earlier failure: {0}")]
    SinkPoisoned(String),

    /// The writer was already closed.
    #[error("Writer has been closed")]
    WriterClosed,

    /// A background encode or write task did not complete.
    #[error("Background task failed: {0}")]
    Task(String),
}

impl PdsError {
    /// Leading and trailing length words of a record disagree.
    pub fn length_mismatch(record: &str, leading: u32, trailing: u32) -> Self {
        Self::Corruption(format!(
            "{record} length word {leading} does not match trailing repeat {trailing}"
        ))
    }

    /// Decoded payload size differs from the size recorded in the stream.
    pub fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::Corruption(format!(
            "decompressed {actual} bytes, size-info word declares {expected}"
        ))
    }

    /// The stream ended inside a record.
    pub fn truncated(what: &str) -> Self {
        Self::Corruption(format!("unexpected end of stream inside {what}"))
    }

    /// True for the structural-corruption category.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }

    /// True for errors raised while validating configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::UnknownCompression(_) | Self::UnknownSerialization(_)
        )
    }
}
