//! `pds-storage`
//!
//! Binary container engine for PDS (packed data stream) event files.
//!
//! ## Architecture
//!
//! - [`compression`]: none / LZ4 / zstd body codecs
//! - [`format`]: word layout, size-info packing, event body framing
//! - [`header`]: file header and product schema
//! - [`serializer`]: per-lane product codec bindings and event assembly
//! - [`queue`]: strictly ordered single-writer task queue
//! - [`writer`]: [`PdsOutputer`], the container writer
//! - [`outputer`]: the [`Outputer`] interface and [`NullOutputer`]
//! - [`reader`]: [`PdsReader`], full decode and skip-scan
//!
//! ## Example
//!
//! ```no_run
//! use pds_storage::PdsReader;
//!
//! let mut reader = PdsReader::open("run1.pds")?;
//! for event in reader.events() {
//!     let event = event?;
//!     println!("{} with {} products", event.id, event.products.len());
//! }
//! # Ok::<(), pds_core::PdsError>(())
//! ```

pub mod compression;
pub mod format;
pub mod header;
pub mod outputer;
pub mod queue;
pub mod reader;
pub mod serializer;
pub mod writer;

pub use compression::{Compression, DEFAULT_LEVEL};
pub use format::ProductBlob;
pub use header::FileHeader;
pub use outputer::{NullOutputer, Outputer, OutputerSummary};
pub use queue::SerialTaskQueue;
pub use reader::{ContainerStats, DecodedEvent, EventIndexEntry, Events, PdsReader, ProductDecoders};
pub use serializer::{LaneSerializers, SerializerStats, SerializerStrategy};
pub use writer::{PdsOutputer, PdsOutputerBuilder};
