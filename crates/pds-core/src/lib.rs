//! `pds-core`
//!
//! Shared types for the PDS (packed data stream) event container.
//!
//! ## Key Types
//!
//! - [`EventIdentifier`]: (run, lumi, event) tag carried by every event record
//! - [`ProductInfo`] / [`ProductDescriptor`]: product schema as stored / as announced
//! - [`DataProduct`]: type-erased product value a lane hands to an outputer
//! - [`BlobCodec`] / [`CodecRegistry`]: class-name keyed product encoders
//! - [`PdsError`]: error taxonomy (corruption, configuration, I/O, codec, writer state)

mod builtin;
pub mod codec;
pub mod error;
pub mod event;

pub use codec::{BlobCodec, CodecRegistry, DecodedValue, Serialization};
pub use error::{PdsError, PdsResult};
pub use event::{DataProduct, EventIdentifier, ProductDescriptor, ProductInfo, ProductValue};
