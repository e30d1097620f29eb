//! # rust_pds
//!
//! Multi-lane event writer for the PDS packed data stream container.
//!
//! Several lanes pull events from one [`source::Source`], hand each product to
//! an [`pds_storage::Outputer`] for concurrent encoding, and output the event
//! once all of its products are ready. The PDS outputer compresses each event
//! on the lane that produced it and appends it to a single file through a
//! serial write queue.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered run configuration (defaults, TOML, `RUST_PDS_` env).
//! - **`tracing_init`**: `tracing-subscriber` setup from the logging section.
//! - **`source`**: the `Source` trait with empty and synthetic sources.
//! - **`lane`**: the lane scheduler and run summary.
//! - **`run`**: builds source and outputer from a config and runs the lanes.
//!
//! Container format, codecs and the reader live in `pds-core` and
//! `pds-storage`; the most used items are re-exported here.

pub mod config;
pub mod lane;
pub mod run;
pub mod source;
pub mod tracing_init;

pub use config::PdsConfig;
pub use lane::{run_lanes, LaneReport, RunSummary};
pub use pds_core::{
    CodecRegistry, DataProduct, EventIdentifier, PdsError, PdsResult, ProductDescriptor,
    Serialization,
};
pub use pds_storage::{Compression, NullOutputer, Outputer, PdsOutputer, PdsReader};
pub use source::{EmptySource, Source, SourceEvent, SyntheticSource};
