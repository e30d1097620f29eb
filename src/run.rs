//! Wiring a validated [`PdsConfig`] into a source, an outputer and the lanes.

use std::sync::Arc;

use pds_core::{CodecRegistry, PdsError, PdsResult};
use pds_storage::{NullOutputer, Outputer, PdsOutputer};
use tracing::info;

use crate::config::{OutputerKind, PdsConfig, SourceKind};
use crate::lane::{run_lanes, RunSummary};
use crate::source::{EmptySource, Source, SyntheticSource};

/// Source described by the `run` and `synthetic` sections.
pub fn build_source(config: &PdsConfig) -> PdsResult<Arc<dyn Source>> {
    let source: Arc<dyn Source> = match config.source_kind()? {
        SourceKind::Empty => Arc::new(EmptySource::new(config.run.events)),
        SourceKind::Synthetic => Arc::new(SyntheticSource::new(config.run.events, &config.synthetic)),
    };
    Ok(source)
}

/// Outputer described by the `output` section, sized for `run.lanes`.
///
/// For the PDS outputer the file is created here, after the compression
/// level has been validated.
pub fn build_outputer(config: &PdsConfig) -> PdsResult<Arc<dyn Outputer>> {
    let registry = Arc::new(CodecRegistry::new());
    let serialization = config.serialization()?;

    let outputer: Arc<dyn Outputer> = match config.outputer_kind()? {
        OutputerKind::Null => Arc::new(NullOutputer::new(config.run.lanes, registry, serialization)),
        OutputerKind::Pds => {
            let path = config.output.path.as_ref().ok_or_else(|| {
                PdsError::Configuration("output.path is required for the pds outputer".into())
            })?;
            let writer = PdsOutputer::builder()
                .lanes(config.run.lanes)
                .compression(config.compression()?)
                .level(config.output.compression_level)
                .serialization(serialization)
                .registry(registry)
                .create(path)?;
            info!(path = %path.display(), "writing PDS container");
            Arc::new(writer)
        }
    };
    Ok(outputer)
}

/// Validate `config`, then run every lane to completion.
pub async fn run(config: &PdsConfig) -> PdsResult<RunSummary> {
    config.validate()?;
    let source = build_source(config)?;
    let outputer = build_outputer(config)?;
    run_lanes(source, outputer, config.run.lanes).await
}
