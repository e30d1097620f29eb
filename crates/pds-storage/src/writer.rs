//! PDS container writer.
//!
//! [`PdsOutputer`] turns per-lane product blobs into event records and appends
//! them to a single sink. Work is split in two stages:
//!
//! - **parallel**: product encoding, event-buffer assembly and compression run
//!   on the tokio blocking pool, independently per lane;
//! - **serial**: the physical write (file header on first use, then event
//!   header and body) is pushed onto a [`SerialTaskQueue`] that owns the sink.
//!
//! Records land in the file in the order their writes were submitted, which
//! is not event order. Readers sort on [`EventIdentifier`] when order matters.
//!
//! If a write fails the sink is poisoned: the failing write and every later
//! one report [`PdsError::SinkPoisoned`] instead of appending after a partial
//! record.
//!
//! # Example
//!
//! ```no_run
//! use pds_core::{DataProduct, EventIdentifier, ProductDescriptor};
//! use pds_storage::{Compression, Outputer, PdsOutputer};
//!
//! # async fn run() -> pds_core::PdsResult<()> {
//! let writer = PdsOutputer::builder()
//!     .lanes(1)
//!     .compression(Compression::Lz4)
//!     .create("run1.pds")?;
//!
//! writer.setup_for_lane(0, &[ProductDescriptor::new("adc", "Vec<u32>")])?;
//! writer.product_ready(0, DataProduct::new(0, "adc", vec![1u32, 2, 3])).await?;
//! writer.output_event(0, EventIdentifier::new(1, 1, 1)).await?;
//! writer.close().await?;
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pds_core::{
    CodecRegistry, DataProduct, EventIdentifier, PdsError, PdsResult, ProductDescriptor,
    Serialization,
};
use tracing::{debug, error, info};

use crate::compression::{Compression, DEFAULT_LEVEL};
use crate::format::{encode_event_body, event_header_words, write_words, EVENT_HEADER_WORDS};
use crate::header::FileHeader;
use crate::outputer::{Outputer, OutputerSummary};
use crate::queue::SerialTaskQueue;
use crate::serializer::{LaneSerializers, SerializerStrategy};

/// Sink state owned by the write queue.
struct ContainerSink<W> {
    out: Option<W>,
    header_written: bool,
    poisoned: Option<String>,
}

impl<W: Write> ContainerSink<W> {
    fn new(out: W) -> Self {
        Self {
            out: Some(out),
            header_written: false,
            poisoned: None,
        }
    }

    /// Run a write against the sink, poisoning it on failure.
    fn apply<T>(&mut self, f: impl FnOnce(&mut W, &mut bool) -> PdsResult<T>) -> PdsResult<T> {
        if let Some(reason) = &self.poisoned {
            return Err(PdsError::SinkPoisoned(reason.clone()));
        }
        let out = self.out.as_mut().ok_or(PdsError::WriterClosed)?;
        match f(out, &mut self.header_written) {
            Ok(v) => Ok(v),
            Err(e) => {
                error!(error = %e, "write failed, poisoning output sink");
                self.poisoned = Some(e.to_string());
                Err(PdsError::SinkPoisoned(e.to_string()))
            }
        }
    }
}

/// Header words for a strategy's schema, written once per container.
fn write_header_once<W: Write>(
    out: &mut W,
    header_written: &mut bool,
    strategy: &SerializerStrategy,
    compression: Compression,
) -> PdsResult<u64> {
    if *header_written {
        return Ok(0);
    }
    let header =
        FileHeader::from_descriptors(strategy.serialization(), compression, &strategy.descriptors());
    let words = header.write_to(out)?;
    *header_written = true;
    Ok(words as u64 * 4)
}

#[derive(Default)]
struct WriterCounters {
    events: AtomicU64,
    bytes: AtomicU64,
    serial_nanos: AtomicU64,
    parallel_nanos: AtomicU64,
}

impl WriterCounters {
    fn add_time(counter: &AtomicU64, elapsed: Duration) {
        counter.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Builder for [`PdsOutputer`].
#[derive(Debug, Clone)]
pub struct PdsOutputerBuilder {
    lanes: usize,
    compression: Compression,
    level: i32,
    serialization: Serialization,
    registry: Option<Arc<CodecRegistry>>,
}

impl Default for PdsOutputerBuilder {
    fn default() -> Self {
        Self {
            lanes: 1,
            compression: Compression::Zstd,
            level: DEFAULT_LEVEL,
            serialization: Serialization::Standard,
            registry: None,
        }
    }
}

impl PdsOutputerBuilder {
    /// Number of lanes that will feed the writer
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    /// Body compression algorithm
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Compression level (ignored by `none` and `lz4`)
    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Per-product byte layout variant
    pub fn serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = serialization;
        self
    }

    /// Codec registry (defaults to the built-in codecs)
    pub fn registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn validate(&self) -> PdsResult<()> {
        if self.lanes == 0 {
            return Err(PdsError::Configuration("at least one lane is required".into()));
        }
        self.compression.validate_level(self.level)
    }

    /// Build a writer over an arbitrary sink.
    pub fn build<W: Write + Send + 'static>(self, sink: W) -> PdsResult<PdsOutputer<W>> {
        self.validate()?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(CodecRegistry::new()));
        info!(
            lanes = self.lanes,
            compression = %self.compression,
            level = self.level,
            serialization = %self.serialization,
            "PDS writer created"
        );
        Ok(PdsOutputer {
            lanes: LaneSerializers::new(self.lanes, registry, self.serialization),
            compression: self.compression,
            level: self.level,
            queue: SerialTaskQueue::new(ContainerSink::new(sink)),
            counters: Arc::new(WriterCounters::default()),
        })
    }

    /// Validate, then create the file and build a buffered writer over it.
    pub fn create(self, path: impl AsRef<Path>) -> PdsResult<PdsOutputer<BufWriter<File>>> {
        self.validate()?;
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened PDS output file");
        self.build(BufWriter::new(file))
    }
}

/// Writes events from many lanes into one PDS container.
pub struct PdsOutputer<W> {
    lanes: LaneSerializers,
    compression: Compression,
    level: i32,
    queue: SerialTaskQueue<ContainerSink<W>>,
    counters: Arc<WriterCounters>,
}

impl PdsOutputer<BufWriter<File>> {
    /// Start configuring a writer
    pub fn builder() -> PdsOutputerBuilder {
        PdsOutputerBuilder::default()
    }
}

impl<W: Write + Send + 'static> PdsOutputer<W> {
    /// Body compression algorithm
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Serialization variant recorded in the header
    pub fn serialization(&self) -> Serialization {
        self.lanes.serialization()
    }

    /// Flush and hand back the sink.
    ///
    /// A container with no events still receives its header when any lane was
    /// set up, so the result is readable.
    pub async fn close(&self) -> PdsResult<W> {
        let strategy = self.lanes.first_ready();
        let compression = self.compression;
        let counters = Arc::clone(&self.counters);

        self.queue
            .submit(move |sink| {
                let written = sink.apply(|out, header_written| {
                    let mut bytes = 0;
                    if let Some(strategy) = &strategy {
                        bytes = write_header_once(out, header_written, strategy, compression)?;
                    }
                    out.flush()?;
                    Ok(bytes)
                })?;
                counters.bytes.fetch_add(written, Ordering::Relaxed);
                let out = sink.out.take().ok_or(PdsError::WriterClosed)?;
                info!(
                    events = counters.events.load(Ordering::Relaxed),
                    bytes = counters.bytes.load(Ordering::Relaxed),
                    "PDS writer closed"
                );
                Ok(out)
            })
            .await
    }
}

#[async_trait]
impl<W: Write + Send + 'static> Outputer for PdsOutputer<W> {
    fn setup_for_lane(&self, lane: usize, products: &[ProductDescriptor]) -> PdsResult<()> {
        self.lanes.setup(lane, products)
    }

    async fn product_ready(&self, lane: usize, product: DataProduct) -> PdsResult<bool> {
        self.lanes.product_ready(lane, product).await
    }

    async fn output_event(&self, lane: usize, id: EventIdentifier) -> PdsResult<()> {
        let strategy = Arc::clone(self.lanes.get(lane)?);
        let (compression, level) = (self.compression, self.level);

        let start = Instant::now();
        let assembling = Arc::clone(&strategy);
        let body = tokio::task::spawn_blocking(move || {
            let raw = assembling.assemble_event_buffer()?;
            encode_event_body(compression, level, &raw)
        })
        .await
        .map_err(|e| PdsError::Task(format!("event compression on lane {lane}: {e}")))??;
        WriterCounters::add_time(&self.counters.parallel_nanos, start.elapsed());

        let counters = Arc::clone(&self.counters);
        self.queue
            .submit(move |sink| {
                let start = Instant::now();
                let result = sink.apply(|out, header_written| {
                    let header = write_header_once(out, header_written, &strategy, compression)?;
                    write_words(out, &event_header_words(id))?;
                    write_words(out, &body)?;
                    Ok(header + (EVENT_HEADER_WORDS + body.len()) as u64 * 4)
                });
                WriterCounters::add_time(&counters.serial_nanos, start.elapsed());

                let bytes = result?;
                counters.bytes.fetch_add(bytes, Ordering::Relaxed);
                counters.events.fetch_add(1, Ordering::Relaxed);
                debug!(lane, run = id.run, lumi = id.lumi, event = id.event, bytes, "wrote event");
                Ok(())
            })
            .await
    }

    async fn finish(&self) -> PdsResult<()> {
        self.close().await.map(drop)
    }

    fn summary(&self) -> OutputerSummary {
        OutputerSummary {
            name: "pds",
            events: self.counters.events.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes.load(Ordering::Relaxed),
            serial_time: Duration::from_nanos(self.counters.serial_nanos.load(Ordering::Relaxed)),
            parallel_time: Duration::from_nanos(
                self.counters.parallel_nanos.load(Ordering::Relaxed),
            ),
            serializer_times: self.lanes.merged_times(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Sink that fails every write after `limit` bytes.
    struct FailingSink {
        written: usize,
        limit: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() > self.limit {
                return Err(io::Error::other("disk full"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn products() -> [ProductDescriptor; 1] {
        [ProductDescriptor::new("adc", "Vec<u32>")]
    }

    async fn write_one<W: Write + Send + 'static>(
        writer: &PdsOutputer<W>,
        event: u64,
    ) -> PdsResult<()> {
        writer
            .product_ready(0, DataProduct::new(0, "adc", vec![event as u32; 16]))
            .await?;
        writer.output_event(0, EventIdentifier::new(1, 1, event)).await
    }

    #[test]
    fn test_builder_rejects_bad_level_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.pds");
        let err = PdsOutputer::builder()
            .compression(Compression::Zstd)
            .level(99)
            .create(&path)
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(!path.exists());

        assert!(PdsOutputer::builder().lanes(0).build(Vec::new()).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_summary_counts_bytes() {
        let writer = PdsOutputer::builder()
            .compression(Compression::None)
            .build(Vec::new())
            .unwrap();
        writer.setup_for_lane(0, &products()).unwrap();
        write_one(&writer, 1).await.unwrap();
        write_one(&writer, 2).await.unwrap();

        let summary = writer.summary();
        assert_eq!(summary.name, "pds");
        assert_eq!(summary.events, 2);

        let bytes = writer.close().await.unwrap();
        assert_eq!(writer.summary().bytes_written, bytes.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_write_poisons_sink() {
        let writer = PdsOutputer::builder()
            .compression(Compression::None)
            .build(FailingSink {
                written: 0,
                limit: 200,
            })
            .unwrap();
        writer.setup_for_lane(0, &products()).unwrap();

        let mut first_error = None;
        for event in 0..10 {
            if let Err(e) = write_one(&writer, event).await {
                first_error = Some(e);
                break;
            }
        }
        assert!(matches!(first_error, Some(PdsError::SinkPoisoned(_))));

        let err = write_one(&writer, 99).await.unwrap_err();
        assert!(matches!(err, PdsError::SinkPoisoned(ref m) if m.contains("disk full")));
    }

    #[tokio::test]
    async fn test_writes_after_close_rejected() {
        let writer = PdsOutputer::builder().build(Vec::new()).unwrap();
        writer.setup_for_lane(0, &products()).unwrap();
        let bytes = writer.close().await.unwrap();
        assert!(!bytes.is_empty());

        let err = write_one(&writer, 1).await.unwrap_err();
        assert!(matches!(err, PdsError::WriterClosed));
        assert!(matches!(writer.close().await, Err(PdsError::WriterClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_product_cannot_stand_in_for_missing_one() {
        let writer = PdsOutputer::builder()
            .compression(Compression::None)
            .build(Vec::new())
            .unwrap();
        writer
            .setup_for_lane(
                0,
                &[
                    ProductDescriptor::new("adc", "Vec<u32>"),
                    ProductDescriptor::new("tdc", "Vec<u32>"),
                ],
            )
            .unwrap();

        assert!(!writer
            .product_ready(0, DataProduct::new(0, "adc", vec![1u32]))
            .await
            .unwrap());
        assert!(writer
            .product_ready(0, DataProduct::new(1, "tdc", vec![2u32]))
            .await
            .unwrap());
        writer
            .output_event(0, EventIdentifier::new(1, 1, 1))
            .await
            .unwrap();

        assert!(!writer
            .product_ready(0, DataProduct::new(0, "adc", vec![3u32]))
            .await
            .unwrap());
        let err = writer
            .product_ready(0, DataProduct::new(0, "adc", vec![4u32]))
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::ProductAlreadyReady { lane: 0, index: 0 }));

        let err = writer
            .output_event(0, EventIdentifier::new(1, 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::ProductsNotReady { ready: 1, expected: 2, .. }));
        assert_eq!(writer.summary().events, 1);
    }

    #[tokio::test]
    async fn test_close_without_lanes_writes_nothing() {
        let writer = PdsOutputer::builder().build(Vec::new()).unwrap();
        assert!(writer.close().await.unwrap().is_empty());
    }
}
