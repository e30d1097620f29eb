//! The outputer interface lanes drive, plus a discarding implementation.
//!
//! Protocol per lane:
//!
//! 1. `setup_for_lane` once, with the lane's product list;
//! 2. per event, `product_ready` for every product (concurrently is fine);
//! 3. `output_event` once all products reported ready;
//! 4. after every lane finished, `finish` and `print_summary`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pds_core::{
    CodecRegistry, DataProduct, EventIdentifier, PdsError, PdsResult, ProductDescriptor,
    Serialization,
};
use tracing::{debug, info};

use crate::serializer::LaneSerializers;

/// Sink for events produced by parallel lanes.
#[async_trait]
pub trait Outputer: Send + Sync {
    /// Bind a lane to its product list. Called once per lane before any event.
    fn setup_for_lane(&self, lane: usize, products: &[ProductDescriptor]) -> PdsResult<()>;

    /// Encode one product of the lane's current event.
    ///
    /// Returns true when this was the last product the event was waiting for.
    async fn product_ready(&self, lane: usize, product: DataProduct) -> PdsResult<bool>;

    /// Emit the lane's current event once all its products are ready.
    async fn output_event(&self, lane: usize, id: EventIdentifier) -> PdsResult<()>;

    /// Flush and release any underlying sink.
    async fn finish(&self) -> PdsResult<()> {
        Ok(())
    }

    /// Accumulated counters and timings.
    fn summary(&self) -> OutputerSummary;

    /// Log the summary.
    fn print_summary(&self) {
        self.summary().log();
    }
}

/// Counters and timings collected by an outputer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputerSummary {
    /// Outputer kind
    pub name: &'static str,
    /// Events fully written
    pub events: u64,
    /// Bytes appended to the sink, header included
    pub bytes_written: u64,
    /// Time spent in the ordered write stage
    pub serial_time: Duration,
    /// Time spent assembling and compressing outside the write stage
    pub parallel_time: Duration,
    /// Encode time per product summed across lanes, slowest first
    pub serializer_times: Vec<(String, Duration)>,
}

impl OutputerSummary {
    /// Emit through `tracing`.
    pub fn log(&self) {
        info!(
            outputer = self.name,
            events = self.events,
            bytes = self.bytes_written,
            serial_ms = self.serial_time.as_millis() as u64,
            parallel_ms = self.parallel_time.as_millis() as u64,
            "outputer summary"
        );
        for (product, time) in &self.serializer_times {
            info!(product = %product, micros = time.as_micros() as u64, "serializer time");
        }
    }
}

/// Runs every serializer, then discards the event.
///
/// Measures product encoding and buffer assembly without touching storage.
pub struct NullOutputer {
    lanes: LaneSerializers,
    events: AtomicU64,
    assembled_bytes: AtomicU64,
    parallel_nanos: AtomicU64,
}

impl NullOutputer {
    /// Create for `n_lanes` lanes.
    pub fn new(n_lanes: usize, registry: Arc<CodecRegistry>, serialization: Serialization) -> Self {
        Self {
            lanes: LaneSerializers::new(n_lanes, registry, serialization),
            events: AtomicU64::new(0),
            assembled_bytes: AtomicU64::new(0),
            parallel_nanos: AtomicU64::new(0),
        }
    }

    /// Assembled event-buffer bytes discarded so far
    pub fn assembled_bytes(&self) -> u64 {
        self.assembled_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Outputer for NullOutputer {
    fn setup_for_lane(&self, lane: usize, products: &[ProductDescriptor]) -> PdsResult<()> {
        self.lanes.setup(lane, products)
    }

    async fn product_ready(&self, lane: usize, product: DataProduct) -> PdsResult<bool> {
        self.lanes.product_ready(lane, product).await
    }

    async fn output_event(&self, lane: usize, id: EventIdentifier) -> PdsResult<()> {
        let strategy = Arc::clone(self.lanes.get(lane)?);
        let start = Instant::now();
        let buffer = tokio::task::spawn_blocking(move || strategy.assemble_event_buffer())
            .await
            .map_err(|e| PdsError::Task(format!("event assembly on lane {lane}: {e}")))??;

        self.parallel_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.assembled_bytes
            .fetch_add(buffer.len() as u64 * 4, Ordering::Relaxed);
        self.events.fetch_add(1, Ordering::Relaxed);
        debug!(lane, run = id.run, event = id.event, "discarded event");
        Ok(())
    }

    fn summary(&self) -> OutputerSummary {
        OutputerSummary {
            name: "null",
            events: self.events.load(Ordering::Relaxed),
            bytes_written: 0,
            serial_time: Duration::ZERO,
            parallel_time: Duration::from_nanos(self.parallel_nanos.load(Ordering::Relaxed)),
            serializer_times: self.lanes.merged_times(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_null_outputer_counts_events() {
        let out = NullOutputer::new(1, Arc::new(CodecRegistry::new()), Serialization::Standard);
        out.setup_for_lane(0, &[ProductDescriptor::new("adc", "Vec<u64>")])
            .unwrap();

        for i in 0..3u64 {
            let last = out
                .product_ready(0, DataProduct::new(0, "adc", vec![i; 4]))
                .await
                .unwrap();
            assert!(last);
            out.output_event(0, EventIdentifier::new(1, 1, i)).await.unwrap();
        }

        let summary = out.summary();
        assert_eq!(summary.events, 3);
        assert_eq!(summary.bytes_written, 0);
        assert_eq!(summary.serializer_times.len(), 1);
        // per event: 2 entry words + (4 + 32 bytes) / 4
        assert_eq!(out.assembled_bytes(), 3 * (2 + 9) * 4);
        out.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_output_before_ready_rejected() {
        let out = NullOutputer::new(1, Arc::new(CodecRegistry::new()), Serialization::Standard);
        out.setup_for_lane(0, &[ProductDescriptor::new("adc", "Vec<u64>")])
            .unwrap();
        let err = out
            .output_event(0, EventIdentifier::new(1, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::ProductsNotReady { .. }));
    }

    #[tokio::test]
    async fn test_lane_not_set_up() {
        let out = NullOutputer::new(2, Arc::new(CodecRegistry::new()), Serialization::Standard);
        let err = out
            .product_ready(1, DataProduct::new(0, "x", vec![0u8]))
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::LaneNotSetUp(1)));
    }
}
