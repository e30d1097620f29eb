//! Lane scheduler: N concurrent lanes pulling events from one source.
//!
//! Lanes draw event indices from a shared atomic counter until the source's
//! budget is spent. Each lane handles one event at a time: all products are
//! handed to the outputer concurrently, and the event is output once every
//! product has reported ready. Lanes share no in-flight event state.
//!
//! The first lane error stops the other lanes at their next event boundary
//! and is returned from [`run_lanes`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use pds_core::{PdsError, PdsResult};
use pds_storage::{Outputer, OutputerSummary};
use tracing::{debug, error, info, info_span, Instrument};

use crate::source::Source;

/// Per-lane totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneReport {
    /// Lane index
    pub lane: usize,
    /// Events this lane wrote
    pub events: u64,
    /// Time spent producing events in the source
    pub source_time: Duration,
}

/// Totals for a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Events written across all lanes
    pub events: u64,
    /// Wall-clock time of the run, finish included
    pub elapsed: Duration,
    /// Per-lane totals in lane order
    pub lanes: Vec<LaneReport>,
    /// Outputer counters after finish
    pub outputer: OutputerSummary,
}

impl RunSummary {
    /// Source time summed over lanes
    pub fn source_time(&self) -> Duration {
        self.lanes.iter().map(|l| l.source_time).sum()
    }

    /// Events per second of wall-clock time
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.events as f64 / secs
    }

    /// Emit through `tracing`.
    pub fn log(&self) {
        info!(
            events = self.events,
            lanes = self.lanes.len(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            source_ms = self.source_time().as_millis() as u64,
            events_per_sec = format!("{:.1}", self.throughput()),
            "run complete"
        );
    }
}

/// Set up every lane, run them to completion, then finish the outputer.
pub async fn run_lanes(
    source: Arc<dyn Source>,
    outputer: Arc<dyn Outputer>,
    lanes: usize,
) -> PdsResult<RunSummary> {
    if lanes == 0 {
        return Err(PdsError::Configuration("at least one lane is required".into()));
    }

    let descriptors = source.product_descriptors();
    for lane in 0..lanes {
        outputer.setup_for_lane(lane, &descriptors)?;
    }
    info!(
        lanes,
        source = source.name(),
        events = source.num_events(),
        products = descriptors.len(),
        "starting lanes"
    );

    let start = Instant::now();
    let next_event = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..lanes)
        .map(|lane| {
            let lane_task = run_lane(
                lane,
                Arc::clone(&source),
                Arc::clone(&outputer),
                Arc::clone(&next_event),
                Arc::clone(&stop),
            );
            tokio::spawn(lane_task.instrument(info_span!("lane", lane)))
        })
        .collect();

    let mut reports = Vec::with_capacity(lanes);
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(PdsError::Task(format!("lane task failed: {e}")));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    outputer.finish().await?;
    outputer.print_summary();
    let summary = RunSummary {
        events: reports.iter().map(|r| r.events).sum(),
        elapsed: start.elapsed(),
        lanes: reports,
        outputer: outputer.summary(),
    };
    Ok(summary)
}

async fn run_lane(
    lane: usize,
    source: Arc<dyn Source>,
    outputer: Arc<dyn Outputer>,
    next_event: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) -> PdsResult<LaneReport> {
    let mut report = LaneReport {
        lane,
        ..LaneReport::default()
    };

    let result = async {
        while !stop.load(Ordering::Acquire) {
            let index = next_event.fetch_add(1, Ordering::AcqRel);
            if index >= source.num_events() {
                break;
            }

            let produced = Instant::now();
            let Some(event) = source.read_event(lane, index) else {
                break;
            };
            report.source_time += produced.elapsed();

            try_join_all(
                event
                    .products
                    .into_iter()
                    .map(|product| outputer.product_ready(lane, product)),
            )
            .await?;
            outputer.output_event(lane, event.id).await?;
            report.events += 1;
        }
        Ok::<_, PdsError>(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!(lane, events = report.events, "lane finished");
            Ok(report)
        }
        Err(e) => {
            error!(lane, error = %e, "lane failed, stopping remaining lanes");
            stop.store(true, Ordering::Release);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{EmptySource, SourceEvent};
    use pds_core::{CodecRegistry, DataProduct, EventIdentifier, ProductDescriptor, Serialization};
    use pds_storage::NullOutputer;

    /// Source whose products cannot be encoded after a given index.
    struct BrokenSource {
        fail_at: u64,
    }

    impl Source for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn product_descriptors(&self) -> Vec<ProductDescriptor> {
            vec![ProductDescriptor::new("adc", "Vec<u32>")]
        }

        fn num_events(&self) -> u64 {
            1000
        }

        fn read_event(&self, _lane: usize, index: u64) -> Option<SourceEvent> {
            let product = if index == self.fail_at {
                DataProduct::new(0, "adc", "wrong type".to_string())
            } else {
                DataProduct::new(0, "adc", vec![index as u32])
            };
            Some(SourceEvent {
                id: EventIdentifier::new(1, 1, index),
                products: vec![product],
            })
        }
    }

    fn null_outputer(lanes: usize) -> Arc<NullOutputer> {
        Arc::new(NullOutputer::new(
            lanes,
            Arc::new(CodecRegistry::new()),
            Serialization::Standard,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_event_written_once() {
        let outputer = null_outputer(4);
        let summary = run_lanes(Arc::new(EmptySource::new(250)), outputer.clone(), 4)
            .await
            .unwrap();
        assert_eq!(summary.events, 250);
        assert_eq!(summary.lanes.len(), 4);
        assert_eq!(summary.outputer.events, 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lane_error_stops_run() {
        let err = run_lanes(Arc::new(BrokenSource { fail_at: 17 }), null_outputer(2), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::Codec { .. }));
    }

    #[tokio::test]
    async fn test_zero_lanes_rejected() {
        let err = run_lanes(Arc::new(EmptySource::new(1)), null_outputer(1), 0)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
