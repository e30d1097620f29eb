//! Per-lane product serialization.
//!
//! A [`SerializerStrategy`] is built once per lane, when the lane announces
//! its product list. It binds every product, in order, to a blob codec; that
//! order is the canonical product index used in the container. Each product
//! owns a blob slot that its encode writes and event assembly reads, plus a
//! ready flag that is set once per event and cleared by assembly.
//!
//! Concurrency contract: encodes of *different* products of one lane may run
//! at the same time; a lane never starts the next event's encodes before the
//! current event has been assembled.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use pds_core::{
    BlobCodec, CodecRegistry, DataProduct, PdsError, PdsResult, ProductDescriptor, Serialization,
};
use tracing::{debug, trace};

use crate::format::{bytes_to_words, copy_bytes_into};

/// One product's codec binding and blob slot.
pub struct ProductSerializer {
    name: String,
    class_name: String,
    codec: Arc<dyn BlobCodec>,
    blob: Mutex<Vec<u8>>,
    fresh: AtomicBool,
    encode_nanos: AtomicU64,
    encoded_bytes: AtomicU64,
}

impl ProductSerializer {
    /// Product name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class name the codec was resolved from
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Size of the most recent blob
    pub fn blob_len(&self) -> usize {
        self.blob.lock().len()
    }

    /// True once reported ready for the current event
    pub fn is_ready(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    /// Time spent encoding so far
    pub fn accumulated_time(&self) -> Duration {
        Duration::from_nanos(self.encode_nanos.load(Ordering::Relaxed))
    }

    fn encode(&self, value: &(dyn Any + Send + Sync)) -> PdsResult<()> {
        let start = Instant::now();
        let blob = self.codec.encode(value)?;
        self.encoded_bytes
            .fetch_add(blob.len() as u64, Ordering::Relaxed);
        *self.blob.lock() = blob;
        self.encode_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Encode statistics for one product on one lane.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializerStats {
    /// Product name
    pub name: String,
    /// Class name
    pub class_name: String,
    /// Accumulated encode time
    pub encode_time: Duration,
    /// Total blob bytes produced
    pub encoded_bytes: u64,
}

/// Ordered codec bindings for one lane.
pub struct SerializerStrategy {
    lane: usize,
    serialization: Serialization,
    products: Vec<ProductSerializer>,
    ready: AtomicUsize,
}

impl SerializerStrategy {
    /// Bind each product to its codec. Resolution happens here, once.
    pub fn setup_for_lane(
        lane: usize,
        descriptors: &[ProductDescriptor],
        registry: &CodecRegistry,
        serialization: Serialization,
    ) -> PdsResult<Self> {
        let products = descriptors
            .iter()
            .map(|d| {
                validate_names(lane, d)?;
                let codec = registry.resolve(&d.class_name, serialization)?;
                Ok(ProductSerializer {
                    name: d.name.clone(),
                    class_name: d.class_name.clone(),
                    codec,
                    blob: Mutex::new(Vec::new()),
                    fresh: AtomicBool::new(false),
                    encode_nanos: AtomicU64::new(0),
                    encoded_bytes: AtomicU64::new(0),
                })
            })
            .collect::<PdsResult<Vec<_>>>()?;

        debug!(lane, products = products.len(), %serialization, "serializer strategy ready");
        Ok(Self {
            lane,
            serialization,
            products,
            ready: AtomicUsize::new(0),
        })
    }

    /// Lane this strategy belongs to
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Serialization variant the codecs were resolved for
    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    /// Number of products
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// True if the lane carries no products
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Product bindings in canonical order
    pub fn products(&self) -> &[ProductSerializer] {
        &self.products
    }

    /// The product list this strategy was built from
    pub fn descriptors(&self) -> Vec<ProductDescriptor> {
        self.products
            .iter()
            .map(|p| ProductDescriptor::new(p.name.clone(), p.class_name.clone()))
            .collect()
    }

    fn product(&self, index: usize) -> PdsResult<&ProductSerializer> {
        self.products.get(index).ok_or_else(|| {
            PdsError::Configuration(format!(
                "lane {} has {} products, got index {index}",
                self.lane,
                self.products.len()
            ))
        })
    }

    /// Encode one product's value into its blob slot.
    ///
    /// A slot already reported ready for the current event is left untouched.
    pub fn encode_product(&self, index: usize, value: &(dyn Any + Send + Sync)) -> PdsResult<()> {
        let product = self.product(index)?;
        if product.is_ready() {
            return Err(PdsError::ProductAlreadyReady {
                lane: self.lane,
                index,
            });
        }
        product.encode(value)
    }

    /// Flag one product as ready. True when it was the last one of the event.
    pub fn mark_ready(&self, index: usize) -> PdsResult<bool> {
        let product = self.product(index)?;
        if product.fresh.swap(true, Ordering::AcqRel) {
            return Err(PdsError::ProductAlreadyReady {
                lane: self.lane,
                index,
            });
        }
        let ready = self.ready.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(lane = self.lane, index, ready, expected = self.products.len(), "product ready");
        Ok(ready == self.products.len())
    }

    /// Products marked ready for the current event
    pub fn ready_count(&self) -> usize {
        self.ready.load(Ordering::Acquire)
    }

    /// Concatenate `[index][sizeWords][blob, zero-padded]` for every product.
    ///
    /// Requires every product to be ready for this event, then clears the
    /// ready flags and the counter for the next one.
    pub fn assemble_event_buffer(&self) -> PdsResult<Vec<u32>> {
        let expected = self.products.len();
        let not_ready = |ready| PdsError::ProductsNotReady {
            lane: self.lane,
            ready,
            expected,
        };
        let fresh = self.products.iter().filter(|p| p.is_ready()).count();
        if fresh != expected {
            return Err(not_ready(fresh));
        }
        self.ready
            .compare_exchange(expected, 0, Ordering::AcqRel, Ordering::Acquire)
            .map_err(not_ready)?;

        let blobs: Vec<_> = self.products.iter().map(|p| p.blob.lock()).collect();
        for product in &self.products {
            product.fresh.store(false, Ordering::Release);
        }
        let total: usize = blobs.iter().map(|b| 2 + bytes_to_words(b.len())).sum();

        let mut buffer = vec![0u32; total];
        let mut pos = 0;
        for (index, blob) in blobs.iter().enumerate() {
            let words = bytes_to_words(blob.len());
            buffer[pos] = index as u32;
            buffer[pos + 1] = words as u32;
            copy_bytes_into(&mut buffer[pos + 2..pos + 2 + words], blob);
            pos += 2 + words;
        }
        Ok(buffer)
    }

    /// Per-product encode statistics
    pub fn stats(&self) -> Vec<SerializerStats> {
        self.products
            .iter()
            .map(|p| SerializerStats {
                name: p.name.clone(),
                class_name: p.class_name.clone(),
                encode_time: p.accumulated_time(),
                encoded_bytes: p.encoded_bytes.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Fixed table of per-lane strategies shared by the outputers.
pub struct LaneSerializers {
    lanes: Vec<OnceCell<Arc<SerializerStrategy>>>,
    registry: Arc<CodecRegistry>,
    serialization: Serialization,
}

impl LaneSerializers {
    /// Table for `n_lanes` lanes, none set up yet.
    pub fn new(n_lanes: usize, registry: Arc<CodecRegistry>, serialization: Serialization) -> Self {
        Self {
            lanes: (0..n_lanes).map(|_| OnceCell::new()).collect(),
            registry,
            serialization,
        }
    }

    /// Number of lane slots
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Serialization variant used for every lane
    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    /// Build and store a lane's strategy. Each lane is set up once.
    ///
    /// Every lane writes into the same container, so all lanes must announce
    /// the product list the first one did.
    pub fn setup(&self, lane: usize, descriptors: &[ProductDescriptor]) -> PdsResult<()> {
        let slot = self.lanes.get(lane).ok_or_else(|| {
            PdsError::Configuration(format!(
                "lane {lane} out of range for {} lanes",
                self.lanes.len()
            ))
        })?;
        if let Some(other) = self.first_ready() {
            if other.descriptors() != descriptors {
                return Err(PdsError::Configuration(format!(
                    "lane {lane} product list differs from lane {}",
                    other.lane()
                )));
            }
        }
        let strategy =
            SerializerStrategy::setup_for_lane(lane, descriptors, &self.registry, self.serialization)?;
        slot.set(Arc::new(strategy))
            .map_err(|_| PdsError::Configuration(format!("lane {lane} set up twice")))
    }

    /// Strategy for a lane that has been set up.
    pub fn get(&self, lane: usize) -> PdsResult<&Arc<SerializerStrategy>> {
        self.lanes
            .get(lane)
            .and_then(OnceCell::get)
            .ok_or(PdsError::LaneNotSetUp(lane))
    }

    /// First lane that has been set up, if any
    pub fn first_ready(&self) -> Option<Arc<SerializerStrategy>> {
        self.lanes.iter().find_map(|slot| slot.get().cloned())
    }

    /// Encode a product on the blocking pool and mark it ready.
    ///
    /// Returns true when this was the event's last outstanding product.
    pub async fn product_ready(&self, lane: usize, product: DataProduct) -> PdsResult<bool> {
        let strategy = Arc::clone(self.get(lane)?);
        tokio::task::spawn_blocking(move || -> PdsResult<bool> {
            strategy.encode_product(product.index, &*product.value)?;
            strategy.mark_ready(product.index)
        })
        .await
        .map_err(|e| PdsError::Task(format!("product encode on lane {lane}: {e}")))?
    }

    /// Encode times summed across lanes, per product name, slowest first.
    pub fn merged_times(&self) -> Vec<(String, Duration)> {
        let mut merged: Vec<(String, Duration)> = Vec::new();
        for strategy in self.lanes.iter().filter_map(OnceCell::get) {
            for stat in strategy.stats() {
                match merged.iter_mut().find(|(name, _)| *name == stat.name) {
                    Some((_, total)) => *total += stat.encode_time,
                    None => merged.push((stat.name, stat.encode_time)),
                }
            }
        }
        merged.sort_by(|a, b| b.1.cmp(&a.1));
        merged
    }
}

/// Names are written NUL-terminated into the file header.
fn validate_names(lane: usize, descriptor: &ProductDescriptor) -> PdsResult<()> {
    if descriptor.class_name.is_empty() {
        return Err(PdsError::Configuration(format!(
            "lane {lane}: product '{}' has an empty class name",
            descriptor.name
        )));
    }
    if descriptor.name.contains('\0') || descriptor.class_name.contains('\0') {
        return Err(PdsError::Configuration(format!(
            "lane {lane}: product {:?} ({:?}) contains a NUL byte",
            descriptor.name, descriptor.class_name
        )));
    }
    Ok(())
}
