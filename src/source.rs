//! Event sources that feed the lanes.
//!
//! A [`Source`] announces its product list once, then produces the event at
//! any index on request. Sources are shared by every lane, so production
//! takes `&self` and must be safe to call from several lanes at once.
//!
//! - [`EmptySource`]: events carry no products. Measures framing overhead.
//! - [`SyntheticSource`]: reproducible random products of built-in classes.

use std::sync::Arc;

use pds_core::{DataProduct, EventIdentifier, ProductDescriptor, ProductValue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{SyntheticConfig, SyntheticProduct};

/// Class names the synthetic source can generate.
pub const SUPPORTED_SYNTHETIC_CLASSES: [&str; 7] = [
    "Vec<u8>", "Vec<u32>", "Vec<u64>", "Vec<i32>", "Vec<f32>", "Vec<f64>", "String",
];

/// One event handed to a lane.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    /// Event identifier
    pub id: EventIdentifier,
    /// Products in canonical index order
    pub products: Vec<DataProduct>,
}

/// Producer of events for the lane scheduler.
pub trait Source: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Products every event carries, in canonical order
    fn product_descriptors(&self) -> Vec<ProductDescriptor>;

    /// Total events this source produces
    fn num_events(&self) -> u64;

    /// Produce event `index` on behalf of `lane`. `None` past the budget.
    fn read_event(&self, lane: usize, index: u64) -> Option<SourceEvent>;
}

/// Events with identifiers only.
#[derive(Debug, Clone)]
pub struct EmptySource {
    events: u64,
}

impl EmptySource {
    /// Source of `events` empty events
    pub fn new(events: u64) -> Self {
        Self { events }
    }
}

impl Source for EmptySource {
    fn name(&self) -> &str {
        "empty"
    }

    fn product_descriptors(&self) -> Vec<ProductDescriptor> {
        Vec::new()
    }

    fn num_events(&self) -> u64 {
        self.events
    }

    fn read_event(&self, _lane: usize, index: u64) -> Option<SourceEvent> {
        (index < self.events).then(|| SourceEvent {
            id: EventIdentifier::new(1, 1, index + 1),
            products: Vec::new(),
        })
    }
}

/// Randomized products, reproducible per (seed, event index).
///
/// Numeric vectors follow a slow random walk so they compress the way
/// digitized detector data does rather than like white noise.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    events: u64,
    run: u32,
    events_per_lumi: u64,
    seed: u64,
    products: Arc<[SyntheticProduct]>,
}

impl SyntheticSource {
    /// Source of `events` events shaped by `config`
    pub fn new(events: u64, config: &SyntheticConfig) -> Self {
        Self {
            events,
            run: config.run,
            events_per_lumi: config.events_per_lumi.max(1),
            seed: config.seed,
            products: config.products.clone().into(),
        }
    }

    fn identifier(&self, index: u64) -> EventIdentifier {
        let lumi = (index / self.events_per_lumi) as u32 + 1;
        EventIdentifier::new(self.run, lumi, index + 1)
    }
}

impl Source for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn product_descriptors(&self) -> Vec<ProductDescriptor> {
        self.products
            .iter()
            .map(|p| ProductDescriptor::new(p.name.clone(), p.class.clone()))
            .collect()
    }

    fn num_events(&self) -> u64 {
        self.events
    }

    fn read_event(&self, _lane: usize, index: u64) -> Option<SourceEvent> {
        if index >= self.events {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let products = self
            .products
            .iter()
            .enumerate()
            .map(|(i, p)| DataProduct {
                index: i,
                name: p.name.clone(),
                value: generate(&mut rng, &p.class, p.length),
            })
            .collect();

        Some(SourceEvent {
            id: self.identifier(index),
            products,
        })
    }
}

fn jittered_len(rng: &mut StdRng, mean: usize) -> usize {
    let spread = mean / 2;
    if spread == 0 {
        return mean;
    }
    rng.gen_range(mean - spread..=mean + spread)
}

fn walk(rng: &mut StdRng, n: usize, step: f64) -> Vec<f64> {
    let mut x = rng.gen_range(0.0..100.0);
    (0..n)
        .map(|_| {
            x += rng.gen_range(-step..=step);
            x
        })
        .collect()
}

fn generate(rng: &mut StdRng, class: &str, mean: usize) -> ProductValue {
    let n = jittered_len(rng, mean);
    match class {
        "Vec<u8>" => Arc::new(
            walk(rng, n, 2.0)
                .into_iter()
                .map(|v| v.rem_euclid(256.0) as u8)
                .collect::<Vec<u8>>(),
        ),
        "Vec<u32>" => Arc::new(
            walk(rng, n, 16.0)
                .into_iter()
                .map(|v| v.abs() as u32)
                .collect::<Vec<u32>>(),
        ),
        "Vec<u64>" => Arc::new((0..n).map(|_| rng.gen_range(0..1u64 << 40)).collect::<Vec<u64>>()),
        "Vec<i32>" => Arc::new(
            walk(rng, n, 8.0)
                .into_iter()
                .map(|v| v as i32)
                .collect::<Vec<i32>>(),
        ),
        "Vec<f32>" => Arc::new(
            walk(rng, n, 0.5)
                .into_iter()
                .map(|v| v as f32)
                .collect::<Vec<f32>>(),
        ),
        "Vec<f64>" => Arc::new(walk(rng, n, 0.25)),
        _ => Arc::new(
            (0..n)
                .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                .collect::<String>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source() {
        let source = EmptySource::new(3);
        assert!(source.product_descriptors().is_empty());
        let event = source.read_event(0, 2).unwrap();
        assert_eq!(event.id, EventIdentifier::new(1, 1, 3));
        assert!(event.products.is_empty());
        assert!(source.read_event(0, 3).is_none());
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let config = SyntheticConfig::default();
        let a = SyntheticSource::new(10, &config);
        let b = SyntheticSource::new(10, &config);

        let ea = a.read_event(0, 4).unwrap();
        let eb = b.read_event(3, 4).unwrap();
        assert_eq!(ea.id, eb.id);
        let va = ea.products[1].value.downcast_ref::<Vec<u32>>().unwrap();
        let vb = eb.products[1].value.downcast_ref::<Vec<u32>>().unwrap();
        assert_eq!(va, vb);
        assert!(a.read_event(0, 10).is_none());
    }

    #[test]
    fn test_synthetic_product_types_match_classes() {
        let config = SyntheticConfig::default();
        let source = SyntheticSource::new(1, &config);
        let event = source.read_event(0, 0).unwrap();
        assert_eq!(event.products.len(), config.products.len());
        for (product, descriptor) in event.products.iter().zip(source.product_descriptors()) {
            assert_eq!(product.name, descriptor.name);
            let value = &product.value;
            let matches = match descriptor.class_name.as_str() {
                "Vec<u8>" => value.is::<Vec<u8>>(),
                "Vec<u32>" => value.is::<Vec<u32>>(),
                "Vec<f32>" => value.is::<Vec<f32>>(),
                "Vec<f64>" => value.is::<Vec<f64>>(),
                "String" => value.is::<String>(),
                _ => false,
            };
            assert!(matches, "{} is not a {}", product.name, descriptor.class_name);
        }
    }

    #[test]
    fn test_lumi_blocks() {
        let config = SyntheticConfig {
            events_per_lumi: 10,
            products: Vec::new(),
            ..SyntheticConfig::default()
        };
        let source = SyntheticSource::new(30, &config);
        assert_eq!(source.read_event(0, 0).unwrap().id.lumi, 1);
        assert_eq!(source.read_event(0, 10).unwrap().id.lumi, 2);
        assert_eq!(source.read_event(0, 29).unwrap().id, EventIdentifier::new(1, 3, 30));
    }
}
