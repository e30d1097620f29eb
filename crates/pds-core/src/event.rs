//! Event and data-product descriptors shared by sources, writers and readers.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identifies one event's data. Assigned by the source.
///
/// Orders by (run, lumi, event). File position carries no ordering
/// information, so readers sort on this value when logical order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EventIdentifier {
    /// Run number
    pub run: u32,
    /// Luminosity block within the run
    pub lumi: u32,
    /// Event number within the run
    pub event: u64,
}

impl EventIdentifier {
    /// Create a new identifier
    pub const fn new(run: u32, lumi: u32, event: u64) -> Self {
        Self { run, lumi, event }
    }

    /// High 32 bits of the event number
    pub const fn event_high(&self) -> u32 {
        (self.event >> 32) as u32
    }

    /// Low 32 bits of the event number
    pub const fn event_low(&self) -> u32 {
        (self.event & 0xFFFF_FFFF) as u32
    }

    /// Rebuild an identifier from its split event number
    pub const fn from_words(run: u32, lumi: u32, high: u32, low: u32) -> Self {
        Self {
            run,
            lumi,
            event: ((high as u64) << 32) | low as u64,
        }
    }
}

impl fmt::Display for EventIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run:{} lumi:{} event:{}", self.run, self.lumi, self.event)
    }
}

/// Schema entry for one data product stored in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    /// Product name
    pub name: String,
    /// Index into the container's sorted type-name table
    pub class_index: u32,
    /// Class name the index resolves to
    pub class_name: String,
}

/// What a source announces about a product when a lane is set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDescriptor {
    /// Product name
    pub name: String,
    /// Class name used to look up the blob codec
    pub class_name: String,
}

impl ProductDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
        }
    }
}

/// Shared, type-erased product value handed from a lane to an outputer.
pub type ProductValue = Arc<dyn Any + Send + Sync>;

/// One product of the event a lane is currently processing.
#[derive(Clone)]
pub struct DataProduct {
    /// Position in the lane's product list (the canonical product index)
    pub index: usize,
    /// Product name
    pub name: String,
    /// The in-memory value the blob codec encodes
    pub value: ProductValue,
}

impl DataProduct {
    /// Wrap a value as a product
    pub fn new<T: Any + Send + Sync>(index: usize, name: impl Into<String>, value: T) -> Self {
        Self {
            index,
            name: name.into(),
            value: Arc::new(value),
        }
    }
}

impl fmt::Debug for DataProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProduct")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_number_split() {
        let id = EventIdentifier::new(7, 3, 0x0000_0012_8000_0001);
        assert_eq!(id.event_high(), 0x12);
        assert_eq!(id.event_low(), 0x8000_0001);
        assert_eq!(
            EventIdentifier::from_words(7, 3, id.event_high(), id.event_low()),
            id
        );
    }

    #[test]
    fn test_ordering_is_run_lumi_event() {
        let mut ids = vec![
            EventIdentifier::new(2, 1, 1),
            EventIdentifier::new(1, 2, 0),
            EventIdentifier::new(1, 1, 9),
        ];
        ids.sort();
        assert_eq!(ids[0], EventIdentifier::new(1, 1, 9));
        assert_eq!(ids[2], EventIdentifier::new(2, 1, 1));
    }

    #[test]
    fn test_identifier_serde() {
        let id = EventIdentifier::new(1, 1, u64::MAX);
        let json = serde_json::to_string(&id).unwrap();
        let back: EventIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_data_product_downcast() {
        let p = DataProduct::new(2, "hits", vec![1u32, 2, 3]);
        assert_eq!(p.index, 2);
        assert_eq!(p.value.downcast_ref::<Vec<u32>>(), Some(&vec![1, 2, 3]));
    }
}
