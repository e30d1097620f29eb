//! Typed blob codecs and the class-name registry that resolves them.
//!
//! A container never interprets product bytes itself. Each product's class
//! name maps to a [`BlobCodec`] that turns the in-memory value into an opaque
//! blob and back. Two serialization variants share the same container
//! framing and differ only in how a codec lays out each product's bytes; the
//! variant in use is recorded in the file's magic word.
//!
//! Codecs are resolved through [`CodecRegistry`] once per lane (writer) or
//! once per reader, then cached per product index, so no lookup happens per
//! event.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builtin;
use crate::error::{PdsError, PdsResult};

/// Per-product byte layout variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    /// Elements written one after another (variant flag 0)
    #[default]
    Standard,
    /// Elements split into byte planes (variant flag 1)
    Unrolled,
}

impl Serialization {
    /// Flag added to the magic word
    pub const fn flag(self) -> u32 {
        match self {
            Self::Standard => 0,
            Self::Unrolled => 1,
        }
    }

    /// Variant for a magic-word flag
    pub const fn from_flag(flag: u32) -> Option<Self> {
        match flag {
            0 => Some(Self::Standard),
            1 => Some(Self::Unrolled),
            _ => None,
        }
    }
}

impl fmt::Display for Serialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Unrolled => write!(f, "unrolled"),
        }
    }
}

impl FromStr for Serialization {
    type Err = PdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "unrolled" => Ok(Self::Unrolled),
            _ => Err(PdsError::UnknownSerialization(s.to_string())),
        }
    }
}

/// Value produced by decoding a blob.
pub type DecodedValue = Box<dyn Any + Send + Sync>;

/// Converts one class of product between its in-memory value and a blob.
///
/// `decode` receives the blob as stored, zero-padded to a 4-byte boundary,
/// so an encoding must be self-delimiting.
pub trait BlobCodec: Send + Sync {
    /// Class name recorded in the container's type table
    fn class_name(&self) -> &str;

    /// Encode a product value into a blob.
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> PdsResult<Vec<u8>>;

    /// Decode a (possibly padded) blob into a product value.
    fn decode(&self, bytes: &[u8]) -> PdsResult<DecodedValue>;
}

type CodecFactory = Box<dyn Fn() -> Arc<dyn BlobCodec> + Send + Sync>;

/// Registry of blob codec factories keyed by class name and variant.
///
/// `CodecRegistry::new()` registers the built-in codecs for both variants:
/// `Vec<u8>`, `Vec<u32>`, `Vec<u64>`, `Vec<i32>`, `Vec<f32>`, `Vec<f64>` and
/// `String`.
///
/// # Examples
///
/// ```
/// use pds_core::{CodecRegistry, Serialization};
///
/// let registry = CodecRegistry::new();
/// let codec = registry.resolve("Vec<f32>", Serialization::Standard)?;
/// let blob = codec.encode(&vec![1.0f32, 2.0])?;
/// let value = codec.decode(&blob)?;
/// assert_eq!(value.downcast_ref::<Vec<f32>>(), Some(&vec![1.0f32, 2.0]));
/// # Ok::<(), pds_core::PdsError>(())
/// ```
pub struct CodecRegistry {
    factories: HashMap<(String, Serialization), CodecFactory>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("classes", &self.list_classes())
            .finish()
    }
}

impl CodecRegistry {
    /// Creates a registry with every built-in codec registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        builtin::register_builtin_codecs(&mut registry);
        registry
    }

    /// Creates a registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a codec factory, replacing any previous one for the same key.
    pub fn register<F>(&mut self, class_name: &str, variant: Serialization, factory: F)
    where
        F: Fn() -> Arc<dyn BlobCodec> + Send + Sync + 'static,
    {
        debug!(class = class_name, %variant, "registering blob codec");
        self.factories
            .insert((class_name.to_string(), variant), Box::new(factory));
    }

    /// Creates the codec for a class name and variant.
    pub fn resolve(&self, class_name: &str, variant: Serialization) -> PdsResult<Arc<dyn BlobCodec>> {
        self.factories
            .get(&(class_name.to_string(), variant))
            .map(|factory| factory())
            .ok_or_else(|| PdsError::UnknownClass {
                class: class_name.to_string(),
                variant,
            })
    }

    /// Sorted, deduplicated class names with at least one registered variant.
    pub fn list_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.factories.keys().map(|(c, _)| c.clone()).collect();
        classes.sort();
        classes.dedup();
        classes
    }

    /// True if a codec exists for the class name and variant.
    pub fn is_available(&self, class_name: &str, variant: Serialization) -> bool {
        self.factories
            .contains_key(&(class_name.to_string(), variant))
    }
}
