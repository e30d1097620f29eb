//! Built-in blob codecs for plain numeric vectors and strings.
//!
//! Every built-in blob starts with a little-endian `u32` element count, which
//! makes the blob self-delimiting inside its zero-padded slot.
//!
//! - `Standard`: elements follow one after another, little-endian.
//! - `Unrolled`: byte `b` of every element is stored together, plane after
//!   plane. Slowly varying numeric data compresses noticeably better this way.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{BlobCodec, CodecRegistry, DecodedValue, Serialization};
use crate::error::{PdsError, PdsResult};

const COUNT_BYTES: usize = 4;

/// Fixed-width little-endian element.
trait Element: Copy + Send + Sync + 'static {
    const WIDTH: usize;

    fn put(self, out: &mut [u8]);

    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn put(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn get(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(u8, u32, u64, i32, f32, f64);

fn codec_error(class: &str, message: impl Into<String>) -> PdsError {
    PdsError::Codec {
        class: class.to_string(),
        message: message.into(),
    }
}

fn read_count(class: &str, bytes: &[u8]) -> PdsResult<usize> {
    let head: [u8; COUNT_BYTES] = bytes
        .get(..COUNT_BYTES)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| codec_error(class, format!("blob of {} bytes has no count", bytes.len())))?;
    Ok(u32::from_le_bytes(head) as usize)
}

fn write_count(class: &str, len: usize, out: &mut Vec<u8>) -> PdsResult<()> {
    let count = u32::try_from(len)
        .map_err(|_| codec_error(class, format!("{len} elements exceed the u32 count field")))?;
    out.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

struct VecCodec<T> {
    class: &'static str,
    variant: Serialization,
    _element: PhantomData<fn() -> T>,
}

impl<T: Element> VecCodec<T> {
    fn new(class: &'static str, variant: Serialization) -> Self {
        Self {
            class,
            variant,
            _element: PhantomData,
        }
    }
}

impl<T: Element> BlobCodec for VecCodec<T> {
    fn class_name(&self) -> &str {
        self.class
    }

    fn encode(&self, value: &(dyn Any + Send + Sync)) -> PdsResult<Vec<u8>> {
        let values = value
            .downcast_ref::<Vec<T>>()
            .ok_or_else(|| codec_error(self.class, "value has a different runtime type"))?;

        let n = values.len();
        let mut out = Vec::with_capacity(COUNT_BYTES + n * T::WIDTH);
        write_count(self.class, n, &mut out)?;
        out.resize(COUNT_BYTES + n * T::WIDTH, 0);
        let body = &mut out[COUNT_BYTES..];

        match self.variant {
            Serialization::Standard => {
                for (v, slot) in values.iter().zip(body.chunks_exact_mut(T::WIDTH)) {
                    v.put(slot);
                }
            }
            Serialization::Unrolled => {
                let mut scratch = vec![0u8; T::WIDTH];
                for (i, v) in values.iter().enumerate() {
                    v.put(&mut scratch);
                    for (plane, byte) in scratch.iter().enumerate() {
                        body[plane * n + i] = *byte;
                    }
                }
            }
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> PdsResult<DecodedValue> {
        let n = read_count(self.class, bytes)?;
        let needed = COUNT_BYTES + n * T::WIDTH;
        if bytes.len() < needed {
            return Err(codec_error(
                self.class,
                format!("blob of {} bytes too short for {n} elements", bytes.len()),
            ));
        }
        let body = &bytes[COUNT_BYTES..needed];

        let values: Vec<T> = match self.variant {
            Serialization::Standard => body.chunks_exact(T::WIDTH).map(T::get).collect(),
            Serialization::Unrolled => {
                let mut scratch = vec![0u8; T::WIDTH];
                (0..n)
                    .map(|i| {
                        for (plane, byte) in scratch.iter_mut().enumerate() {
                            *byte = body[plane * n + i];
                        }
                        T::get(&scratch)
                    })
                    .collect()
            }
        };
        Ok(Box::new(values))
    }
}

/// UTF-8 string, length-prefixed. Both variants share this layout.
struct StringCodec;

impl BlobCodec for StringCodec {
    fn class_name(&self) -> &str {
        "String"
    }

    fn encode(&self, value: &(dyn Any + Send + Sync)) -> PdsResult<Vec<u8>> {
        let s = value
            .downcast_ref::<String>()
            .ok_or_else(|| codec_error("String", "value has a different runtime type"))?;
        let mut out = Vec::with_capacity(COUNT_BYTES + s.len());
        write_count("String", s.len(), &mut out)?;
        out.extend_from_slice(s.as_bytes());
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> PdsResult<DecodedValue> {
        let n = read_count("String", bytes)?;
        let text = bytes
            .get(COUNT_BYTES..COUNT_BYTES + n)
            .ok_or_else(|| codec_error("String", format!("blob too short for {n} bytes")))?;
        let s = std::str::from_utf8(text).map_err(|e| codec_error("String", e.to_string()))?;
        Ok(Box::new(s.to_string()))
    }
}

fn register_vec<T: Element>(registry: &mut CodecRegistry, class: &'static str) {
    for variant in [Serialization::Standard, Serialization::Unrolled] {
        registry.register(class, variant, move || {
            Arc::new(VecCodec::<T>::new(class, variant)) as Arc<dyn BlobCodec>
        });
    }
}

pub(crate) fn register_builtin_codecs(registry: &mut CodecRegistry) {
    register_vec::<u8>(registry, "Vec<u8>");
    register_vec::<u32>(registry, "Vec<u32>");
    register_vec::<u64>(registry, "Vec<u64>");
    register_vec::<i32>(registry, "Vec<i32>");
    register_vec::<f32>(registry, "Vec<f32>");
    register_vec::<f64>(registry, "Vec<f64>");
    for variant in [Serialization::Standard, Serialization::Unrolled] {
        registry.register("String", variant, || Arc::new(StringCodec) as Arc<dyn BlobCodec>);
    }
}
