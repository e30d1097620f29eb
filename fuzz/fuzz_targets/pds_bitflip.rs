//! Fuzz target for damaged containers.
//!
//! Writes a small valid container once, then flips one byte chosen by the
//! fuzzer. Reading must either succeed or report an error.

#![no_main]

use std::io::Cursor;
use std::sync::OnceLock;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rust_pds::{
    Compression, DataProduct, EventIdentifier, Outputer, PdsOutputer, PdsReader,
    ProductDescriptor,
};

#[derive(Debug, Arbitrary)]
struct Damage {
    /// Which of the three prepared containers
    container: u8,
    /// Byte position, wrapped to the container length
    offset: u32,
    /// XOR mask; zero is replaced by one
    mask: u8,
}

fn containers() -> &'static [Vec<u8>; 3] {
    static CONTAINERS: OnceLock<[Vec<u8>; 3]> = OnceLock::new();
    CONTAINERS.get_or_init(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        [Compression::None, Compression::Lz4, Compression::Zstd]
            .map(|compression| runtime.block_on(container(compression)))
    })
}

async fn container(compression: Compression) -> Vec<u8> {
    let writer = PdsOutputer::builder()
        .compression(compression)
        .level(3)
        .build(Vec::new())
        .unwrap();
    writer
        .setup_for_lane(
            0,
            &[
                ProductDescriptor::new("adc", "Vec<u32>"),
                ProductDescriptor::new("tag", "String"),
            ],
        )
        .unwrap();
    for event in 0..4u64 {
        writer
            .product_ready(0, DataProduct::new(0, "adc", vec![event as u32; 20]))
            .await
            .unwrap();
        writer
            .product_ready(0, DataProduct::new(1, "tag", format!("event-{event}")))
            .await
            .unwrap();
        writer
            .output_event(0, EventIdentifier::new(1, 1, event))
            .await
            .unwrap();
    }
    writer.close().await.unwrap()
}

fuzz_target!(|damage: Damage| {
    let clean = &containers()[damage.container as usize % 3];
    let mut bytes = clean.clone();
    let at = damage.offset as usize % bytes.len();
    bytes[at] ^= damage.mask.max(1);

    if let Ok(mut reader) = PdsReader::new(Cursor::new(bytes)) {
        while let Ok(Some(_)) = reader.read_event() {}
    }
});
