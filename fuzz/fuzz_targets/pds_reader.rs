//! Fuzz target for the container reader.
//!
//! Arbitrary bytes must never panic the reader: every input either decodes
//! or fails with an error. Both the full decode and the skip-scan paths run.

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use rust_pds::{CodecRegistry, PdsReader};

fuzz_target!(|data: &[u8]| {
    let registry = CodecRegistry::new();

    if let Ok(mut reader) = PdsReader::new(Cursor::new(data)) {
        let decoders = reader.decoders(&registry).ok();
        for event in reader.events().take(64) {
            let Ok(event) = event else { break };
            if let Some(decoders) = &decoders {
                let _ = decoders.decode(&event);
            }
        }
    }

    if let Ok(mut reader) = PdsReader::new(Cursor::new(data)) {
        let _ = reader.index_events();
    }
});
