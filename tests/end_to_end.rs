//! Full runs from configuration to file and back.

use std::collections::BTreeSet;

use rust_pds::config::PdsConfig;
use rust_pds::run::run;
use rust_pds::source::{Source, SyntheticSource};
use rust_pds::{CodecRegistry, Compression, PdsReader};

fn config_for(path: &std::path::Path, compression: &str, serialization: &str) -> PdsConfig {
    let mut config = PdsConfig::default();
    config.output.path = Some(path.to_path_buf());
    config.output.compression = compression.into();
    config.output.compression_level = 3;
    config.output.serialization = serialization.into();
    config.run.lanes = 4;
    config.run.events = 60;
    config.synthetic.events_per_lumi = 25;
    config.synthetic.seed = 7;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_synthetic_run_reads_back_exactly() {
    let dir = tempfile::tempdir().unwrap();

    for (compression, serialization) in [
        ("none", "standard"),
        ("lz4", "unrolled"),
        ("zstd", "standard"),
        ("zstd", "unrolled"),
    ] {
        let path = dir.path().join(format!("{compression}-{serialization}.pds"));
        let config = config_for(&path, compression, serialization);

        let summary = run(&config).await.unwrap();
        assert_eq!(summary.events, 60);
        let file_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(summary.outputer.bytes_written, file_len);

        let mut reader = PdsReader::open(&path).unwrap();
        assert_eq!(reader.compression(), compression.parse::<Compression>().unwrap());
        assert_eq!(reader.serialization(), config.serialization().unwrap());
        let names: Vec<_> = reader.products().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, ["tracks", "hits", "adc", "energies", "trigger"]);

        let registry = CodecRegistry::new();
        let decoders = reader.decoders(&registry).unwrap();
        let expected = SyntheticSource::new(60, &config.synthetic);

        let mut seen = BTreeSet::new();
        while let Some(event) = reader.read_event().unwrap() {
            assert!(seen.insert(event.id.event), "duplicate {}", event.id);
            let produced = expected.read_event(0, event.id.event - 1).unwrap();
            assert_eq!(produced.id, event.id);

            let decoded = decoders.decode(&event).unwrap();
            assert_eq!(decoded.len(), 5);
            let hits = decoded[1].1.downcast_ref::<Vec<u32>>().unwrap();
            assert_eq!(Some(hits), produced.products[1].value.downcast_ref::<Vec<u32>>());
            let trigger = decoded[4].1.downcast_ref::<String>().unwrap();
            assert_eq!(Some(trigger), produced.products[4].value.downcast_ref::<String>());
        }
        assert_eq!(seen, (1..=60).collect::<BTreeSet<u64>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_source_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.pds");
    let mut config = config_for(&path, "none", "standard");
    config.run.source = "empty".into();
    config.run.events = 10;

    run(&config).await.unwrap();

    let mut reader = PdsReader::open(&path).unwrap();
    assert!(reader.products().is_empty());
    let index = reader.index_events().unwrap();
    assert_eq!(index.len(), 10);
    // Uncompressed empty events carry only the size-info word.
    assert!(index.iter().all(|e| e.body_words == 1));
}

#[tokio::test]
async fn test_zero_events_still_writes_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("none.pds");
    let mut config = config_for(&path, "zstd", "standard");
    config.run.events = 0;

    let summary = run(&config).await.unwrap();
    assert_eq!(summary.events, 0);

    let mut reader = PdsReader::open(&path).unwrap();
    assert_eq!(reader.products().len(), 5);
    assert!(reader.read_event().unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_config_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.pds");
    let mut config = config_for(&path, "zstd", "standard");
    config.output.compression_level = 1000;

    let err = run(&config).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(!path.exists());
}
