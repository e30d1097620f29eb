//! CLI entry point for rust_pds
//!
//! - `write`: run lanes from a source into a PDS container (or the null outputer)
//! - `read`: print the header and every event of a container
//! - `scan`: walk a container by length words and report totals
//!
//! # Usage
//!
//! ```bash
//! rust_pds write --output run1.pds --lanes 8 --events 10000 --compression lz4
//! rust_pds read run1.pds --decode
//! rust_pds scan run1.pds
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_pds::config::PdsConfig;
use rust_pds::{tracing_init, CodecRegistry, PdsReader};
use serde_json::json;

#[derive(Parser)]
#[command(name = "rust_pds")]
#[command(about = "Multi-lane PDS event container writer and reader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write events from a source through the lanes
    Write(WriteArgs),

    /// Print the header and events of a container
    Read {
        /// Container file
        path: PathBuf,

        /// Decode each product with the built-in codecs
        #[arg(long)]
        decode: bool,

        /// Stop after this many events
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Skip through a container and report totals as JSON
    Scan {
        /// Container file
        path: PathBuf,
    },
}

#[derive(Args)]
struct WriteArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file (required for the pds outputer)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Number of concurrent lanes
    #[arg(long)]
    lanes: Option<usize>,

    /// Tokio worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Events to write
    #[arg(long)]
    events: Option<u64>,

    /// none, lz4 or zstd
    #[arg(long)]
    compression: Option<String>,

    /// Compression level (zstd only)
    #[arg(long)]
    level: Option<i32>,

    /// standard or unrolled
    #[arg(long)]
    serialization: Option<String>,

    /// empty or synthetic
    #[arg(long)]
    source: Option<String>,

    /// pds or null
    #[arg(long)]
    outputer: Option<String>,

    /// Seed for the synthetic source
    #[arg(long)]
    seed: Option<u64>,
}

impl WriteArgs {
    fn load_config(&self) -> Result<PdsConfig> {
        let mut config = match &self.config {
            Some(path) => PdsConfig::load_from(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => PdsConfig::load().context("loading configuration")?,
        };

        if let Some(output) = &self.output {
            config.output.path = Some(output.clone());
        }
        if let Some(lanes) = self.lanes {
            config.run.lanes = lanes;
        }
        if let Some(threads) = self.threads {
            config.run.threads = threads;
        }
        if let Some(events) = self.events {
            config.run.events = events;
        }
        if let Some(compression) = &self.compression {
            config.output.compression = compression.clone();
        }
        if let Some(level) = self.level {
            config.output.compression_level = level;
        }
        if let Some(serialization) = &self.serialization {
            config.output.serialization = serialization.clone();
        }
        if let Some(source) = &self.source {
            config.run.source = source.clone();
        }
        if let Some(outputer) = &self.outputer {
            config.output.outputer = outputer.clone();
        }
        if let Some(seed) = self.seed {
            config.synthetic.seed = seed;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Write(args) => write(args),
        Commands::Read {
            path,
            decode,
            limit,
        } => {
            init_default_tracing()?;
            read(&path, decode, limit)
        }
        Commands::Scan { path } => {
            init_default_tracing()?;
            scan(&path)
        }
    }
}

fn init_default_tracing() -> Result<()> {
    tracing_init::init_from_config(&PdsConfig::default()).map_err(anyhow::Error::msg)
}

fn write(args: WriteArgs) -> Result<()> {
    let config = args.load_config()?;
    config.validate().context("invalid configuration")?;
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.run.threads)
        .thread_name("pds-lane")
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let summary = runtime
        .block_on(rust_pds::run::run(&config))
        .context("writing events")?;
    summary.log();

    println!(
        "{}",
        json!({
            "events": summary.events,
            "lanes": summary.lanes.len(),
            "elapsed_s": summary.elapsed.as_secs_f64(),
            "events_per_s": summary.throughput(),
            "bytes_written": summary.outputer.bytes_written,
            "source_s": summary.source_time().as_secs_f64(),
            "serial_s": summary.outputer.serial_time.as_secs_f64(),
            "parallel_s": summary.outputer.parallel_time.as_secs_f64(),
        })
    );
    Ok(())
}

fn read(path: &Path, decode: bool, limit: Option<u64>) -> Result<()> {
    let mut reader =
        PdsReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let registry = CodecRegistry::new();
    let decoders = if decode {
        Some(reader.decoders(&registry).context("resolving product codecs")?)
    } else {
        None
    };

    println!(
        "compression: {}  serialization: {}",
        reader.compression(),
        reader.serialization()
    );
    for (index, product) in reader.products().iter().enumerate() {
        println!("product {index}: {} ({})", product.name, product.class_name);
    }

    let mut shown = 0u64;
    while limit.map_or(true, |limit| shown < limit) {
        let Some(event) = reader.read_event().context("reading event")? else {
            break;
        };
        println!("event {}", event.id);
        for blob in &event.products {
            println!("  [{}] {} bytes", blob.index, blob.bytes().len());
        }
        if let Some(decoders) = &decoders {
            for (index, value) in decoders.decode(&event).context("decoding products")? {
                println!("  [{index}] {}", describe(&*value));
            }
        }
        shown += 1;
    }

    let stats = reader.stats();
    println!(
        "{} events, {} -> {} bytes (ratio {:.2})",
        stats.events,
        stats.uncompressed_bytes,
        stats.compressed_bytes,
        stats.compression_ratio()
    );
    Ok(())
}

fn describe(value: &(dyn std::any::Any + Send + Sync)) -> String {
    macro_rules! try_vec {
        ($($t:ty),*) => {
            $(
                if let Some(v) = value.downcast_ref::<Vec<$t>>() {
                    return format!("{} x {}", v.len(), stringify!($t));
                }
            )*
        };
    }
    try_vec!(u8, u32, u64, i32, f32, f64);
    match value.downcast_ref::<String>() {
        Some(s) => format!("{s:?}"),
        None => "<opaque>".to_string(),
    }
}

fn scan(path: &Path) -> Result<()> {
    let start = Instant::now();
    let mut reader =
        PdsReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let index = reader.index_events().context("scanning events")?;

    let first = index.first().map(|e| e.id.to_string());
    let last = index.last().map(|e| e.id.to_string());
    println!(
        "{}",
        json!({
            "path": path.display().to_string(),
            "compression": reader.compression().to_string(),
            "serialization": reader.serialization().to_string(),
            "products": reader.products().len(),
            "events": index.len(),
            "first_event": first,
            "last_event": last,
            "scan_s": start.elapsed().as_secs_f64(),
        })
    );
    Ok(())
}
