//! Run configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `RUST_PDS_` (nested keys split on `__`)
//! 4. command-line overrides, applied by the binary
//!
//! # Example
//! ```no_run
//! use rust_pds::config::PdsConfig;
//!
//! let config = PdsConfig::load_from("pds.toml")?;
//! config.validate()?;
//! println!("writing {} events on {} lanes", config.run.events, config.run.lanes);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Environment example: `RUST_PDS_OUTPUT__COMPRESSION=lz4`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use pds_core::{PdsError, PdsResult, Serialization};
use pds_storage::Compression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::source::SUPPORTED_SYNTHETIC_CLASSES;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdsConfig {
    /// Output container settings
    #[serde(default)]
    pub output: OutputConfig,
    /// Lane and event-budget settings
    #[serde(default)]
    pub run: RunConfig,
    /// Shape of the synthetic source's events
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Output container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Container file to write
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Body compression (none, lz4, zstd)
    #[serde(default = "default_compression")]
    pub compression: String,
    /// Compression level, used by zstd
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Per-product byte layout (standard, unrolled)
    #[serde(default = "default_serialization")]
    pub serialization: String,
    /// Outputer kind (pds, null)
    #[serde(default = "default_outputer")]
    pub outputer: String,
}

/// Lane scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Concurrent event lanes
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Runtime worker threads
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Events to produce
    #[serde(default = "default_events")]
    pub events: u64,
    /// Event source (empty, synthetic)
    #[serde(default = "default_source")]
    pub source: String,
}

/// Synthetic source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Run number stamped on every event
    #[serde(default = "default_run_number")]
    pub run: u32,
    /// Events per luminosity block
    #[serde(default = "default_events_per_lumi")]
    pub events_per_lumi: u64,
    /// Base seed; each event derives its own
    #[serde(default)]
    pub seed: u64,
    /// Products every event carries
    #[serde(default = "default_products")]
    pub products: Vec<SyntheticProduct>,
}

/// One synthetic product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticProduct {
    /// Product name
    pub name: String,
    /// Class name; must have a built-in codec
    pub class: String,
    /// Mean element count; actual counts vary by up to half of this
    pub length: usize,
}

impl SyntheticProduct {
    /// Describe a product
    pub fn new(name: &str, class: &str, length: usize) -> Self {
        Self {
            name: name.to_string(),
            class: class.to_string(),
            length,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_compression() -> String {
    "zstd".to_string()
}

fn default_compression_level() -> i32 {
    pds_storage::DEFAULT_LEVEL
}

fn default_serialization() -> String {
    "standard".to_string()
}

fn default_outputer() -> String {
    "pds".to_string()
}

fn default_lanes() -> usize {
    4
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_events() -> u64 {
    1000
}

fn default_source() -> String {
    "synthetic".to_string()
}

fn default_run_number() -> u32 {
    1
}

fn default_events_per_lumi() -> u64 {
    100
}

fn default_products() -> Vec<SyntheticProduct> {
    vec![
        SyntheticProduct::new("tracks", "Vec<f32>", 256),
        SyntheticProduct::new("hits", "Vec<u32>", 1024),
        SyntheticProduct::new("adc", "Vec<u8>", 4096),
        SyntheticProduct::new("energies", "Vec<f64>", 64),
        SyntheticProduct::new("trigger", "String", 16),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: None,
            compression: default_compression(),
            compression_level: default_compression_level(),
            serialization: default_serialization(),
            outputer: default_outputer(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            threads: default_threads(),
            events: default_events(),
            source: default_source(),
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            run: default_run_number(),
            events_per_lumi: default_events_per_lumi(),
            seed: 0,
            products: default_products(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Which outputer a run writes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputerKind {
    /// PDS container file
    Pds,
    /// Serialize and discard
    Null,
}

/// Which source feeds the lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Events with no products
    Empty,
    /// Randomized products
    Synthetic,
}

impl PdsConfig {
    /// Defaults overridden by `RUST_PDS_` environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Defaults, then a TOML file, then environment variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(Some(path.as_ref())).extract()
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(PdsConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("RUST_PDS_").split("__"))
    }

    /// Parsed compression algorithm
    pub fn compression(&self) -> PdsResult<Compression> {
        self.output.compression.parse()
    }

    /// Parsed serialization variant
    pub fn serialization(&self) -> PdsResult<Serialization> {
        self.output.serialization.parse()
    }

    /// Parsed outputer kind
    pub fn outputer_kind(&self) -> PdsResult<OutputerKind> {
        match self.output.outputer.to_ascii_lowercase().as_str() {
            "pds" => Ok(OutputerKind::Pds),
            "null" => Ok(OutputerKind::Null),
            other => Err(PdsError::Configuration(format!(
                "Invalid outputer '{other}'. Must be one of: pds, null"
            ))),
        }
    }

    /// Parsed source kind
    pub fn source_kind(&self) -> PdsResult<SourceKind> {
        match self.run.source.to_ascii_lowercase().as_str() {
            "empty" => Ok(SourceKind::Empty),
            "synthetic" => Ok(SourceKind::Synthetic),
            other => Err(PdsError::Configuration(format!(
                "Invalid source '{other}'. Must be one of: empty, synthetic"
            ))),
        }
    }

    /// Validate configuration before any file is touched
    pub fn validate(&self) -> PdsResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(PdsError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let compression = self.compression()?;
        compression.validate_level(self.output.compression_level)?;
        self.serialization()?;
        self.source_kind()?;

        if self.outputer_kind()? == OutputerKind::Pds && self.output.path.is_none() {
            return Err(PdsError::Configuration(
                "output.path is required for the pds outputer".into(),
            ));
        }

        if self.run.lanes == 0 {
            return Err(PdsError::Configuration("run.lanes must be at least 1".into()));
        }
        if self.run.threads == 0 {
            return Err(PdsError::Configuration("run.threads must be at least 1".into()));
        }

        if self.synthetic.events_per_lumi == 0 {
            return Err(PdsError::Configuration(
                "synthetic.events_per_lumi must be at least 1".into(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for product in &self.synthetic.products {
            if !names.insert(&product.name) {
                return Err(PdsError::Configuration(format!(
                    "Duplicate synthetic product name: {}",
                    product.name
                )));
            }
            if !SUPPORTED_SYNTHETIC_CLASSES.contains(&product.class.as_str()) {
                return Err(PdsError::Configuration(format!(
                    "Synthetic product '{}' has unsupported class '{}'. Must be one of: {}",
                    product.name,
                    product.class,
                    SUPPORTED_SYNTHETIC_CLASSES.join(", ")
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PdsConfig {
        let mut config = PdsConfig::default();
        config.output.path = Some(PathBuf::from("out.pds"));
        config
    }

    #[test]
    fn test_defaults() {
        let config = PdsConfig::default();
        assert_eq!(config.output.compression, "zstd");
        assert_eq!(config.output.compression_level, 18);
        assert_eq!(config.output.serialization, "standard");
        assert_eq!(config.run.lanes, 4);
        assert_eq!(config.run.events, 1000);
        assert!(config.run.threads >= 1);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_path_rejected_for_pds_only() {
        let mut config = PdsConfig::default();
        assert!(config.validate().unwrap_err().is_configuration());

        config.output.outputer = "null".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_names_rejected() {
        let mut config = valid();
        config.output.compression = "gzip".into();
        assert!(matches!(
            config.validate(),
            Err(PdsError::UnknownCompression(_))
        ));

        let mut config = valid();
        config.output.serialization = "root".into();
        assert!(matches!(
            config.validate(),
            Err(PdsError::UnknownSerialization(_))
        ));

        let mut config = valid();
        config.run.source = "detector".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_level_range_checked_for_zstd() {
        let mut config = valid();
        config.output.compression_level = 500;
        assert!(config.validate().is_err());

        config.output.compression = "lz4".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_synthetic_products_checked() {
        let mut config = valid();
        config
            .synthetic
            .products
            .push(SyntheticProduct::new("tracks", "Vec<f32>", 8));
        assert!(config.validate().is_err());

        let mut config = valid();
        config.synthetic.products = vec![SyntheticProduct::new("m", "Matrix", 8)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_and_env_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "pds.toml",
                r#"
                [output]
                path = "run7.pds"
                compression = "lz4"

                [run]
                lanes = 8
                "#,
            )?;
            jail.set_env("RUST_PDS_RUN__EVENTS", "25");

            let config = PdsConfig::load_from("pds.toml")?;
            assert_eq!(config.output.path, Some(PathBuf::from("run7.pds")));
            assert_eq!(config.output.compression, "lz4");
            assert_eq!(config.output.compression_level, 18);
            assert_eq!(config.run.lanes, 8);
            assert_eq!(config.run.events, 25);
            Ok(())
        });
    }
}
