//! Configuration management for the nonce miner
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults.

use crate::compute::software::MAX_GRID_SIDE;
use crate::header::{BlockHeader, HeaderFields};
use crate::utils::parse_nonce;
use crate::worker::MinerType;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Block 0x1a-difficulty header used by `--demo`
pub const DEMO_HEADER: &str = "020000000affed3fc96851d8c74391c2d9333168fe62165eb228bced7e000000000000004277b65e3bd527f0ceb5298bdb06b4aacbae8a4a808c2c8aa414c20f252db801130dae516461011a3aeb9bb8";

/// Default `--demo` start, about 60k nonces before the match
pub const DEMO_START_NONCE: u32 = 0xB89B_0000;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Plain,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Where the header to mine comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSource {
    /// 160 hex characters
    Hex(String),
    /// Block explorer raw-block JSON file
    ExplorerJson(PathBuf),
    /// Built-in test header
    Demo,
}

/// Complete configuration for the miner
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "bcminer",
    version = env!("CARGO_PKG_VERSION"),
    about = "Double-SHA-256 block header nonce miner",
    long_about = "Searches the 32-bit nonce space of an 80-byte block header for a nonce whose double SHA-256 meets the header's difficulty, using OS threads or a batched lane backend"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Block header as 160 hex characters
    #[arg(long, value_name = "HEX", env = "BCMINER_HEADER")]
    pub header: Option<String>,

    /// Block explorer raw-block JSON file to build the header from
    #[arg(long, value_name = "FILE")]
    pub block_json: Option<PathBuf>,

    /// Mine the built-in test header
    #[arg(long)]
    #[serde(default)]
    pub demo: bool,

    /// First nonce to try, decimal or 0x hex (default: the header's nonce)
    #[arg(long, value_parser = parse_nonce)]
    pub start_nonce: Option<u32>,

    /// Search strategy
    #[arg(short = 'm', long, default_value = "cpu")]
    #[serde(default = "default_miner")]
    pub miner: MinerType,

    /// Worker threads, also the lane backend pool size (0 = all cores)
    #[arg(short = 'c', long, default_value = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Lane grid side length; each batch holds grid-size² nonces
    #[arg(short = 'g', long, default_value = "1024")]
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,

    /// Progress report interval (e.g. 5s, 500ms)
    #[arg(short = 'r', long, default_value = "5s")]
    #[serde(default = "default_report_interval")]
    pub report_interval: String,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Config {
    /// Parse the command line and load the configuration file if specified
    pub async fn load() -> Result<Self> {
        Self::parse().finish().await
    }

    /// Like [`Config::load`] with explicit arguments
    pub async fn load_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
            .map_err(|e| Error::config(e.to_string()))?
            .finish()
            .await
    }

    async fn finish(mut self) -> Result<Self> {
        if let Some(config_file) = self.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            self = self.merge_with_file(file_config);
        }

        self.validate()?;
        Ok(self)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Fill options the command line left unset from the file
    fn merge_with_file(mut self, file_config: Self) -> Self {
        if self.header_source_count() == 0 {
            self.header = file_config.header;
            self.block_json = file_config.block_json;
            self.demo = file_config.demo;
        }

        if self.start_nonce.is_none() {
            self.start_nonce = file_config.start_nonce;
        }

        // Other fields keep CLI values (they include defaults)
        self
    }

    fn header_source_count(&self) -> usize {
        usize::from(self.header.is_some())
            + usize::from(self.block_json.is_some())
            + usize::from(self.demo)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.header_source_count() {
            0 => {
                return Err(Error::config(
                    "A header is required: use --header, --block-json or --demo",
                ))
            }
            1 => {}
            _ => {
                return Err(Error::config(
                    "--header, --block-json and --demo are mutually exclusive",
                ))
            }
        }

        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIDE {
            return Err(Error::config(format!(
                "Grid size must be in 1..={}, got {}",
                MAX_GRID_SIDE, self.grid_size
            )));
        }

        if self.report_interval()?.is_zero() {
            return Err(Error::config("Report interval must be greater than 0"));
        }

        Ok(())
    }

    /// Selected header source
    pub fn header_source(&self) -> Result<HeaderSource> {
        if let Some(hex) = &self.header {
            Ok(HeaderSource::Hex(hex.clone()))
        } else if let Some(path) = &self.block_json {
            Ok(HeaderSource::ExplorerJson(path.clone()))
        } else if self.demo {
            Ok(HeaderSource::Demo)
        } else {
            Err(Error::config("No header source configured"))
        }
    }

    /// Build the header to mine, with the start nonce applied
    pub async fn load_header(&self) -> Result<BlockHeader> {
        let (mut header, default_start) = match self.header_source()? {
            HeaderSource::Hex(hex) => (hex.parse::<BlockHeader>()?, None),
            HeaderSource::ExplorerJson(path) => {
                let content = tokio::fs::read_to_string(&path).await?;
                let fields = HeaderFields::from_json(&content)?;
                (BlockHeader::from_fields(&fields)?, None)
            }
            HeaderSource::Demo => (DEMO_HEADER.parse::<BlockHeader>()?, Some(DEMO_START_NONCE)),
        };

        if let Some(start) = self.start_nonce.or(default_start) {
            header.set_nonce(start);
        }
        Ok(header)
    }

    /// Value passed to `Miner::start` for the selected strategy
    pub fn parallelism(&self) -> usize {
        match self.miner {
            MinerType::Cpu => self.threads,
            MinerType::Lanes => self.grid_size as usize,
        }
    }

    /// Parsed progress report interval
    pub fn report_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.report_interval).map_err(|e| {
            Error::config(format!(
                "Invalid report interval '{}': {}",
                self.report_interval, e
            ))
        })
    }
}

// Default value functions for serde
fn default_miner() -> MinerType { MinerType::Cpu }
fn default_grid_size() -> u32 { 1024 }
fn default_report_interval() -> String { "5s".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    #[test]
    fn test_config_defaults() {
        let config = Config::try_parse_from(["bcminer", "--demo"]).unwrap();

        assert_eq!(config.miner, MinerType::Cpu);
        assert_eq!(config.threads, 0);
        assert_eq!(config.grid_size, 1024);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert_eq!(config.report_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(config.parallelism(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_start_nonce_parsing() {
        let config =
            Config::try_parse_from(["bcminer", "--demo", "--start-nonce", "0xB89B0000"]).unwrap();
        assert_eq!(config.start_nonce, Some(0xB89B0000));

        let too_large = ["bcminer", "--demo", "--start-nonce", "0x1FFFFFFFF"];
        assert!(Config::try_parse_from(too_large).is_err());
    }

    #[test]
    fn test_validation() {
        let config = Config::try_parse_from(["bcminer"]).unwrap();
        assert_matches!(config.validate(), Err(Error::Config { .. }));

        let config = Config::try_parse_from(["bcminer", "--demo", "--header", "00"]).unwrap();
        assert_matches!(config.validate(), Err(Error::Config { .. }));

        let config = Config::try_parse_from(["bcminer", "--demo", "--grid-size", "0"]).unwrap();
        assert_matches!(config.validate(), Err(Error::Config { .. }));

        let config =
            Config::try_parse_from(["bcminer", "--demo", "--report-interval", "soon"]).unwrap();
        assert_matches!(config.validate(), Err(Error::Config { .. }));
    }

    #[test]
    fn test_lanes_parallelism() {
        let config =
            Config::try_parse_from(["bcminer", "--demo", "-m", "lanes", "-g", "256"]).unwrap();
        assert_eq!(config.miner, MinerType::Lanes);
        assert_eq!(config.parallelism(), 256);
    }

    #[tokio::test]
    async fn test_config_from_yaml() {
        let yaml_content = r#"
header: "020000000affed3fc96851d8c74391c2d9333168fe62165eb228bced7e000000000000004277b65e3bd527f0ceb5298bdb06b4aacbae8a4a808c2c8aa414c20f252db801130dae516461011a3aeb9bb8"
start_nonce: 3097160000
miner: lanes
grid_size: 512
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.header.as_deref(), Some(DEMO_HEADER));
        assert_eq!(config.start_nonce, Some(3097160000));
        assert_eq!(config.miner, MinerType::Lanes);
        assert_eq!(config.grid_size, 512);
        assert_eq!(config.log_level, LogLevel::Info);

        let path = temp_file.path().to_str().unwrap();
        let merged = Config::load_from_args(["bcminer", "--config-file", path])
            .await
            .unwrap();
        assert_eq!(merged.header_source().unwrap(), HeaderSource::Hex(DEMO_HEADER.to_string()));
        assert_eq!(merged.start_nonce, Some(3097160000));

        let header = merged.load_header().await.unwrap();
        assert_eq!(header.nonce(), 3097160000);
    }

    #[tokio::test]
    async fn test_config_from_json_file() {
        let mut temp_file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(temp_file, r#"{{"demo": true, "threads": 3}}"#).unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert!(config.demo);
        assert_eq!(config.threads, 3);
    }

    #[tokio::test]
    async fn test_load_demo_header() {
        let config = Config::load_from_args(["bcminer", "--demo"]).await.unwrap();
        let header = config.load_header().await.unwrap();
        assert_eq!(header.nonce(), DEMO_START_NONCE);

        let config = Config::load_from_args(["bcminer", "--demo", "--start-nonce", "7"])
            .await
            .unwrap();
        assert_eq!(config.load_header().await.unwrap().nonce(), 7);
    }

    #[tokio::test]
    async fn test_load_block_json() {
        let mut temp_file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            temp_file,
            r#"{{
                "ver": 2,
                "prev_block": "00000000000000000cca48eb4b330d91e8d946d344ca302a86a280161b0bffb6",
                "mrkl_root": "7114b3aa8a049bbc12cdde1008a2dd70e2ed045f698593ca869394ee52aa109d",
                "time": 1415239972,
                "bits": 404472624,
                "nonce": 1678286846
            }}"#
        )
        .unwrap();

        let path = temp_file.path().to_str().unwrap();
        let config = Config::load_from_args(["bcminer", "--block-json", path])
            .await
            .unwrap();
        let header = config.load_header().await.unwrap();
        assert_eq!(header.nonce(), 1678286846);
        assert_eq!(header.time(), 1415239972);
    }

    #[tokio::test]
    async fn test_load_bad_header() {
        let config = Config::load_from_args(["bcminer", "--header", "abcd"]).await.unwrap();
        assert_matches!(config.load_header().await, Err(Error::Format { .. }));
    }
}
