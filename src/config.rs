//! Saver configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (default `config/saver.toml`, optional)
//! 2. Environment variables prefixed with `DAQ_SAVER_`, `__` separating sections
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use daq_saver::config::SaverConfig;
//!
//! let config = SaverConfig::load()?;
//! println!("Queue limit: {} bytes", config.saver.max_queue_ram);
//! # Ok::<(), figment::Error>(())
//! ```

use crate::tracing_setup::{self, LogFormat};
use daq_core::{AppResult, DaqError};
use daq_storage::ControllerSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/saver.toml";

/// Top-level saver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaverConfig {
    /// Logging settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Save queue settings
    #[serde(default)]
    pub saver: QueueConfig,
    /// Pretrigger buffer settings
    #[serde(default)]
    pub pretrigger: PretriggerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Save queue and drain job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Admission limit for queued pixel data, in bytes
    #[serde(default = "default_max_queue_ram")]
    pub max_queue_ram: u64,
    /// Width of one chunk window in milliseconds
    #[serde(default = "default_chunk_period")]
    pub chunk_period_ms: u64,
    /// Period of the drain job in milliseconds
    #[serde(default = "default_dumping_period")]
    pub dumping_period_ms: u64,
    /// Chunks written per drain tick
    #[serde(default = "default_chunks_per_save")]
    pub chunks_per_save: usize,
}

/// Pretrigger buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PretriggerConfig {
    /// Capacity in frames (0 = no buffer at start-up)
    #[serde(default)]
    pub size: usize,
    /// Trim to the exact capacity instead of whole bundles
    #[serde(default = "default_true")]
    pub strict_size: bool,
    /// Empty the buffer when the frame counter restarts
    #[serde(default = "default_true")]
    pub clear_on_reset: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_queue_ram() -> u64 {
    4 << 30
}

fn default_chunk_period() -> u64 {
    200
}

fn default_dumping_period() -> u64 {
    50
}

fn default_chunks_per_save() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_ram: default_max_queue_ram(),
            chunk_period_ms: default_chunk_period(),
            dumping_period_ms: default_dumping_period(),
            chunks_per_save: default_chunks_per_save(),
        }
    }
}

impl Default for PretriggerConfig {
    fn default() -> Self {
        Self {
            size: 0,
            strict_size: true,
            clear_on_reset: true,
        }
    }
}

impl SaverConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `DAQ_SAVER_SAVER__MAX_QUEUE_RAM=1073741824`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(SaverConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DAQ_SAVER_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        tracing_setup::parse_level(&self.application.log_level)?;

        if self.saver.chunks_per_save == 0 {
            return Err(DaqError::Configuration(
                "saver.chunks_per_save must be positive".to_string(),
            ));
        }

        if self.saver.dumping_period_ms == 0 {
            return Err(DaqError::Configuration(
                "saver.dumping_period_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Period of the drain job
    pub fn dumping_period(&self) -> Duration {
        Duration::from_millis(self.saver.dumping_period_ms)
    }

    /// Validated controller parameters
    pub fn controller_settings(&self) -> AppResult<ControllerSettings> {
        self.validate()?;
        Ok(ControllerSettings {
            max_queue_ram: usize::try_from(self.saver.max_queue_ram).unwrap_or(usize::MAX),
            chunk_period: Duration::from_millis(self.saver.chunk_period_ms),
            chunks_per_save: self.saver.chunks_per_save,
            pretrigger_strict_size: self.pretrigger.strict_size,
            pretrigger_clear_on_reset: self.pretrigger.clear_on_reset,
        })
    }
}
