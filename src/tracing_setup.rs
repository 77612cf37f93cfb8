//! Tracing initialisation
//!
//! Installs a global `tracing-subscriber` registry built from the
//! `[application]` section of [`SaverConfig`](crate::config::SaverConfig).
//! `RUST_LOG`, when set, replaces the configured level.
//!
//! # Example
//! ```no_run
//! use daq_saver::{config::SaverConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SaverConfig::load()?;
//! tracing_setup::init(&config.application)?;
//! tracing::info!(path = "run.tiff", "Recording");
//! # Ok(())
//! # }
//! ```

use crate::config::ApplicationConfig;
use daq_core::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured; for interactive use
    #[default]
    Pretty,
    /// One line per event, no colour
    Compact,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        };
        f.write_str(name)
    }
}

/// Parse a level name (`trace` .. `error`, any case).
pub fn parse_level(level: &str) -> AppResult<Level> {
    level.trim().parse::<Level>().map_err(|_| {
        DaqError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))
    })
}

/// Install the global subscriber described by `application`.
///
/// Calling it again once a subscriber is installed is a no-op, so tests and
/// embedding hosts may call it freely.
pub fn init(application: &ApplicationConfig) -> AppResult<()> {
    let level = parse_level(&application.log_level)?;
    install(level, application.log_format, true);
    Ok(())
}

/// Install a subscriber with an explicit level and format.
pub fn install(level: Level, format: LogFormat, ansi: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let layer = match format {
        LogFormat::Pretty => subscriber_fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => subscriber_fmt::layer()
            .compact()
            .with_ansi(false)
            .with_target(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => subscriber_fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(filter)
            .boxed(),
    };

    if let Err(e) = tracing_subscriber::registry().with(layer).try_init() {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(parse_level("verbose").unwrap_err().is_configuration());
    }

    #[test]
    fn test_format_names_round_trip_through_serde() {
        let json = serde_json::to_string(&LogFormat::Compact).unwrap();
        assert_eq!(json, "\"compact\"");
        let parsed: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(parsed, LogFormat::Json);
        assert_eq!(LogFormat::default().to_string(), "pretty");
    }

    #[test]
    fn test_init_is_idempotent() {
        let application = ApplicationConfig {
            log_level: "warn".to_string(),
            log_format: LogFormat::Compact,
        };
        assert!(init(&application).is_ok());
        assert!(init(&application).is_ok());
    }
}
