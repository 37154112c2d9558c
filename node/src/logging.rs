// tessera/node/src/logging.rs

//! Structured logging setup.
//!
//! The level filter comes from `RUST_LOG` when set, otherwise from the
//! `[logging]` section of the node config. `LOG_FORMAT` overrides the output
//! format (`pretty`, `compact` or `json`).

use crate::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format for log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Resolved logging setup
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
    pub ansi_colors: bool,
    pub include_location: bool,
}

impl LogConfig {
    /// Config file section with `RUST_LOG`, `LOG_FORMAT` and `LOG_ANSI`
    /// applied on top.
    pub fn resolve(section: &LoggingConfig) -> Self {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| build_filter(section));
        let format = std::env::var("LOG_FORMAT")
            .map(|f| LogFormat::parse(&f))
            .unwrap_or(section.format);
        let ansi_colors = std::env::var("LOG_ANSI")
            .map(|a| a.to_lowercase() == "true")
            .unwrap_or(format != LogFormat::Json);
        Self {
            filter,
            format,
            ansi_colors,
            include_location: section.level == LogLevel::Trace,
        }
    }
}

/// Build the env filter string
pub fn build_filter(section: &LoggingConfig) -> String {
    let mut filter = section.level.as_str().to_string();
    for (module, level) in &section.modules {
        filter.push_str(&format!(",{}={}", module, level.as_str()));
    }
    filter
}

/// Initialize the logging system with the given configuration
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| anyhow::anyhow!("Invalid log filter {:?}: {}", config.filter, e))?;

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_ansi(false),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_ansi(config.ansi_colors),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_ansi(config.ansi_colors),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
        }
    }

    Ok(())
}
