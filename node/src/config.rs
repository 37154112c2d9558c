// tessera/node/src/config.rs

use crate::logging::{LogFormat, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tessera_execution::ExecutorConfig;

/// Node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Executor tunables
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep all state in memory; nothing survives the process
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: LogLevel,

    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Per-module overrides, e.g. `tessera_execution = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, LogLevel>,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tessera")
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            in_memory: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            modules: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.executor.max_call_depth == 0 {
            return Err("executor.max_call_depth must be at least 1".to_string());
        }
        if self.executor.default_gas_limit == 0 {
            return Err("executor.default_gas_limit must be positive".to_string());
        }
        if self.executor.ledger_cache_capacity == 0 {
            return Err("executor.ledger_cache_capacity must be positive".to_string());
        }
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [executor]
            max_call_depth = 8

            [storage]
            in_memory = true
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.max_call_depth, 8);
        assert_eq!(
            config.executor.default_gas_limit,
            ExecutorConfig::default().default_gas_limit
        );
        assert!(config.storage.in_memory);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("node.toml");
        let mut config = NodeConfig::default();
        config.logging.format = LogFormat::Json;
        config
            .logging
            .modules
            .insert("tessera_execution".to_string(), LogLevel::Debug);
        config.save(&path).unwrap();
        assert_eq!(NodeConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let mut config = NodeConfig::default();
        assert!(config.validate().is_ok());
        config.executor.max_call_depth = 0;
        assert!(config.validate().is_err());
    }
}
