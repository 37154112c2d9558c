// tessera/core/execution/src/config.rs

use serde::{Deserialize, Serialize};

/// Executor tunables. Missing fields in a config file take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Frames at or beyond this depth revert with `CallDepthExceeded`.
    pub max_call_depth: u32,
    /// Gas for transactions that carry none and when the ledger has no
    /// `tx_gas_limit` entry.
    pub default_gas_limit: u64,
    /// Number of block hashes kept by the ledger cache.
    pub ledger_cache_capacity: usize,
    /// Parallel rounds before the scheduler falls back to one context at a time.
    pub max_scheduler_rounds: usize,
    pub enable_metrics: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            default_gas_limit: 3_000_000_000,
            ledger_cache_capacity: 256,
            max_scheduler_rounds: 16,
            enable_metrics: true,
        }
    }
}

impl ExecutorConfig {
    pub fn for_testing() -> Self {
        Self {
            default_gas_limit: 300_000_000,
            ledger_cache_capacity: 8,
            max_scheduler_rounds: 4,
            enable_metrics: false,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ExecutorConfig = serde_json::from_str(r#"{"max_call_depth": 8}"#).unwrap();
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.default_gas_limit, ExecutorConfig::default().default_gas_limit);
        assert!(config.enable_metrics);
    }
}
