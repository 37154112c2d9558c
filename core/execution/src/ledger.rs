// tessera/core/execution/src/ledger.rs

// Read-through cache in front of the ledger's block hashes and system config
use crate::types::{ExecutorError, Result};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tessera_primitives::Hash;
use tracing::debug;

/// System config key holding the per-transaction gas limit.
pub const SYSTEM_KEY_TX_GAS_LIMIT: &str = "tx_gas_limit";

/// Committed chain data the executor needs while running a block
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Value and enable number of a system config entry.
    async fn get_system_config_by_key(&self, key: &str) -> Result<Option<(String, u64)>>;

    async fn get_block_hash_by_number(&self, number: u64) -> Result<Option<Hash>>;
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCacheStats {
    pub hash_hits: u64,
    pub hash_misses: u64,
    pub config_hits: u64,
    pub config_misses: u64,
}

pub struct LedgerCache {
    ledger: Arc<dyn Ledger>,
    block_hashes: Mutex<LruCache<u64, Hash>>,
    configs: Mutex<HashMap<String, (String, u64)>>,
    stats: Mutex<LedgerCacheStats>,
    default_gas_limit: u64,
}

impl LedgerCache {
    pub fn new(ledger: Arc<dyn Ledger>, capacity: usize, default_gas_limit: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ledger,
            block_hashes: Mutex::new(LruCache::new(capacity)),
            configs: Mutex::new(HashMap::new()),
            stats: Mutex::new(LedgerCacheStats::default()),
            default_gas_limit,
        }
    }

    /// Hash of block `number`; the zero hash if the ledger does not know it.
    pub async fn block_hash(&self, number: u64) -> Result<Hash> {
        let cached = self.block_hashes.lock().get(&number).copied();
        if let Some(hash) = cached {
            self.stats.lock().hash_hits += 1;
            return Ok(hash);
        }
        self.stats.lock().hash_misses += 1;
        match self.ledger.get_block_hash_by_number(number).await? {
            Some(hash) => {
                self.block_hashes.lock().put(number, hash);
                Ok(hash)
            }
            None => Ok(Hash::default()),
        }
    }

    pub async fn system_config(&self, key: &str) -> Result<Option<(String, u64)>> {
        let cached = self.configs.lock().get(key).cloned();
        if let Some(entry) = cached {
            self.stats.lock().config_hits += 1;
            return Ok(Some(entry));
        }
        self.stats.lock().config_misses += 1;
        let fetched = self.ledger.get_system_config_by_key(key).await?;
        if let Some(entry) = &fetched {
            self.configs.lock().insert(key.to_string(), entry.clone());
        }
        Ok(fetched)
    }

    /// Gas limit for transactions that do not carry one.
    pub async fn tx_gas_limit(&self) -> Result<u64> {
        match self.system_config(SYSTEM_KEY_TX_GAS_LIMIT).await? {
            Some((value, _)) => value.trim().parse().map_err(|_| {
                ExecutorError::Ledger(format!("invalid {}: {}", SYSTEM_KEY_TX_GAS_LIMIT, value))
            }),
            None => Ok(self.default_gas_limit),
        }
    }

    /// Records the hash of a block committed by this node.
    pub fn set_block_hash(&self, number: u64, hash: Hash) {
        self.block_hashes.lock().put(number, hash);
    }

    /// Drops cached config so changes take effect from the next block.
    pub fn clear_configs(&self) {
        self.configs.lock().clear();
        debug!("Cleared system config cache");
    }

    pub fn stats(&self) -> LedgerCacheStats {
        self.stats.lock().clone()
    }
}

/// In-process ledger used by the node binary and tests
#[derive(Default)]
pub struct MemoryLedger {
    configs: RwLock<HashMap<String, (String, u64)>>,
    hashes: RwLock<HashMap<u64, Hash>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_system_config(&self, key: &str, value: &str, enable_number: u64) {
        self.configs
            .write()
            .insert(key.to_string(), (value.to_string(), enable_number));
    }

    pub fn set_block_hash(&self, number: u64, hash: Hash) {
        self.hashes.write().insert(number, hash);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_system_config_by_key(&self, key: &str) -> Result<Option<(String, u64)>> {
        Ok(self.configs.read().get(key).cloned())
    }

    async fn get_block_hash_by_number(&self, number: u64) -> Result<Option<Hash>> {
        Ok(self.hashes.read().get(&number).copied())
    }
}
