// tessera/core/execution/src/precompiles/mod.rs

//! Built-in contracts executed natively by the executive.
//!
//! Fixed system contracts live at reserved addresses. Every user table also
//! gets a contract at `keccak(path)[12..]`, registered in
//! [`S_TABLE_ADDRESS`], which dispatches to the Table or KVTable handler
//! bound to that path.

pub mod bfs;
pub mod condition;
pub mod gas;
pub mod kv_table;
pub mod table;
pub mod table_manager;
pub mod utilities;

use crate::crypto::CryptoSuite;
use crate::key_lock::{lock_key, range_lock_key, KeyLockManager, KeyLockOutcome};
use crate::types::{ExecutorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tessera_primitives::{Address, ExecutionMessage};
use tessera_storage::{CheckpointId, Entry, StorageWrapper, TableInfo, SYS_TABLES};
use tracing::warn;

pub use bfs::{init_system_tables, BfsPrecompiled};
pub use kv_table::KvTablePrecompiled;
pub use table::TablePrecompiled;
pub use table_manager::TableManagerPrecompiled;

/// System table mapping `hex(address)` to `[path, kind]` for table contracts.
pub const S_TABLE_ADDRESS: &str = "s_table_address";

/// Reserved system contract addresses
pub mod addresses {
    use tessera_primitives::Address;

    /// TableManager (0x1002)
    pub const TABLE_MANAGER: Address = Address([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x10, 0x02,
    ]);

    /// BFS directory service (0x100e)
    pub const BFS: Address = Address([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x10, 0x0e,
    ]);
}

/// Business result codes returned as int32 output
pub mod codes {
    pub const CODE_SUCCESS: i32 = 0;
    pub const CODE_TABLE_NAME_ALREADY_EXIST: i32 = -50001;
    pub const CODE_TABLE_DUPLICATE_FIELD: i32 = -50007;
    pub const CODE_TABLE_NOT_EXIST: i32 = -50013;
    pub const CODE_INSERT_KEY_EXIST: i32 = -51000;
    pub const CODE_UPDATE_KEY_NOT_EXIST: i32 = -51100;
    pub const CODE_FILE_ALREADY_EXIST: i32 = -53001;
    pub const CODE_FILE_BUILD_DIR_FAILED: i32 = -53002;
    pub const CODE_FILE_NOT_EXIST: i32 = -53003;
    pub const CODE_FILE_INVALID_TYPE: i32 = -53004;
    pub const CODE_FILE_INVALID_PATH: i32 = -53005;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Table,
    Kv,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Table => "table",
            TableKind::Kv => "kv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "table" => Some(TableKind::Table),
            "kv" => Some(TableKind::Kv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecompiledExecResult {
    pub output: Vec<u8>,
    pub gas_used: u64,
}

/// A call a precompiled contract issues before it can finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub to: Address,
    pub data: Vec<u8>,
}

/// Saved locals of a suspended precompiled call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeState {
    /// Table rows are written; waiting for BFS to register the path.
    RegisterTable { path: String, kind: TableKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecompiledOutcome {
    Finished(PrecompiledExecResult),
    Suspend {
        call: OutboundCall,
        state: ResumeState,
        gas_used: u64,
    },
}

impl PrecompiledOutcome {
    pub fn finished(output: Vec<u8>, gas_used: u64) -> Self {
        PrecompiledOutcome::Finished(PrecompiledExecResult { output, gas_used })
    }
}

/// Storage and call context handed to a precompiled handler.
///
/// Row reads and writes lock the row for the calling context, directory rows
/// included. Schema lookups through [`open_table`](Self::open_table), dispatch
/// reads through [`system_row`](Self::system_row) and key scans through
/// [`primary_keys`](Self::primary_keys) take no lock; they are recorded as
/// observations and validated when the context's writes are settled.
pub struct PrecompiledContext<'a> {
    storage: &'a mut StorageWrapper,
    checkpoint: CheckpointId,
    key_locks: &'a KeyLockManager,
    suite: &'a dyn CryptoSuite,
    message: &'a ExecutionMessage,
    block_number: u64,
}

impl<'a> PrecompiledContext<'a> {
    pub fn new(
        storage: &'a mut StorageWrapper,
        checkpoint: CheckpointId,
        key_locks: &'a KeyLockManager,
        suite: &'a dyn CryptoSuite,
        message: &'a ExecutionMessage,
        block_number: u64,
    ) -> Self {
        Self {
            storage,
            checkpoint,
            key_locks,
            suite,
            message,
            block_number,
        }
    }

    pub fn context_id(&self) -> i64 {
        self.message.context_id
    }

    /// The inbound call being served.
    pub fn message(&self) -> &ExecutionMessage {
        self.message
    }

    pub fn suite(&self) -> &dyn CryptoSuite {
        self.suite
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    fn lock(&self, table: &str, key: &str) -> Result<()> {
        let key = lock_key(table, key);
        match self.key_locks.acquire(self.context_id(), &key) {
            KeyLockOutcome::Locked => Ok(()),
            KeyLockOutcome::Conflict { holder } => {
                warn!(
                    "Context {} hit key {:?} held by context {}",
                    self.context_id(),
                    key,
                    holder
                );
                Err(ExecutorError::KeyLockConflict { key, holder })
            }
        }
    }

    pub async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>> {
        self.lock(table, key)?;
        Ok(self.storage.get_row(self.checkpoint, table, key).await?)
    }

    pub fn set_row(&mut self, table: &str, key: &str, entry: Entry) -> Result<()> {
        self.lock(table, key)?;
        Ok(self.storage.set_row(self.checkpoint, table, key, entry)?)
    }

    pub fn remove_row(&mut self, table: &str, key: &str) -> Result<()> {
        self.lock(table, key)?;
        Ok(self.storage.remove_row(self.checkpoint, table, key)?)
    }

    /// Unlocked read for system rows that only steer dispatch.
    pub async fn system_row(&self, table: &str, key: &str) -> Result<Option<Entry>> {
        self.key_locks.observe(self.context_id(), &lock_key(table, key));
        Ok(self.storage.get_row(self.checkpoint, table, key).await?)
    }

    pub async fn open_table(&self, path: &str) -> Result<Option<TableInfo>> {
        self.key_locks.observe(self.context_id(), &lock_key(SYS_TABLES, path));
        Ok(self.storage.open_table(self.checkpoint, path).await?)
    }

    pub async fn create_table(
        &mut self,
        path: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> Result<TableInfo> {
        self.lock(SYS_TABLES, path)?;
        Ok(self
            .storage
            .create_table(self.checkpoint, path, key_column, value_columns)
            .await?)
    }

    pub fn update_table_info(&mut self, info: &TableInfo) -> Result<()> {
        self.lock(SYS_TABLES, &info.name)?;
        Ok(self.storage.update_table_info(self.checkpoint, info)?)
    }

    /// Keys visible in `table`, ascending. The scan is observed as a whole;
    /// the rows themselves are locked only when read.
    pub async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        self.key_locks.observe(self.context_id(), &range_lock_key(table));
        Ok(self.storage.primary_keys(self.checkpoint, table).await?)
    }

    pub fn table_address(&self, path: &str) -> Address {
        utilities::table_address(self.suite, path)
    }
}

#[async_trait]
pub trait Precompiled: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn call(&self, ctx: &mut PrecompiledContext<'_>, input: &[u8])
        -> Result<PrecompiledOutcome>;

    /// Continues a call that suspended with `state` once `reply` arrives.
    async fn resume(
        &self,
        _ctx: &mut PrecompiledContext<'_>,
        state: ResumeState,
        _reply: &ExecutionMessage,
    ) -> Result<PrecompiledOutcome> {
        Err(ExecutorError::Precompiled(format!(
            "{} cannot resume {:?}",
            self.name(),
            state
        )))
    }
}

/// Address to handler map
pub struct PrecompiledRegistry {
    handlers: HashMap<Address, Arc<dyn Precompiled>>,
    table_methods: Arc<table::TableMethods>,
    kv_methods: Arc<kv_table::KvTableMethods>,
}

impl PrecompiledRegistry {
    /// Registry with TableManager and BFS at their reserved addresses.
    pub fn new(suite: &dyn CryptoSuite) -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            table_methods: Arc::new(table::TableMethods::new(suite)),
            kv_methods: Arc::new(kv_table::KvTableMethods::new(suite)),
        };
        registry.register(
            addresses::TABLE_MANAGER,
            Arc::new(TableManagerPrecompiled::new(suite)),
        );
        registry.register(addresses::BFS, Arc::new(BfsPrecompiled::new(suite)));
        registry
    }

    pub fn register(&mut self, address: Address, handler: Arc<dyn Precompiled>) {
        self.handlers.insert(address, handler);
    }

    pub fn get(&self, address: &Address) -> Option<Arc<dyn Precompiled>> {
        self.handlers.get(address).cloned()
    }

    pub fn is_reserved(&self, address: &Address) -> bool {
        self.handlers.contains_key(address)
    }

    /// Handler bound to the table at `path`.
    pub fn bound_table(&self, path: &str, kind: TableKind) -> Arc<dyn Precompiled> {
        match kind {
            TableKind::Table => Arc::new(TablePrecompiled::new(path, self.table_methods.clone())),
            TableKind::Kv => Arc::new(KvTablePrecompiled::new(path, self.kv_methods.clone())),
        }
    }

    /// Looks `address` up among the registered table contracts.
    pub async fn resolve_table(
        &self,
        ctx: &PrecompiledContext<'_>,
        address: &Address,
    ) -> Result<Option<Arc<dyn Precompiled>>> {
        let row = match ctx.system_row(S_TABLE_ADDRESS, &address.to_hex()).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        let kind = TableKind::parse(row.field(1)).ok_or_else(|| {
            ExecutorError::Storage(tessera_storage::StorageError::CorruptSchema(format!(
                "{} kind {}",
                row.field(0),
                row.field(1)
            )))
        })?;
        Ok(Some(self.bound_table(row.field(0), kind)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::abi::{decode, encode_with_selector, function_selector, AbiVariable};
    use crate::crypto::Keccak256Secp256k1;
    use parking_lot::RwLock;
    use tessera_storage::{MemoryStorage, Overlay, StorageInterface};

    /// A storage wrapper over fresh system tables plus a lock table.
    pub struct Harness {
        pub storage: StorageWrapper,
        pub checkpoint: CheckpointId,
        pub locks: KeyLockManager,
        pub suite: Keccak256Secp256k1,
        pub message: ExecutionMessage,
    }

    impl Harness {
        pub async fn new() -> Self {
            let backend = Arc::new(MemoryStorage::new());
            init_system_tables(backend.as_ref()).await.unwrap();
            let backend: Arc<dyn StorageInterface> = backend;
            let mut storage = StorageWrapper::new(backend, Arc::new(RwLock::new(Overlay::new())));
            let checkpoint = storage.checkpoint(None).unwrap();
            let message = ExecutionMessage::new_call(
                1,
                Address::from_low_u64(0xabc),
                addresses::TABLE_MANAGER,
                Vec::new(),
                1_000_000,
            );
            Self {
                storage,
                checkpoint,
                locks: KeyLockManager::new(),
                suite: Keccak256Secp256k1,
                message,
            }
        }

        pub fn ctx(&mut self) -> PrecompiledContext<'_> {
            PrecompiledContext::new(
                &mut self.storage,
                self.checkpoint,
                &self.locks,
                &self.suite,
                &self.message,
                1,
            )
        }

        pub fn input<T: AbiVariable>(&self, signature: &str, args: &T) -> Vec<u8> {
            encode_with_selector(function_selector(&self.suite, signature), args)
        }
    }

    pub fn output<T: AbiVariable>(outcome: &PrecompiledOutcome) -> T {
        match outcome {
            PrecompiledOutcome::Finished(result) => decode(&result.output).unwrap(),
            other => panic!("expected a finished call, got {:?}", other),
        }
    }
}
