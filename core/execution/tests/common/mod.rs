// tessera/core/execution/tests/common/mod.rs

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_execution::abi::{decode, encode_with_selector, function_selector, AbiVariable};
use tessera_execution::precompiles::utilities::table_address;
use tessera_execution::vm::{VmCall, VmHost, VmOutcome, VmSubCall};
use tessera_execution::{
    init_system_tables, Address, BlockHeader, ExecutionMessage, ExecutorConfig, Hash,
    Interpreter, Keccak256Secp256k1, MemoryLedger, MessageType, TransactionExecutor,
    TwoPCParams,
};
use tessera_storage::{Entry, MemoryStorage, Overlay, StorageError, StorageInterface, TableInfo};

pub fn input<T: AbiVariable>(signature: &str, args: &T) -> Vec<u8> {
    encode_with_selector(function_selector(&Keccak256Secp256k1, signature), args)
}

pub fn output<T: AbiVariable>(reply: &ExecutionMessage) -> T {
    decode(&reply.data).expect("decode reply data")
}

pub fn table_at(path: &str) -> Address {
    table_address(&Keccak256Secp256k1, path)
}

pub fn sender() -> Address {
    Address::from_low_u64(0xabc)
}

/// Storage whose commit can be switched to fail.
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    pub fail_commit: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            fail_commit: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StorageInterface for FlakyStorage {
    async fn get_row(&self, table: &str, key: &str) -> tessera_storage::Result<Option<Entry>> {
        self.inner.get_row(table, key).await
    }

    async fn get_primary_keys(&self, table: &str) -> tessera_storage::Result<Vec<String>> {
        self.inner.get_primary_keys(table).await
    }

    async fn set_row(&self, table: &str, key: &str, entry: Entry) -> tessera_storage::Result<()> {
        self.inner.set_row(table, key, entry).await
    }

    async fn create_table(
        &self,
        name: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> tessera_storage::Result<TableInfo> {
        self.inner.create_table(name, key_column, value_columns).await
    }

    async fn open_table(&self, name: &str) -> tessera_storage::Result<Option<TableInfo>> {
        self.inner.open_table(name).await
    }

    async fn prepare(&self, params: &TwoPCParams, changes: Overlay) -> tessera_storage::Result<()> {
        self.inner.prepare(params, changes).await
    }

    async fn commit(&self, params: &TwoPCParams) -> tessera_storage::Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::Codec("disk full".into()));
        }
        self.inner.commit(params).await
    }

    async fn rollback(&self, params: &TwoPCParams) -> tessera_storage::Result<()> {
        self.inner.rollback(params).await
    }
}

/// Storage that hands control back to the runtime before every read, so
/// concurrently driven contexts interleave at each lookup.
pub struct YieldingStorage {
    pub inner: MemoryStorage,
}

impl YieldingStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
        }
    }
}

#[async_trait]
impl StorageInterface for YieldingStorage {
    async fn get_row(&self, table: &str, key: &str) -> tessera_storage::Result<Option<Entry>> {
        tokio::task::yield_now().await;
        self.inner.get_row(table, key).await
    }

    async fn get_primary_keys(&self, table: &str) -> tessera_storage::Result<Vec<String>> {
        tokio::task::yield_now().await;
        self.inner.get_primary_keys(table).await
    }

    async fn set_row(&self, table: &str, key: &str, entry: Entry) -> tessera_storage::Result<()> {
        self.inner.set_row(table, key, entry).await
    }

    async fn create_table(
        &self,
        name: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> tessera_storage::Result<TableInfo> {
        self.inner.create_table(name, key_column, value_columns).await
    }

    async fn open_table(&self, name: &str) -> tessera_storage::Result<Option<TableInfo>> {
        tokio::task::yield_now().await;
        self.inner.open_table(name).await
    }

    async fn prepare(&self, params: &TwoPCParams, changes: Overlay) -> tessera_storage::Result<()> {
        self.inner.prepare(params, changes).await
    }

    async fn commit(&self, params: &TwoPCParams) -> tessera_storage::Result<()> {
        self.inner.commit(params).await
    }

    async fn rollback(&self, params: &TwoPCParams) -> tessera_storage::Result<()> {
        self.inner.rollback(params).await
    }
}

/// One script step run by [`ScriptInterpreter`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Set { key: String, value: String },
    Get { key: String },
    BlockHash { number: u64 },
    Call { to: Address, input: Vec<u8>, gas: u64, require_success: bool },
    Revert { reason: String },
}

pub fn script(ops: &[Op]) -> Vec<u8> {
    serde_json::to_vec(ops).expect("encode script")
}

/// Interprets contract code as a JSON list of [`Op`]s. Deployment stores the
/// init code unchanged. The output is a JSON list of the values read.
pub struct ScriptInterpreter;

#[async_trait]
impl Interpreter for ScriptInterpreter {
    async fn execute(
        &self,
        call: VmCall,
        host: &mut dyn VmHost,
    ) -> tessera_execution::Result<VmOutcome> {
        if call.create {
            return Ok(VmOutcome::success(call.code, 10));
        }
        let ops: Vec<Op> = serde_json::from_slice(&call.code)
            .map_err(|e| tessera_execution::ExecutorError::Reverted(e.to_string()))?;
        let mut values = Vec::new();
        let mut sub_calls = Vec::new();
        for op in ops {
            match op {
                Op::Set { key, value } => host.storage_set(&key, &value).await?,
                Op::Get { key } => values.push(host.storage_get(&key).await?.unwrap_or_default()),
                Op::BlockHash { number } => values.push(host.block_hash(number).await?.to_hex()),
                Op::Call {
                    to,
                    input,
                    gas,
                    require_success,
                } => {
                    let sub = VmSubCall::new(to, input, gas);
                    sub_calls.push(if require_success { sub } else { sub.allow_revert() });
                }
                Op::Revert { reason } => {
                    return Ok(VmOutcome::revert(
                        tessera_execution::abi::encode_revert_reason(&reason),
                        5,
                    ))
                }
            }
        }
        let mut outcome = VmOutcome::success(serde_json::to_vec(&values).expect("encode values"), 20);
        outcome.sub_calls = sub_calls;
        Ok(outcome)
    }
}

pub struct TestChain {
    pub backend: Arc<dyn StorageInterface>,
    pub ledger: Arc<MemoryLedger>,
    pub executor: Arc<TransactionExecutor>,
}

impl TestChain {
    pub async fn new() -> Self {
        Self::with_backend(Arc::new(MemoryStorage::new()), ExecutorConfig::for_testing()).await
    }

    pub async fn with_backend(backend: Arc<dyn StorageInterface>, config: ExecutorConfig) -> Self {
        init_system_tables(backend.as_ref())
            .await
            .expect("init system tables");
        let ledger = Arc::new(MemoryLedger::new());
        let executor = TransactionExecutor::new(config, backend.clone(), ledger.clone())
            .with_interpreter(Arc::new(ScriptInterpreter));
        Self {
            backend,
            ledger,
            executor: Arc::new(executor),
        }
    }

    pub async fn open_block(&self, number: u64) {
        self.executor
            .next_block_header(BlockHeader::new(number, Hash::default(), 1_700_000_000 + number))
            .await
            .expect("open block");
    }

    pub async fn commit_block(&self, number: u64) {
        let params = TwoPCParams::new(number);
        self.executor.prepare(&params).await.expect("prepare");
        self.executor.commit(&params).await.expect("commit");
    }

    pub fn call(&self, context_id: i64, to: Address, data: Vec<u8>) -> ExecutionMessage {
        let mut message = ExecutionMessage::new_call(context_id, sender(), to, data, 100_000_000);
        message.tx_hash = Hash::keccak(&context_id.to_be_bytes());
        message
    }

    pub fn deploy(&self, context_id: i64, code: Vec<u8>) -> ExecutionMessage {
        let mut message = self.call(context_id, Address::zero(), code);
        message.create = true;
        message
    }

    /// Routes a context's messages until its root frame ends.
    pub async fn drive(&self, root: ExecutionMessage) -> ExecutionMessage {
        let mut pending_calls = 0usize;
        let mut message = root;
        loop {
            let reply = self
                .executor
                .execute_transaction(message)
                .await
                .expect("execute");
            match reply.message_type {
                MessageType::Message => {
                    pending_calls += 1;
                    message = reply;
                }
                MessageType::Finished | MessageType::Revert if pending_calls > 0 => {
                    pending_calls -= 1;
                    message = reply;
                }
                _ => return reply,
            }
        }
    }

    pub async fn create_table(&self, context_id: i64, name: &str, key: &str, values: &[&str]) -> i32 {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let data = input(
            "createTable(string,(string,string[]))",
            &(name.to_string(), (key.to_string(), values)),
        );
        let reply = self
            .drive(self.call(context_id, tessera_execution::addresses::TABLE_MANAGER, data))
            .await;
        output::<(i32,)>(&reply).0
    }
}
