// tessera/core/execution/src/executor.rs

//! Block lifecycle around the per-context executives.
//!
//! One block at a time: `next_block_header` opens it, `execute_transaction`
//! drives messages through the contexts, and the two-phase
//! `prepare`/`commit` hands the block overlay to storage. `rollback` throws
//! the block away.
//!
//! Each context writes into a staging overlay of its own. Under
//! [`Settlement::Immediate`] a finished context is merged into the block
//! overlay at once. Under [`Settlement::Deferred`] it waits, still holding its
//! key locks, until the caller settles or discards it, which lets a scheduler
//! merge contexts in transaction order.

use crate::config::ExecutorConfig;
use crate::crypto::{CryptoSuite, Keccak256Secp256k1};
use crate::executive::{ExecutiveEnv, TransactionExecutive};
use crate::key_lock::{lock_key, range_lock_key, KeyLockManager};
use crate::ledger::{Ledger, LedgerCache};
use crate::metrics::{BLOCK_COMMITS_TOTAL, EXECUTOR_MESSAGES_TOTAL, KEY_LOCK_CONFLICTS_TOTAL};
use crate::precompiles::PrecompiledRegistry;
use crate::types::{ExecutorError, ExecutorState, Result, Settlement};
use crate::vm::{Interpreter, NoopInterpreter};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_primitives::{
    Address, BlockHeader, ExecutionMessage, Hash, MessageType, Transaction, TwoPCParams,
};
use tessera_storage::{Overlay, StorageInterface, StorageWrapper, TableInfo};
use tracing::{debug, error, info, warn};

/// Where `TxHash` messages get their transaction body
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>>;
}

/// Everything belonging to the block being executed
pub struct BlockContext {
    header: BlockHeader,
    overlay: Arc<RwLock<Overlay>>,
    env: Arc<ExecutiveEnv>,
    contexts: DashMap<i64, Arc<tokio::sync::Mutex<TransactionExecutive>>>,
    staging: DashMap<i64, Arc<RwLock<Overlay>>>,
    unsettled: DashMap<i64, Arc<RwLock<Overlay>>>,
    settlement: Mutex<Settlement>,
}

impl BlockContext {
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Contexts with suspended frames.
    pub fn in_flight(&self) -> usize {
        self.contexts.len()
    }

    /// Finished contexts waiting to be settled or discarded.
    pub fn unsettled(&self) -> usize {
        self.unsettled.len()
    }

    pub fn settlement(&self) -> Settlement {
        *self.settlement.lock()
    }

    fn merge_staged(&self, staged: &RwLock<Overlay>) -> Overlay {
        let changes = std::mem::take(&mut *staged.write());
        self.overlay.write().merge(changes.clone());
        changes
    }

    /// Rows written by finished transactions of this block.
    pub fn pending_rows(&self) -> usize {
        self.overlay.read().len()
    }
}

pub struct TransactionExecutor {
    config: ExecutorConfig,
    backend: Arc<dyn StorageInterface>,
    ledger: Arc<LedgerCache>,
    suite: Arc<dyn CryptoSuite>,
    registry: Arc<PrecompiledRegistry>,
    interpreter: Arc<dyn Interpreter>,
    transactions: Option<Arc<dyn TransactionSource>>,
    key_locks: KeyLockManager,
    state: Mutex<ExecutorState>,
    block: RwLock<Option<Arc<BlockContext>>>,
}

impl TransactionExecutor {
    pub fn new(
        config: ExecutorConfig,
        backend: Arc<dyn StorageInterface>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let suite: Arc<dyn CryptoSuite> = Arc::new(Keccak256Secp256k1);
        let ledger = Arc::new(LedgerCache::new(
            ledger,
            config.ledger_cache_capacity,
            config.default_gas_limit,
        ));
        Self {
            registry: Arc::new(PrecompiledRegistry::new(suite.as_ref())),
            suite,
            config,
            backend,
            ledger,
            interpreter: Arc::new(NoopInterpreter),
            transactions: None,
            key_locks: KeyLockManager::new(),
            state: Mutex::new(ExecutorState::Idle),
            block: RwLock::new(None),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_transaction_source(mut self, source: Arc<dyn TransactionSource>) -> Self {
        self.transactions = Some(source);
        self
    }

    /// Replaces the hash and signature scheme. Selectors and table
    /// addresses are derived again from the new suite.
    pub fn with_crypto_suite(mut self, suite: Arc<dyn CryptoSuite>) -> Self {
        self.registry = Arc::new(PrecompiledRegistry::new(suite.as_ref()));
        self.suite = suite;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    pub fn ledger_cache(&self) -> &Arc<LedgerCache> {
        &self.ledger
    }

    pub fn key_locks(&self) -> &KeyLockManager {
        &self.key_locks
    }

    pub fn suite(&self) -> &Arc<dyn CryptoSuite> {
        &self.suite
    }

    pub fn current_block(&self) -> Option<Arc<BlockContext>> {
        self.block.read().clone()
    }

    fn check_state(&self, allowed: &[ExecutorState], expected: &'static str) -> Result<ExecutorState> {
        let state = *self.state.lock();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(ExecutorError::InvalidState {
                expected,
                found: state,
            })
        }
    }

    fn set_state(&self, state: ExecutorState) {
        let mut current = self.state.lock();
        debug!("Executor state {} -> {}", *current, state);
        *current = state;
    }

    fn open_block(&self) -> Result<Arc<BlockContext>> {
        self.block.read().clone().ok_or(ExecutorError::InvalidState {
            expected: "an open block",
            found: self.state(),
        })
    }

    fn check_number(block: &BlockContext, params: &TwoPCParams) -> Result<()> {
        if block.header.number != params.number {
            return Err(ExecutorError::BlockNumberMismatch {
                expected: block.header.number,
                found: params.number,
            });
        }
        Ok(())
    }

    /// Chooses how finished contexts of the open block are settled. Only
    /// allowed while no context is running or waiting.
    pub fn set_settlement(&self, settlement: Settlement) -> Result<()> {
        let block = self.open_block()?;
        let open = block.in_flight() + block.unsettled();
        if open > 0 {
            return Err(ExecutorError::InFlightContexts(open));
        }
        debug!("Block {} settles {:?}", block.header.number, settlement);
        *block.settlement.lock() = settlement;
        Ok(())
    }

    /// Opens block `header.number` with an empty overlay.
    pub async fn next_block_header(&self, header: BlockHeader) -> Result<()> {
        self.check_state(
            &[
                ExecutorState::Idle,
                ExecutorState::Committed,
                ExecutorState::RolledBack,
            ],
            "idle, committed or rolled_back",
        )?;
        self.ledger.clear_configs();
        let env = Arc::new(ExecutiveEnv {
            config: self.config.clone(),
            header: header.clone(),
            suite: self.suite.clone(),
            registry: self.registry.clone(),
            key_locks: self.key_locks.clone(),
            ledger: self.ledger.clone(),
            interpreter: self.interpreter.clone(),
        });
        info!("Opening block {} ({})", header.number, header.hash().to_hex());
        *self.block.write() = Some(Arc::new(BlockContext {
            header,
            overlay: Arc::new(RwLock::new(Overlay::new())),
            env,
            contexts: DashMap::new(),
            staging: DashMap::new(),
            unsettled: DashMap::new(),
            settlement: Mutex::new(Settlement::Immediate),
        }));
        self.set_state(ExecutorState::BlockOpen);
        Ok(())
    }

    /// Top-level call for transaction `tx` in context `context_id`.
    pub async fn transaction_message(
        &self,
        context_id: i64,
        tx: &Transaction,
    ) -> Result<ExecutionMessage> {
        let gas = if tx.gas_limit == 0 {
            self.ledger.tx_gas_limit().await?
        } else {
            tx.gas_limit
        };
        let mut message = ExecutionMessage::new_call(
            context_id,
            tx.sender,
            tx.to.unwrap_or_else(Address::zero),
            tx.input.clone(),
            gas,
        );
        message.tx_hash = tx.hash;
        message.create = tx.to.is_none();
        Ok(message)
    }

    async fn load_transaction(&self, message: ExecutionMessage) -> Result<ExecutionMessage> {
        let source = self
            .transactions
            .as_ref()
            .ok_or(ExecutorError::TransactionNotFound(message.tx_hash))?;
        let tx = source
            .get_transaction(&message.tx_hash)
            .await?
            .ok_or(ExecutorError::TransactionNotFound(message.tx_hash))?;
        let filled = self.transaction_message(message.context_id, &tx).await?;
        Ok(ExecutionMessage {
            seq: message.seq,
            message_type: MessageType::TxHash,
            ..filled
        })
    }

    /// Runs one message of a context and returns what the context produced:
    /// an outbound `Message`, a terminal `Finished`/`Revert`, or a `KeyLock`
    /// abort.
    pub async fn execute_transaction(&self, message: ExecutionMessage) -> Result<ExecutionMessage> {
        self.check_state(
            &[ExecutorState::BlockOpen, ExecutorState::Executing],
            "block_open or executing",
        )?;
        let block = self.open_block()?;
        if self.state() == ExecutorState::BlockOpen {
            self.set_state(ExecutorState::Executing);
        }

        let message = if message.message_type == MessageType::TxHash {
            self.load_transaction(message).await?
        } else {
            message
        };
        let context_id = message.context_id;
        debug!("Executing {}", message);

        if block.unsettled.contains_key(&context_id) {
            return Err(ExecutorError::UnexpectedMessage {
                message_type: message.message_type,
                context_id,
                seq: message.seq,
            });
        }
        let executive = match message.message_type {
            MessageType::TxHash | MessageType::Message => block
                .contexts
                .entry(context_id)
                .or_insert_with(|| {
                    let staging = Arc::new(RwLock::new(Overlay::new()));
                    block.staging.insert(context_id, staging.clone());
                    let storage = StorageWrapper::new(self.backend.clone(), block.overlay.clone())
                        .with_staging(staging);
                    Arc::new(tokio::sync::Mutex::new(TransactionExecutive::new(
                        context_id,
                        block.env.clone(),
                        storage,
                    )))
                })
                .clone(),
            MessageType::Finished | MessageType::Revert => block
                .contexts
                .get(&context_id)
                .map(|entry| entry.value().clone())
                .ok_or(ExecutorError::FrameNotFound {
                    context_id,
                    seq: message.seq,
                })?,
            other => {
                return Err(ExecutorError::UnexpectedMessage {
                    message_type: other,
                    context_id,
                    seq: message.seq,
                })
            }
        };

        let original = message.clone();
        let result = {
            let mut executive = executive.lock().await;
            let result = if message.is_terminal() {
                executive.resume(message).await
            } else {
                executive.start(message).await
            };
            result.map(|reply| {
                let done = executive.is_root_reply(&reply);
                (reply, done)
            })
        };

        let reply = match result {
            Ok((mut reply, done)) => {
                reply.key_locks = self.key_locks.keys_held_by(context_id);
                if done {
                    block.contexts.remove(&context_id);
                    let staged = block.staging.remove(&context_id).map(|(_, staged)| staged);
                    match (block.settlement(), staged) {
                        (Settlement::Deferred, Some(staged)) => {
                            block.unsettled.insert(context_id, staged);
                        }
                        (_, staged) => {
                            if let Some(staged) = staged {
                                block.merge_staged(&staged);
                            }
                            self.key_locks.release(context_id);
                        }
                    }
                    debug!("Context {} completed with {}", context_id, reply.status);
                }
                reply
            }
            Err(ExecutorError::KeyLockConflict { key, holder }) => {
                warn!(
                    "Context {} aborted on key {:?} held by context {}",
                    context_id, key, holder
                );
                if self.config.enable_metrics {
                    KEY_LOCK_CONFLICTS_TOTAL.inc();
                }
                let held = self.key_locks.keys_held_by(context_id);
                block.contexts.remove(&context_id);
                block.staging.remove(&context_id);
                self.key_locks.release(context_id);
                ExecutionMessage {
                    message_type: MessageType::KeyLock,
                    key_lock_acquired: Some(key),
                    key_locks: held,
                    message: format!("key held by context {}", holder),
                    ..original
                }
            }
            Err(e) => {
                error!("Context {} failed: {}", context_id, e);
                return Err(e);
            }
        };
        if self.config.enable_metrics {
            EXECUTOR_MESSAGES_TOTAL
                .with_label_values(&[reply.message_type.as_str()])
                .inc();
        }
        Ok(reply)
    }

    /// Same contract as [`execute_transaction`](Self::execute_transaction),
    /// used by the message-routing scheduler.
    pub async fn dmc_execute_transaction(
        &self,
        message: ExecutionMessage,
    ) -> Result<ExecutionMessage> {
        debug!(
            "DMC dispatch ctx={} seq={} type={}",
            message.context_id, message.seq, message.message_type
        );
        self.execute_transaction(message).await
    }

    /// Merges the writes of finished context `context_id` into the block
    /// overlay and frees its key locks.
    ///
    /// `written` holds the rows settled ahead of this context since it
    /// started. If the context read one of them without a lock, nothing is
    /// merged and `false` comes back; the caller discards and reruns it.
    /// Otherwise the context's own rows are added to `written`.
    pub fn settle_context(&self, context_id: i64, written: &mut BTreeSet<String>) -> Result<bool> {
        let block = self.open_block()?;
        let staged = block
            .unsettled
            .get(&context_id)
            .map(|entry| entry.value().clone())
            .ok_or(ExecutorError::ContextNotFinished(context_id))?;
        if let Some(key) = self
            .key_locks
            .observed_by(context_id)
            .into_iter()
            .find(|key| written.contains(key))
        {
            debug!("Context {} read {:?} before it was rewritten", context_id, key);
            return Ok(false);
        }
        block.unsettled.remove(&context_id);
        let changes = block.merge_staged(&staged);
        for (table, key, _) in changes.iter() {
            written.insert(lock_key(table, key));
            written.insert(range_lock_key(table));
        }
        self.key_locks.release(context_id);
        debug!("Settled context {} with {} rows", context_id, changes.len());
        Ok(true)
    }

    /// Drops the writes of finished context `context_id` and frees its key
    /// locks.
    pub fn discard_context(&self, context_id: i64) -> Result<()> {
        let block = self.open_block()?;
        block
            .unsettled
            .remove(&context_id)
            .ok_or(ExecutorError::ContextNotFinished(context_id))?;
        self.key_locks.release(context_id);
        debug!("Discarded context {}", context_id);
        Ok(())
    }

    /// First phase of the block commit.
    pub async fn prepare(&self, params: &TwoPCParams) -> Result<()> {
        self.check_state(
            &[ExecutorState::BlockOpen, ExecutorState::Executing],
            "block_open or executing",
        )?;
        let block = self.open_block()?;
        Self::check_number(&block, params)?;
        let open = block.in_flight() + block.unsettled();
        if open > 0 {
            return Err(ExecutorError::InFlightContexts(open));
        }
        let changes = block.overlay.read().clone();
        let rows = changes.len();
        match self.backend.prepare(params, changes).await {
            Ok(()) => {
                info!("Prepared block {} with {} rows", params.number, rows);
                self.set_state(ExecutorState::Prepared);
                Ok(())
            }
            Err(e) => {
                error!("Prepare of block {} failed: {}", params.number, e);
                self.set_state(ExecutorState::RolledBack);
                Err(e.into())
            }
        }
    }

    /// Second phase: publishes the prepared block.
    pub async fn commit(&self, params: &TwoPCParams) -> Result<()> {
        self.check_state(&[ExecutorState::Prepared], "prepared")?;
        let block = self.open_block()?;
        Self::check_number(&block, params)?;
        if let Err(e) = self.backend.commit(params).await {
            error!("Commit of block {} failed: {}", params.number, e);
            if let Err(rollback) = self.backend.rollback(params).await {
                warn!("Rollback after failed commit also failed: {}", rollback);
            }
            self.key_locks.release_all();
            self.set_state(ExecutorState::RolledBack);
            if self.config.enable_metrics {
                BLOCK_COMMITS_TOTAL.with_label_values(&["failure"]).inc();
            }
            return Err(e.into());
        }
        self.ledger
            .set_block_hash(block.header.number, block.header.hash());
        self.key_locks.release_all();
        *self.block.write() = None;
        self.set_state(ExecutorState::Committed);
        if self.config.enable_metrics {
            BLOCK_COMMITS_TOTAL.with_label_values(&["success"]).inc();
        }
        info!("Committed block {}", params.number);
        Ok(())
    }

    /// Discards the open block.
    pub async fn rollback(&self, params: &TwoPCParams) -> Result<()> {
        let state = self.check_state(
            &[
                ExecutorState::BlockOpen,
                ExecutorState::Executing,
                ExecutorState::Prepared,
            ],
            "block_open, executing or prepared",
        )?;
        if state == ExecutorState::Prepared {
            self.backend.rollback(params).await?;
        }
        let dropped = self.block.write().take();
        if let Some(block) = dropped {
            debug!(
                "Dropping {} contexts, {} unsettled and {} pending rows",
                block.in_flight(),
                block.unsettled(),
                block.pending_rows()
            );
        }
        self.key_locks.release_all();
        self.set_state(ExecutorState::RolledBack);
        if self.config.enable_metrics {
            BLOCK_COMMITS_TOTAL.with_label_values(&["rollback"]).inc();
        }
        info!("Rolled back block {}", params.number);
        Ok(())
    }

    /// Committed schema of table `name`.
    pub async fn get_table_info(&self, name: &str) -> Result<Option<TableInfo>> {
        Ok(self.backend.open_table(name).await?)
    }
}
