// tessera/core/execution/src/executive.rs

//! Call stack of one transaction context.
//!
//! A [`TransactionExecutive`] runs frames for a single `context_id`. Each
//! frame is identified by the `seq` of the message that opened it and owns a
//! storage checkpoint on top of its caller's. A frame that needs another
//! contract does not call it directly: it saves a [`Continuation`] and hands
//! back a `Message` for the orchestrator to route. When the reply arrives the
//! frame picks up where it stopped.
//!
//! Frames end in exactly one of three ways: `Finished` folds the checkpoint
//! into the caller, `Revert` drops it, and a suspension returns `Message`.

use crate::abi::{decode_revert_reason, encode_revert_reason};
use crate::config::ExecutorConfig;
use crate::crypto::CryptoSuite;
use crate::key_lock::KeyLockManager;
use crate::ledger::LedgerCache;
use crate::metrics::{FRAME_GAS_USED, PRECOMPILED_CALLS_TOTAL};
use crate::precompiles::bfs::{register_leaf, FS_TYPE_CONTRACT};
use crate::precompiles::codes::CODE_SUCCESS;
use crate::precompiles::utilities::contract_table_path;
use crate::precompiles::{
    Precompiled, PrecompiledContext, PrecompiledOutcome, PrecompiledRegistry, ResumeState,
};
use crate::types::{ExecutorError, Result};
use crate::vm::{Interpreter, VmCall, VmHost, VmOutcome, VmStatus, VmSubCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tessera_primitives::{
    Address, BlockHeader, ExecutionMessage, Hash, MessageType, TransactionStatus,
};
use tessera_storage::{CheckpointId, Entry, StorageError, StorageWrapper};
use tracing::{debug, trace};

/// Row of a contract table holding its hex encoded code.
pub const CODE_ROW: &str = "code";
const SLOT_PREFIX: &str = "slot:";

/// Block-wide services shared by every executive of the block
pub struct ExecutiveEnv {
    pub config: ExecutorConfig,
    pub header: BlockHeader,
    pub suite: Arc<dyn CryptoSuite>,
    pub registry: Arc<PrecompiledRegistry>,
    pub key_locks: KeyLockManager,
    pub ledger: Arc<LedgerCache>,
    pub interpreter: Arc<dyn Interpreter>,
}

/// What a suspended frame still has to do once its outbound call returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingWork {
    /// A precompiled contract waiting to resume with this state.
    Precompiled(ResumeState),
    /// Interpreted code: the in-flight call's policy, the calls still to
    /// issue, and the output to return when all are done.
    SubCalls {
        require_success: bool,
        remaining: VecDeque<VmSubCall>,
        output: Vec<u8>,
        created: Option<Address>,
    },
}

/// Saved locals of a frame suspended on an outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// The inbound call this frame serves.
    pub message: ExecutionMessage,
    pub checkpoint: CheckpointId,
    /// Gas spent by the frame so far, callees included.
    pub gas_used: u64,
    pub callee_seq: i64,
    pub callee_gas: u64,
    pub pending: PendingWork,
}

struct OutboundRequest {
    to: Address,
    data: Vec<u8>,
    gas_limit: u64,
}

enum FrameOutcome {
    Finished {
        output: Vec<u8>,
        gas_used: u64,
        created: Option<Address>,
    },
    Revert {
        status: TransactionStatus,
        output: Vec<u8>,
        message: String,
        gas_used: u64,
    },
    Suspend {
        request: OutboundRequest,
        pending: PendingWork,
        gas_used: u64,
    },
}

impl FrameOutcome {
    fn revert(status: TransactionStatus, message: String) -> Self {
        FrameOutcome::Revert {
            status,
            output: encode_revert_reason(&message),
            message,
            gas_used: 0,
        }
    }
}

/// Storage access for interpreted code. Slots live as `slot:<key>` rows of
/// the account table.
struct ContractHost<'c, 'a> {
    ctx: &'c mut PrecompiledContext<'a>,
    table: String,
    static_call: bool,
    ledger: &'c LedgerCache,
}

#[async_trait]
impl VmHost for ContractHost<'_, '_> {
    async fn storage_get(&mut self, key: &str) -> Result<Option<String>> {
        let row = self
            .ctx
            .get_row(&self.table, &format!("{}{}", SLOT_PREFIX, key))
            .await?;
        Ok(row.map(|entry| entry.field(0).to_string()))
    }

    async fn storage_set(&mut self, key: &str, value: &str) -> Result<()> {
        if self.static_call {
            return Err(ExecutorError::Reverted(format!(
                "write to slot {} in a static call",
                key
            )));
        }
        self.ctx.set_row(
            &self.table,
            &format!("{}{}", SLOT_PREFIX, key),
            Entry::new(vec![value.to_string()]),
        )
    }

    async fn block_hash(&mut self, number: u64) -> Result<Hash> {
        self.ledger.block_hash(number).await
    }

    fn block_number(&self) -> u64 {
        self.ctx.block_number()
    }
}

pub struct TransactionExecutive {
    context_id: i64,
    env: Arc<ExecutiveEnv>,
    storage: StorageWrapper,
    /// Suspended frames keyed by the seq of their outstanding call.
    frames: BTreeMap<i64, Continuation>,
    max_seq: i64,
    root_seq: Option<i64>,
}

impl TransactionExecutive {
    pub fn new(context_id: i64, env: Arc<ExecutiveEnv>, storage: StorageWrapper) -> Self {
        Self {
            context_id,
            env,
            storage,
            frames: BTreeMap::new(),
            max_seq: 0,
            root_seq: None,
        }
    }

    pub fn context_id(&self) -> i64 {
        self.context_id
    }

    pub fn root_seq(&self) -> Option<i64> {
        self.root_seq
    }

    /// Frames waiting on a reply.
    pub fn suspended(&self) -> usize {
        self.frames.len()
    }

    pub fn continuation(&self, seq: i64) -> Option<&Continuation> {
        self.frames.get(&seq)
    }

    pub fn live_checkpoints(&self) -> usize {
        self.storage.live_checkpoints()
    }

    /// Whether `reply` ends the context's outermost frame.
    pub fn is_root_reply(&self, reply: &ExecutionMessage) -> bool {
        reply.is_terminal() && self.root_seq == Some(reply.seq) && self.frames.is_empty()
    }

    fn observe_seq(&mut self, seq: i64) {
        self.max_seq = self.max_seq.max(seq);
    }

    fn context<'s>(
        &'s mut self,
        checkpoint: CheckpointId,
        message: &'s ExecutionMessage,
    ) -> PrecompiledContext<'s> {
        PrecompiledContext::new(
            &mut self.storage,
            checkpoint,
            &self.env.key_locks,
            self.env.suite.as_ref(),
            message,
            self.env.header.number,
        )
    }

    /// Opens a frame for an inbound `TxHash` or `Message`.
    pub async fn start(&mut self, message: ExecutionMessage) -> Result<ExecutionMessage> {
        self.observe_seq(message.seq);
        let parent = match self.frames.get(&message.seq) {
            Some(frame) => Some(frame.checkpoint),
            None if self.root_seq.is_some() => {
                return Err(ExecutorError::UnexpectedMessage {
                    message_type: message.message_type,
                    context_id: self.context_id,
                    seq: message.seq,
                })
            }
            None => {
                self.root_seq = Some(message.seq);
                None
            }
        };
        trace!("Starting frame {}", message);

        if message.depth >= self.env.config.max_call_depth {
            debug!(
                "Context {} seq {} exceeds call depth {}",
                self.context_id, message.seq, self.env.config.max_call_depth
            );
            let reason = format!("call depth {} exceeded", message.depth);
            let mut reply = message.reply(
                MessageType::Revert,
                TransactionStatus::CallDepthExceeded,
                encode_revert_reason(&reason),
            );
            reply.message = reason;
            return Ok(reply);
        }

        let checkpoint = self.storage.checkpoint(parent)?;
        let result = self.run_frame(&message, checkpoint).await;
        self.settle(message, checkpoint, 0, result)
    }

    /// Continues the frame waiting on `reply.seq`.
    pub async fn resume(&mut self, reply: ExecutionMessage) -> Result<ExecutionMessage> {
        self.observe_seq(reply.seq);
        let frame = self
            .frames
            .remove(&reply.seq)
            .ok_or(ExecutorError::FrameNotFound {
                context_id: self.context_id,
                seq: reply.seq,
            })?;
        let callee_used = frame.callee_gas.saturating_sub(reply.gas_available);
        let gas_used = frame.gas_used.saturating_add(callee_used);
        let message = frame.message;
        let checkpoint = frame.checkpoint;
        trace!("Resuming frame {} after {}", message, reply);

        let result = match frame.pending {
            PendingWork::Precompiled(state) => {
                self.resume_precompiled(&message, checkpoint, state, &reply)
                    .await
            }
            PendingWork::SubCalls {
                require_success,
                remaining,
                output,
                created,
            } => {
                if reply.message_type == MessageType::Revert && require_success {
                    Ok(FrameOutcome::Revert {
                        status: TransactionStatus::RevertInstruction,
                        output: reply.data.clone(),
                        message: format!("call to {} reverted: {}", reply.from, reply.message),
                        gas_used: 0,
                    })
                } else {
                    self.next_sub_call(&message, checkpoint, remaining, output, created)
                        .await
                }
            }
        };
        self.settle(message, checkpoint, gas_used, result)
    }

    async fn run_frame(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
    ) -> Result<FrameOutcome> {
        if message.create {
            return self.deploy(message, checkpoint).await;
        }
        if let Some(handler) = self.precompiled_at(message, checkpoint).await? {
            let outcome = {
                let mut ctx = self.context(checkpoint, message);
                handler.call(&mut ctx, &message.data).await
            };
            return self.precompiled_outcome(handler.name(), outcome);
        }
        self.call_contract(message, checkpoint).await
    }

    async fn precompiled_at(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
    ) -> Result<Option<Arc<dyn Precompiled>>> {
        if let Some(handler) = self.env.registry.get(&message.to) {
            return Ok(Some(handler));
        }
        let registry = self.env.registry.clone();
        let ctx = self.context(checkpoint, message);
        registry.resolve_table(&ctx, &message.to).await
    }

    fn precompiled_outcome(
        &self,
        name: &'static str,
        outcome: Result<PrecompiledOutcome>,
    ) -> Result<FrameOutcome> {
        if self.env.config.enable_metrics {
            let status = match &outcome {
                Ok(PrecompiledOutcome::Finished(_)) => "finished",
                Ok(PrecompiledOutcome::Suspend { .. }) => "suspended",
                Err(_) => "error",
            };
            PRECOMPILED_CALLS_TOTAL
                .with_label_values(&[name, status])
                .inc();
        }
        Ok(match outcome? {
            PrecompiledOutcome::Finished(result) => FrameOutcome::Finished {
                output: result.output,
                gas_used: result.gas_used,
                created: None,
            },
            PrecompiledOutcome::Suspend {
                call,
                state,
                gas_used,
            } => FrameOutcome::Suspend {
                request: OutboundRequest {
                    to: call.to,
                    data: call.data,
                    gas_limit: u64::MAX,
                },
                pending: PendingWork::Precompiled(state),
                gas_used,
            },
        })
    }

    async fn resume_precompiled(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
        state: ResumeState,
        reply: &ExecutionMessage,
    ) -> Result<FrameOutcome> {
        let handler = self
            .precompiled_at(message, checkpoint)
            .await?
            .ok_or_else(|| {
                ExecutorError::Precompiled(format!("no precompiled contract at {}", message.to))
            })?;
        let outcome = {
            let mut ctx = self.context(checkpoint, message);
            handler.resume(&mut ctx, state, reply).await
        };
        self.precompiled_outcome(handler.name(), outcome)
    }

    /// `keccak(tx_hash ‖ number ‖ context_id ‖ seq)[12..]`
    fn new_contract_address(&self, message: &ExecutionMessage) -> Address {
        let mut preimage = Vec::with_capacity(56);
        preimage.extend_from_slice(message.tx_hash.as_bytes());
        preimage.extend_from_slice(&self.env.header.number.to_be_bytes());
        preimage.extend_from_slice(&message.context_id.to_be_bytes());
        preimage.extend_from_slice(&message.seq.to_be_bytes());
        Address::from_hash(&self.env.suite.hash(&preimage))
    }

    async fn deploy(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
    ) -> Result<FrameOutcome> {
        let address = self.new_contract_address(message);
        let table = contract_table_path(&address);
        let taken = {
            let ctx = self.context(checkpoint, message);
            ctx.open_table(&table).await?.is_some()
        };
        if taken {
            return Ok(FrameOutcome::revert(
                TransactionStatus::ContractAddressAlreadyUsed,
                format!("contract address {} already used", address),
            ));
        }
        {
            let mut ctx = self.context(checkpoint, message);
            ctx.create_table(&table, "key", vec!["value".into()]).await?;
        }
        debug!("Deploying contract {} in context {}", address, self.context_id);
        let outcome = self
            .interpret(message, checkpoint, message.data.clone(), address, true)
            .await?;
        self.vm_outcome(message, checkpoint, outcome, Some(address))
            .await
    }

    async fn call_contract(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
    ) -> Result<FrameOutcome> {
        let table = contract_table_path(&message.to);
        let code = {
            let ctx = self.context(checkpoint, message);
            ctx.get_row(&table, CODE_ROW).await?
        };
        let code = match code {
            Some(entry) => hex::decode(entry.field(0)).map_err(|e| {
                ExecutorError::Storage(StorageError::Codec(format!(
                    "code of {}: {}",
                    message.to, e
                )))
            })?,
            None => {
                return Ok(FrameOutcome::revert(
                    TransactionStatus::CallAddressError,
                    format!("no contract at {}", message.to),
                ))
            }
        };
        let outcome = self
            .interpret(message, checkpoint, code, message.to, false)
            .await?;
        self.vm_outcome(message, checkpoint, outcome, None).await
    }

    async fn interpret(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
        code: Vec<u8>,
        recipient: Address,
        create: bool,
    ) -> Result<VmOutcome> {
        let call = VmCall {
            code,
            input: if create {
                Vec::new()
            } else {
                message.data.clone()
            },
            gas: message.gas_available,
            sender: message.from,
            recipient,
            origin: message.origin,
            depth: message.depth,
            create,
            static_call: message.static_call,
        };
        let interpreter = self.env.interpreter.clone();
        let ledger = self.env.ledger.clone();
        let mut ctx = self.context(checkpoint, message);
        let mut host = ContractHost {
            ctx: &mut ctx,
            table: contract_table_path(&recipient),
            static_call: message.static_call,
            ledger: ledger.as_ref(),
        };
        interpreter.execute(call, &mut host).await
    }

    async fn vm_outcome(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
        outcome: VmOutcome,
        created: Option<Address>,
    ) -> Result<FrameOutcome> {
        match outcome.status {
            VmStatus::Revert => {
                let reason = decode_revert_reason(&outcome.output).unwrap_or_default();
                Ok(FrameOutcome::Revert {
                    status: TransactionStatus::RevertInstruction,
                    output: outcome.output,
                    message: reason,
                    gas_used: outcome.gas_used,
                })
            }
            VmStatus::OutOfGas => Err(ExecutorError::OutOfGas {
                needed: outcome.gas_used,
                available: message.gas_available,
            }),
            VmStatus::Success => {
                let mut frame = self
                    .next_sub_call(
                        message,
                        checkpoint,
                        outcome.sub_calls.into(),
                        outcome.output,
                        created,
                    )
                    .await?;
                match &mut frame {
                    FrameOutcome::Finished { gas_used, .. }
                    | FrameOutcome::Suspend { gas_used, .. } => *gas_used = outcome.gas_used,
                    FrameOutcome::Revert { .. } => {}
                }
                Ok(frame)
            }
        }
    }

    /// Issues the next queued sub-call, or completes the frame.
    async fn next_sub_call(
        &mut self,
        message: &ExecutionMessage,
        checkpoint: CheckpointId,
        mut remaining: VecDeque<VmSubCall>,
        output: Vec<u8>,
        created: Option<Address>,
    ) -> Result<FrameOutcome> {
        if let Some(call) = remaining.pop_front() {
            return Ok(FrameOutcome::Suspend {
                request: OutboundRequest {
                    to: call.to,
                    data: call.data,
                    gas_limit: call.gas,
                },
                pending: PendingWork::SubCalls {
                    require_success: call.require_success,
                    remaining,
                    output,
                    created,
                },
                gas_used: 0,
            });
        }
        if let Some(address) = created {
            let table = contract_table_path(&address);
            let mut ctx = self.context(checkpoint, message);
            ctx.set_row(&table, CODE_ROW, Entry::new(vec![hex::encode(&output)]))?;
            let code = register_leaf(&mut ctx, &table, FS_TYPE_CONTRACT).await?;
            if code != CODE_SUCCESS {
                return Err(ExecutorError::Precompiled(format!(
                    "registering contract {} failed with {}",
                    table, code
                )));
            }
        }
        Ok(FrameOutcome::Finished {
            output,
            gas_used: 0,
            created,
        })
    }

    fn charge(message: &ExecutionMessage, prior: u64, step: u64) -> Result<u64> {
        let total = prior.saturating_add(step);
        if total > message.gas_available {
            return Err(ExecutorError::OutOfGas {
                needed: total,
                available: message.gas_available,
            });
        }
        Ok(total)
    }

    fn observe_gas(&self, gas_used: u64) {
        if self.env.config.enable_metrics {
            FRAME_GAS_USED.observe(gas_used as f64);
        }
    }

    /// Turns a frame step into the message handed back to the executor.
    fn settle(
        &mut self,
        message: ExecutionMessage,
        checkpoint: CheckpointId,
        prior_gas: u64,
        result: Result<FrameOutcome>,
    ) -> Result<ExecutionMessage> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return self.revert_with_error(message, checkpoint, prior_gas, e),
        };
        match outcome {
            FrameOutcome::Finished {
                output,
                gas_used,
                created,
            } => {
                let total = match Self::charge(&message, prior_gas, gas_used) {
                    Ok(total) => total,
                    Err(e) => return self.revert_with_error(message, checkpoint, prior_gas, e),
                };
                self.storage.commit_to_parent(checkpoint)?;
                self.observe_gas(total);
                let mut reply = message.reply(MessageType::Finished, TransactionStatus::None, output);
                reply.gas_available = message.gas_available - total;
                reply.new_contract_address = created;
                debug!("Frame finished {}", reply);
                Ok(reply)
            }
            FrameOutcome::Revert {
                status,
                output,
                message: reason,
                gas_used,
            } => {
                let total = prior_gas.saturating_add(gas_used).min(message.gas_available);
                self.storage.discard(checkpoint)?;
                self.observe_gas(total);
                let mut reply = message.reply(MessageType::Revert, status, output);
                reply.gas_available = message.gas_available - total;
                reply.message = reason;
                debug!("Frame reverted {}: {}", reply, reply.message);
                Ok(reply)
            }
            FrameOutcome::Suspend {
                request,
                pending,
                gas_used,
            } => {
                let total = match Self::charge(&message, prior_gas, gas_used) {
                    Ok(total) => total,
                    Err(e) => return self.revert_with_error(message, checkpoint, prior_gas, e),
                };
                let seq = self.max_seq + 1;
                self.max_seq = seq;
                let gas = request.gas_limit.min(message.gas_available - total);

                let mut call = ExecutionMessage::new_call(
                    message.context_id,
                    message.to,
                    request.to,
                    request.data,
                    gas,
                );
                call.seq = seq;
                call.tx_hash = message.tx_hash;
                call.origin = message.origin;
                call.depth = message.depth + 1;
                call.static_call = message.static_call;

                debug!("Frame seq {} suspended on {}", message.seq, call);
                self.frames.insert(
                    seq,
                    Continuation {
                        message,
                        checkpoint,
                        gas_used: total,
                        callee_seq: seq,
                        callee_gas: gas,
                        pending,
                    },
                );
                Ok(call)
            }
        }
    }

    fn revert_with_error(
        &mut self,
        message: ExecutionMessage,
        checkpoint: CheckpointId,
        prior_gas: u64,
        error: ExecutorError,
    ) -> Result<ExecutionMessage> {
        let status = match error.revert_status() {
            Some(status) => status,
            None => return Err(error),
        };
        if self.storage.is_live(checkpoint) {
            self.storage.discard(checkpoint)?;
        }
        let gas_left = match status {
            TransactionStatus::OutOfGas => 0,
            _ => message.gas_available.saturating_sub(prior_gas),
        };
        self.observe_gas(message.gas_available - gas_left);
        let reason = error.to_string();
        let mut reply = message.reply(MessageType::Revert, status, encode_revert_reason(&reason));
        reply.gas_available = gas_left;
        reply.message = reason;
        debug!("Frame reverted {}: {}", reply, reply.message);
        Ok(reply)
    }
}
