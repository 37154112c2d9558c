// tessera/core/execution/src/parallel/scheduler.rs

// Round-based block scheduler over the message-routing executor
use crate::executor::TransactionExecutor;
use crate::types::{ExecutorError, ExecutorState, Result, Settlement};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_primitives::{BlockHeader, ExecutionMessage, MessageType, Transaction, TwoPCParams};
use tokio::task;
use tracing::{debug, info, warn};

/// Counters from the last executed block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub rounds: usize,
    pub retries: usize,
    pub serial: usize,
}

/// Runs every transaction of a block as its own context.
///
/// Each round first runs the lowest pending context alone, then the rest as
/// concurrent tasks. Finished contexts keep their writes and key locks until
/// they are settled into the block in transaction order. Settling stops at
/// the first context that was aborted on a key lock or read a row rewritten
/// ahead of it; everything from there on is discarded and retried in the
/// next round. After the round limit the leftovers run one at a time. The
/// committed block matches running the transactions serially in order.
pub struct BlockScheduler {
    executor: Arc<TransactionExecutor>,
    max_rounds: usize,
    last_stats: parking_lot::Mutex<ScheduleStats>,
}

impl BlockScheduler {
    pub fn new(executor: Arc<TransactionExecutor>) -> Self {
        let max_rounds = executor.config().max_scheduler_rounds.max(1);
        Self {
            executor,
            max_rounds,
            last_stats: parking_lot::Mutex::new(ScheduleStats::default()),
        }
    }

    pub fn executor(&self) -> &Arc<TransactionExecutor> {
        &self.executor
    }

    pub fn last_stats(&self) -> ScheduleStats {
        *self.last_stats.lock()
    }

    /// Executes and commits one block. Receipts come back in transaction
    /// order. Any failure rolls the block back.
    pub async fn execute_block(
        &self,
        header: BlockHeader,
        transactions: &[Transaction],
    ) -> Result<Vec<ExecutionMessage>> {
        let params = TwoPCParams {
            timestamp: header.timestamp,
            ..TwoPCParams::new(header.number)
        };
        self.executor.next_block_header(header).await?;

        let outcome = async {
            self.executor.set_settlement(Settlement::Deferred)?;
            let receipts = self.run(transactions).await?;
            self.executor.prepare(&params).await?;
            self.executor.commit(&params).await?;
            Ok::<_, ExecutorError>(receipts)
        }
        .await;

        if let Err(e) = &outcome {
            warn!("Block {} failed: {}", params.number, e);
            if matches!(
                self.executor.state(),
                ExecutorState::BlockOpen | ExecutorState::Executing | ExecutorState::Prepared
            ) {
                if let Err(rollback) = self.executor.rollback(&params).await {
                    warn!("Rollback of block {} failed: {}", params.number, rollback);
                }
            }
        }
        outcome
    }

    async fn run(&self, transactions: &[Transaction]) -> Result<Vec<ExecutionMessage>> {
        let mut roots = Vec::with_capacity(transactions.len());
        for (index, tx) in transactions.iter().enumerate() {
            roots.push(self.executor.transaction_message(index as i64, tx).await?);
        }

        let mut receipts: Vec<Option<ExecutionMessage>> = vec![None; roots.len()];
        let mut pending: Vec<usize> = (0..roots.len()).collect();
        let mut stats = ScheduleStats::default();

        while !pending.is_empty() && stats.rounds < self.max_rounds {
            stats.rounds += 1;
            let head = pending.remove(0);
            receipts[head] = Some(self.run_alone(&roots[head]).await?);
            if pending.is_empty() {
                break;
            }

            let handles: Vec<_> = pending
                .iter()
                .map(|&index| {
                    let executor = self.executor.clone();
                    let root = roots[index].clone();
                    task::spawn(drive(executor, root))
                })
                .collect();
            let mut results = Vec::with_capacity(handles.len());
            for joined in join_all(handles).await {
                results.push(joined.map_err(|e| ExecutorError::TaskFailed(e.to_string()))?);
            }

            let mut deferred = Vec::new();
            let mut written = BTreeSet::new();
            let mut blocked = false;
            for (&index, result) in pending.iter().zip(results) {
                let context_id = index as i64;
                match result? {
                    Some(receipt) if !blocked => {
                        if self.executor.settle_context(context_id, &mut written)? {
                            receipts[index] = Some(receipt);
                        } else {
                            self.executor.discard_context(context_id)?;
                            blocked = true;
                            deferred.push(index);
                        }
                    }
                    Some(_) => {
                        self.executor.discard_context(context_id)?;
                        deferred.push(index);
                    }
                    None => {
                        blocked = true;
                        deferred.push(index);
                    }
                }
            }
            debug!(
                "Round {}: {} settled, {} deferred",
                stats.rounds,
                1 + pending.len() - deferred.len(),
                deferred.len()
            );
            stats.retries += deferred.len();
            pending = deferred;
        }

        if !pending.is_empty() {
            info!("Running {} contexts one at a time", pending.len());
            for index in pending {
                stats.serial += 1;
                receipts[index] = Some(self.run_alone(&roots[index]).await?);
            }
        }

        *self.last_stats.lock() = stats;
        info!(
            "Executed {} transactions in {} rounds ({} retries)",
            receipts.len(),
            stats.rounds,
            stats.retries
        );
        receipts
            .into_iter()
            .enumerate()
            .map(|(index, receipt)| receipt.ok_or(ExecutorError::SchedulingStalled(index as i64)))
            .collect()
    }

    /// Runs one context while no other holds locks, and settles it.
    async fn run_alone(&self, root: &ExecutionMessage) -> Result<ExecutionMessage> {
        let context_id = root.context_id;
        let receipt = drive(self.executor.clone(), root.clone())
            .await?
            .ok_or(ExecutorError::SchedulingStalled(context_id))?;
        if !self
            .executor
            .settle_context(context_id, &mut BTreeSet::new())?
        {
            return Err(ExecutorError::SchedulingStalled(context_id));
        }
        Ok(receipt)
    }
}

/// Routes one context's messages until its root frame ends. `None` means
/// the context was aborted on a key lock.
async fn drive(
    executor: Arc<TransactionExecutor>,
    root: ExecutionMessage,
) -> Result<Option<ExecutionMessage>> {
    let context_id = root.context_id;
    let mut callers: Vec<i64> = Vec::new();
    let mut message = root;
    loop {
        let reply = executor.dmc_execute_transaction(message).await?;
        match reply.message_type {
            MessageType::Message => {
                callers.push(reply.seq);
                message = reply;
            }
            MessageType::Finished | MessageType::Revert => match callers.pop() {
                Some(seq) => {
                    message = ExecutionMessage { seq, ..reply };
                }
                None => return Ok(Some(reply)),
            },
            MessageType::KeyLock => {
                debug!(
                    "Context {} deferred on {:?}",
                    context_id, reply.key_lock_acquired
                );
                return Ok(None);
            }
            other => {
                return Err(ExecutorError::UnexpectedMessage {
                    message_type: other,
                    context_id,
                    seq: reply.seq,
                })
            }
        }
    }
}
