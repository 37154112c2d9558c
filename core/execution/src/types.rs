// tessera/core/execution/src/types.rs

// Error and lifecycle types shared across the executor
use crate::abi::AbiDecodeError;
use crate::crypto::CryptoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_primitives::{Hash, MessageType, TransactionStatus};
use tessera_storage::StorageError;
use thiserror::Error;

/// Lifecycle state of a [`TransactionExecutor`](crate::executor::TransactionExecutor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Idle,
    BlockOpen,
    Executing,
    Prepared,
    Committed,
    RolledBack,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::BlockOpen => "block_open",
            ExecutorState::Executing => "executing",
            ExecutorState::Prepared => "prepared",
            ExecutorState::Committed => "committed",
            ExecutorState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// When the writes of a finished context reach the block overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// As soon as the context's root frame ends.
    Immediate,
    /// Held back, with the context's key locks, until
    /// [`settle_context`](crate::executor::TransactionExecutor::settle_context)
    /// or [`discard_context`](crate::executor::TransactionExecutor::discard_context).
    Deferred,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Malformed precompiled input; reverts the frame with `PrecompiledError`.
    #[error("precompiled error: {0}")]
    Precompiled(String),

    #[error("out of gas: need {needed}, have {available}")]
    OutOfGas { needed: u64, available: u64 },

    /// Explicit revert raised by contract code.
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// The key is held by another context; the caller's whole context aborts.
    #[error("key {key} is locked by context {holder}")]
    KeyLockConflict { key: String, holder: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid executor state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: ExecutorState,
    },

    #[error("block number mismatch: executing {expected}, got {found}")]
    BlockNumberMismatch { expected: u64, found: u64 },

    #[error("no suspended frame at context {context_id} seq {seq}")]
    FrameNotFound { context_id: i64, seq: i64 },

    #[error("transaction {0} not found")]
    TransactionNotFound(Hash),

    #[error("unexpected {message_type} message for context {context_id} seq {seq}")]
    UnexpectedMessage {
        message_type: MessageType,
        context_id: i64,
        seq: i64,
    },

    #[error("{0} contexts still have suspended frames or unsettled writes")]
    InFlightContexts(usize),

    #[error("context {0} has no finished writes awaiting settlement")]
    ContextNotFinished(i64),

    #[error("context {0} could not be scheduled")]
    SchedulingStalled(i64),

    #[error("execution task failed: {0}")]
    TaskFailed(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Abi(#[from] AbiDecodeError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ExecutorError {
    /// Receipt status for errors that end only the current frame. `None`
    /// means the error escapes the frame: a fatal fault or a lock conflict.
    pub fn revert_status(&self) -> Option<TransactionStatus> {
        match self {
            ExecutorError::Precompiled(_) | ExecutorError::Abi(_) => {
                Some(TransactionStatus::PrecompiledError)
            }
            ExecutorError::OutOfGas { .. } => Some(TransactionStatus::OutOfGas),
            ExecutorError::Reverted(_) => Some(TransactionStatus::RevertInstruction),
            _ => None,
        }
    }

    pub fn is_key_lock_conflict(&self) -> bool {
        matches!(self, ExecutorError::KeyLockConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_errors_map_to_statuses() {
        assert_eq!(
            ExecutorError::Precompiled("bad".into()).revert_status(),
            Some(TransactionStatus::PrecompiledError)
        );
        assert_eq!(
            ExecutorError::Abi(AbiDecodeError("short")).revert_status(),
            Some(TransactionStatus::PrecompiledError)
        );
        assert_eq!(
            ExecutorError::OutOfGas {
                needed: 10,
                available: 1
            }
            .revert_status(),
            Some(TransactionStatus::OutOfGas)
        );
        assert_eq!(
            ExecutorError::Storage(StorageError::NotPrepared).revert_status(),
            None
        );
        let conflict = ExecutorError::KeyLockConflict {
            key: "t".into(),
            holder: 1,
        };
        assert!(conflict.revert_status().is_none());
        assert!(conflict.is_key_lock_conflict());
    }

    #[test]
    fn test_state_display() {
        let err = ExecutorError::InvalidState {
            expected: "prepared",
            found: ExecutorState::BlockOpen,
        };
        assert_eq!(
            err.to_string(),
            "invalid executor state: expected prepared, found block_open"
        );
    }
}
