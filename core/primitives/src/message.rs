// tessera/core/primitives/src/message.rs

// Call/return envelope exchanged between the executor and its orchestrator
use crate::types::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an [`ExecutionMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Initial dispatch of a transaction by hash; the executor fills the body.
    TxHash,
    /// Outbound call to another address.
    Message,
    /// Terminal success of a frame.
    Finished,
    /// Terminal revert of a frame.
    Revert,
    /// The context hit a key held by another context and was aborted.
    KeyLock,
    /// Reply routed back without execution.
    SendBack,
    /// Abort notification for a context whose lock wait was cancelled.
    RevertKeyLock,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TxHash => "txhash",
            MessageType::Message => "message",
            MessageType::Finished => "finished",
            MessageType::Revert => "revert",
            MessageType::KeyLock => "key_lock",
            MessageType::SendBack => "send_back",
            MessageType::RevertKeyLock => "revert_key_lock",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt status codes. `None` (0) is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum TransactionStatus {
    #[default]
    None = 0,
    Unknown = 1,
    OutOfGasLimit = 2,
    OutOfGas = 12,
    PrecompiledError = 15,
    RevertInstruction = 16,
    ContractAddressAlreadyUsed = 17,
    CallAddressError = 19,
    CallDepthExceeded = 20,
}

impl TransactionStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransactionStatus::None)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// One frame's call or return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub context_id: i64,
    pub seq: i64,
    pub tx_hash: Hash,
    pub from: Address,
    pub to: Address,
    pub origin: Address,
    #[serde(with = "crate::serde_hex")]
    pub data: Vec<u8>,
    pub gas_available: u64,
    pub message_type: MessageType,
    pub status: TransactionStatus,
    pub create: bool,
    pub static_call: bool,
    pub depth: u32,
    /// Keys held by this context when the message was produced, sorted.
    pub key_locks: Vec<String>,
    /// Key that forced a `KeyLock` abort.
    pub key_lock_acquired: Option<String>,
    pub new_contract_address: Option<Address>,
    /// Diagnostic text, empty on success.
    pub message: String,
}

impl ExecutionMessage {
    /// A fresh top-level call for `context_id` with seq 0.
    pub fn new_call(context_id: i64, from: Address, to: Address, data: Vec<u8>, gas: u64) -> Self {
        Self {
            context_id,
            seq: 0,
            tx_hash: Hash::default(),
            from,
            to,
            origin: from,
            data,
            gas_available: gas,
            message_type: MessageType::Message,
            status: TransactionStatus::None,
            create: false,
            static_call: false,
            depth: 0,
            key_locks: Vec::new(),
            key_lock_acquired: None,
            new_contract_address: None,
            message: String::new(),
        }
    }

    /// Dispatch by transaction hash; the executor looks up the body.
    pub fn new_tx_hash(context_id: i64, tx_hash: Hash) -> Self {
        Self {
            tx_hash,
            message_type: MessageType::TxHash,
            ..Self::new_call(context_id, Address::zero(), Address::zero(), Vec::new(), 0)
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::Finished | MessageType::Revert
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::KeyLock | MessageType::RevertKeyLock
        )
    }

    /// Builds the reply to this call: same context and seq, endpoints swapped.
    pub fn reply(&self, message_type: MessageType, status: TransactionStatus, data: Vec<u8>) -> Self {
        Self {
            from: self.to,
            to: self.from,
            message_type,
            status,
            data,
            key_locks: Vec::new(),
            key_lock_acquired: None,
            new_contract_address: None,
            message: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ExecutionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] ctx={} seq={} {} -> {} depth={} gas={} status={}",
            self.message_type,
            self.context_id,
            self.seq,
            self.from,
            self.to,
            self.depth,
            self.gas_available,
            self.status
        )
    }
}
