// tessera/core/primitives/src/block.rs

use crate::types::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Header of the block being executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Hash,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub sealer: Address,
    pub version: u32,
}

impl BlockHeader {
    pub fn new(number: u64, parent_hash: Hash, timestamp: u64) -> Self {
        Self {
            number,
            parent_hash,
            timestamp,
            ..Default::default()
        }
    }

    /// Keccak-256 over the header fields in declaration order.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(96);
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(self.parent_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.gas_limit.to_be_bytes());
        buf.extend_from_slice(self.sealer.as_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        Hash::keccak(&buf)
    }
}

/// Parameters of a two-phase commit round with the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TwoPCParams {
    pub number: u64,
    pub primary_key: String,
    pub timestamp: u64,
}

impl TwoPCParams {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }
}

/// Transaction body resolved from a `TxHash` dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub sender: Address,
    /// `None` deploys a contract.
    pub to: Option<Address>,
    #[serde(default, with = "crate::serde_hex")]
    pub input: Vec<u8>,
    pub gas_limit: u64,
    #[serde(default)]
    pub nonce: u64,
}
