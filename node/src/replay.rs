// tessera/node/src/replay.rs

// Block files and their replay through the block scheduler
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_execution::BlockScheduler;
use tessera_primitives::{Address, BlockHeader, ExecutionMessage, Hash, Transaction};
use tracing::info;

/// Transaction as written in a block file. The hash is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub sender: Address,
    /// Omitted to deploy a contract.
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default, with = "tessera_primitives::serde_hex")]
    pub input: Vec<u8>,
    /// Zero takes the chain's transaction gas limit.
    #[serde(default)]
    pub gas_limit: u64,
    #[serde(default)]
    pub nonce: u64,
}

impl TxRecord {
    pub fn to_transaction(&self) -> Transaction {
        let mut preimage = Vec::with_capacity(Address::LEN + 8 + self.input.len());
        preimage.extend_from_slice(self.sender.as_bytes());
        preimage.extend_from_slice(&self.nonce.to_be_bytes());
        preimage.extend_from_slice(&self.input);
        Transaction {
            hash: Hash::keccak(&preimage),
            sender: self.sender,
            to: self.to,
            input: self.input.clone(),
            gas_limit: self.gas_limit,
            nonce: self.nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    /// Milliseconds since the epoch; defaults to the replay time.
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub transactions: Vec<TxRecord>,
}

/// One receipt as printed by `tessera replay`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptLine {
    pub block: u64,
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: i32,
    pub gas_left: u64,
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<Address>,
}

impl ReceiptLine {
    fn new(block: u64, index: usize, receipt: &ExecutionMessage) -> Self {
        Self {
            block,
            index,
            kind: receipt.message_type.as_str(),
            status: receipt.status.code(),
            gas_left: receipt.gas_available,
            output: format!("0x{}", hex::encode(&receipt.data)),
            message: receipt.message.clone(),
            contract: receipt.new_contract_address,
        }
    }
}

/// Reads a JSON array of blocks with strictly increasing numbers.
pub fn load_blocks(path: &Path) -> Result<Vec<BlockRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading block file {}", path.display()))?;
    let blocks: Vec<BlockRecord> = serde_json::from_str(&content)
        .with_context(|| format!("parsing block file {}", path.display()))?;
    for pair in blocks.windows(2) {
        if pair[1].number <= pair[0].number {
            bail!(
                "block {} follows block {}; numbers must increase",
                pair[1].number,
                pair[0].number
            );
        }
    }
    Ok(blocks)
}

/// Executes and commits `blocks` in order, chaining header hashes from
/// `parent`.
pub async fn replay(
    scheduler: &BlockScheduler,
    blocks: &[BlockRecord],
    parent: Hash,
) -> Result<Vec<ReceiptLine>> {
    let mut parent_hash = parent;
    let mut lines = Vec::new();
    for block in blocks {
        let timestamp = block
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as u64);
        let header = BlockHeader::new(block.number, parent_hash, timestamp);
        let hash = header.hash();
        let transactions: Vec<Transaction> =
            block.transactions.iter().map(TxRecord::to_transaction).collect();

        let started = std::time::Instant::now();
        let receipts = scheduler
            .execute_block(header, &transactions)
            .await
            .with_context(|| format!("executing block {}", block.number))?;
        let stats = scheduler.last_stats();
        info!(
            "Block {} committed: {} txs, {} rounds, {} retries in {:?}",
            block.number,
            receipts.len(),
            stats.rounds,
            stats.retries,
            started.elapsed()
        );

        lines.extend(
            receipts
                .iter()
                .enumerate()
                .map(|(index, receipt)| ReceiptLine::new(block.number, index, receipt)),
        );
        parent_hash = hash;
    }
    Ok(lines)
}
