// tessera/core/execution/src/vm/mod.rs

//! Seam between the executive and a bytecode interpreter.
//!
//! The interpreter runs a frame to completion against a [`VmHost`] and lists
//! the sub-calls it wants to make. The executive turns those into outbound
//! messages one at a time once the interpreter has returned.

use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_primitives::{Address, Hash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmCall {
    pub code: Vec<u8>,
    pub input: Vec<u8>,
    pub gas: u64,
    pub sender: Address,
    pub recipient: Address,
    pub origin: Address,
    pub depth: u32,
    pub create: bool,
    pub static_call: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    Success,
    Revert,
    OutOfGas,
}

/// A call the interpreter wants issued after it returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSubCall {
    pub to: Address,
    pub data: Vec<u8>,
    /// Upper bound; the callee gets at most what the frame has left.
    pub gas: u64,
    /// A revert of this call reverts the caller too.
    #[serde(default = "default_require_success")]
    pub require_success: bool,
}

fn default_require_success() -> bool {
    true
}

impl VmSubCall {
    pub fn new(to: Address, data: Vec<u8>, gas: u64) -> Self {
        Self {
            to,
            data,
            gas,
            require_success: true,
        }
    }

    /// The caller keeps going when this call reverts.
    pub fn allow_revert(mut self) -> Self {
        self.require_success = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOutcome {
    pub status: VmStatus,
    pub output: Vec<u8>,
    pub gas_used: u64,
    pub sub_calls: Vec<VmSubCall>,
}

impl VmOutcome {
    pub fn success(output: Vec<u8>, gas_used: u64) -> Self {
        Self {
            status: VmStatus::Success,
            output,
            gas_used,
            sub_calls: Vec::new(),
        }
    }

    pub fn revert(output: Vec<u8>, gas_used: u64) -> Self {
        Self {
            status: VmStatus::Revert,
            output,
            gas_used,
            sub_calls: Vec::new(),
        }
    }
}

/// State access offered to interpreted code
#[async_trait]
pub trait VmHost: Send {
    /// Storage slot of the executing account.
    async fn storage_get(&mut self, key: &str) -> Result<Option<String>>;

    async fn storage_set(&mut self, key: &str, value: &str) -> Result<()>;

    async fn block_hash(&mut self, number: u64) -> Result<Hash>;

    fn block_number(&self) -> u64;
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn execute(&self, call: VmCall, host: &mut dyn VmHost) -> Result<VmOutcome>;
}

/// Returns its input unchanged and charges nothing.
///
/// For a deployment the input is the init code, so the deployed code is the
/// init code itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterpreter;

#[async_trait]
impl Interpreter for NoopInterpreter {
    async fn execute(&self, call: VmCall, _host: &mut dyn VmHost) -> Result<VmOutcome> {
        let output = if call.create { call.code } else { call.input };
        Ok(VmOutcome::success(output, 0))
    }
}
