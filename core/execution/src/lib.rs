// tessera/core/execution/src/lib.rs

// Transaction execution: executives, precompiled tables and the block lifecycle
pub mod abi;
pub mod config;
pub mod crypto;
pub mod executive;
pub mod executor;
pub mod key_lock;
pub mod ledger;
pub mod metrics;
pub mod parallel;
pub mod precompiles;
pub mod types;
pub mod vm;

pub use config::ExecutorConfig;
pub use crypto::{CryptoSuite, Keccak256Secp256k1};
pub use executive::{Continuation, ExecutiveEnv, TransactionExecutive};
pub use executor::{BlockContext, TransactionExecutor, TransactionSource};
pub use key_lock::{lock_key, range_lock_key, KeyLockManager, KeyLockOutcome};
pub use ledger::{Ledger, LedgerCache, MemoryLedger};
pub use parallel::{BlockScheduler, ScheduleStats};
pub use precompiles::{
    addresses, codes, init_system_tables, Precompiled, PrecompiledContext, PrecompiledRegistry,
    TableKind,
};
pub use types::{ExecutorError, ExecutorState, Result, Settlement};
pub use vm::{Interpreter, NoopInterpreter, VmCall, VmHost, VmOutcome, VmStatus, VmSubCall};

// Re-export the primitives callers build messages from
pub use tessera_primitives::{
    Address, BlockHeader, ExecutionMessage, Hash, MessageType, Transaction, TransactionStatus,
    TwoPCParams,
};
