// tessera/core/primitives/src/lib.rs

pub mod block;
pub mod message;
pub mod serde_hex;
pub mod types;

pub use block::{BlockHeader, Transaction, TwoPCParams};
pub use message::{ExecutionMessage, MessageType, TransactionStatus};
pub use types::{Address, Hash, PrimitivesError};
