// tessera/core/storage/src/lib.rs

pub mod db;
pub mod entry;
pub mod error;
pub mod interface;
pub mod memory;
pub mod overlay;
pub mod wrapper;

pub use db::{RocksDB, RocksStorage};
pub use entry::{Entry, EntryStatus, TableInfo, SYS_TABLES};
pub use error::{Result, StorageError};
pub use interface::StorageInterface;
pub use memory::MemoryStorage;
pub use overlay::Overlay;
pub use wrapper::{CheckpointId, StorageWrapper};
