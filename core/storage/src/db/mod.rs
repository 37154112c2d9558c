// tessera/core/storage/src/db/mod.rs

// Database module
pub mod column_families;
pub mod rocks_db;
pub mod rocks_storage;

pub use rocks_db::RocksDB;
pub use rocks_storage::RocksStorage;
