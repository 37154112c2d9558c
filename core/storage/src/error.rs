// tessera/core/storage/src/error.rs

use thiserror::Error;

/// Errors surfaced by storage backends and overlays. Every variant maps to a
/// numeric code so callers can report it the same way a remote backend would.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("table {0} not found")]
    TableNotFound(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("block {0} is already prepared")]
    AlreadyPrepared(u64),

    #[error("no block is prepared")]
    NotPrepared,

    #[error("prepared block {prepared} does not match requested block {requested}")]
    BlockMismatch { prepared: u64, requested: u64 },

    #[error("checkpoint {0} is not live")]
    InvalidCheckpoint(usize),

    #[error("corrupt schema row for table {0}")]
    CorruptSchema(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("backend error {code}: {message}")]
    Backend { code: i32, message: String },
}

impl StorageError {
    pub fn code(&self) -> i32 {
        match self {
            StorageError::TableNotFound(_) => -1001,
            StorageError::TableExists(_) => -1002,
            StorageError::AlreadyPrepared(_) => -1003,
            StorageError::NotPrepared => -1004,
            StorageError::BlockMismatch { .. } => -1005,
            StorageError::InvalidCheckpoint(_) => -1006,
            StorageError::CorruptSchema(_) => -1007,
            StorageError::Codec(_) => -1008,
            StorageError::Backend { code, .. } => *code,
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Codec(e.to_string())
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend {
            code: -2000,
            message: e.into_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
