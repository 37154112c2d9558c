// tessera/core/storage/src/db/rocks_storage.rs

use super::column_families::{CF_META, CF_ROWS};
use super::RocksDB;
use crate::entry::{Entry, TableInfo, SYS_TABLES};
use crate::error::{Result, StorageError};
use crate::interface::StorageInterface;
use crate::overlay::Overlay;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_primitives::TwoPCParams;
use tracing::{debug, info, warn};

const STAGED_KEY: &[u8] = b"staged";
const KEY_SEPARATOR: u8 = 0;

#[derive(Serialize, Deserialize)]
struct Staged {
    number: u64,
    changes: Overlay,
}

/// Durable backend on RocksDB.
///
/// `prepare` persists the staged change set under `meta/staged` so it survives
/// a restart between the two phases; `commit` applies it with one write batch
/// that also clears the staging record.
pub struct RocksStorage {
    db: RocksDB,
    staged: Mutex<Option<Staged>>,
}

fn row_key(table: &str, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(table.len() + key.len() + 1);
    out.extend_from_slice(table.as_bytes());
    out.push(KEY_SEPARATOR);
    out.extend_from_slice(key.as_bytes());
    out
}

fn table_prefix(table: &str) -> Vec<u8> {
    let mut out = table.as_bytes().to_vec();
    out.push(KEY_SEPARATOR);
    out
}

impl RocksStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = RocksDB::open(path)?;
        let staged = match db.get_cf(CF_META, STAGED_KEY)? {
            Some(bytes) => {
                let staged: Staged = bincode::deserialize(&bytes)?;
                warn!("Recovered staged block {} from a previous run", staged.number);
                Some(staged)
            }
            None => None,
        };
        Ok(Self {
            db,
            staged: Mutex::new(staged),
        })
    }

    pub fn prepared_block(&self) -> Option<u64> {
        self.staged.lock().as_ref().map(|s| s.number)
    }

    fn read_row(&self, table: &str, key: &str) -> Result<Option<Entry>> {
        match self.db.get_cf(CF_ROWS, &row_key(table, key))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(table == SYS_TABLES || self.read_row(SYS_TABLES, table)?.is_some())
    }
}

#[async_trait]
impl StorageInterface for RocksStorage {
    async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>> {
        self.read_row(table, key)
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let prefix = table_prefix(table);
        self.db
            .scan_prefix_cf(CF_ROWS, &prefix)?
            .into_iter()
            .map(|(key, _)| {
                String::from_utf8(key[prefix.len()..].to_vec())
                    .map_err(|e| StorageError::Codec(e.to_string()))
            })
            .collect()
    }

    async fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<()> {
        if !self.table_exists(table)? {
            return Err(StorageError::TableNotFound(table.to_string()));
        }
        if entry.is_deleted() {
            self.db.delete_cf(CF_ROWS, &row_key(table, key))
        } else {
            self.db
                .put_cf(CF_ROWS, &row_key(table, key), &bincode::serialize(&entry)?)
        }
    }

    async fn create_table(
        &self,
        name: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> Result<TableInfo> {
        if self.table_exists(name)? {
            return Err(StorageError::TableExists(name.to_string()));
        }
        let info = TableInfo::new(name, key_column, value_columns);
        self.db.put_cf(
            CF_ROWS,
            &row_key(SYS_TABLES, name),
            &bincode::serialize(&info.to_entry())?,
        )?;
        debug!("Created table {}", name);
        Ok(info)
    }

    async fn open_table(&self, name: &str) -> Result<Option<TableInfo>> {
        match self.read_row(SYS_TABLES, name)? {
            Some(entry) => Ok(Some(TableInfo::from_entry(name, &entry)?)),
            None => Ok(None),
        }
    }

    async fn prepare(&self, params: &TwoPCParams, changes: Overlay) -> Result<()> {
        let mut staged = self.staged.lock();
        if let Some(existing) = staged.as_ref() {
            if existing.number != params.number {
                return Err(StorageError::AlreadyPrepared(existing.number));
            }
        }
        let record = Staged {
            number: params.number,
            changes,
        };
        self.db
            .put_cf(CF_META, STAGED_KEY, &bincode::serialize(&record)?)?;
        debug!(
            "Prepared block {} with {} rows",
            params.number,
            record.changes.len()
        );
        *staged = Some(record);
        Ok(())
    }

    async fn commit(&self, params: &TwoPCParams) -> Result<()> {
        let mut staged = self.staged.lock();
        let number = match staged.as_ref() {
            Some(s) => s.number,
            None => return Err(StorageError::NotPrepared),
        };
        if number != params.number {
            return Err(StorageError::BlockMismatch {
                prepared: number,
                requested: params.number,
            });
        }
        let mut batch = self.db.batch();
        if let Some(record) = staged.as_ref() {
            for (table, key, entry) in record.changes.iter() {
                let k = row_key(table, key);
                if entry.is_deleted() {
                    self.db.batch_delete_cf(&mut batch, CF_ROWS, &k)?;
                } else {
                    self.db
                        .batch_put_cf(&mut batch, CF_ROWS, &k, &bincode::serialize(entry)?)?;
                }
            }
        }
        self.db.batch_delete_cf(&mut batch, CF_META, STAGED_KEY)?;
        self.db.write_batch(batch)?;
        *staged = None;
        info!("Committed block {} to RocksDB", params.number);
        Ok(())
    }

    async fn rollback(&self, params: &TwoPCParams) -> Result<()> {
        let mut staged = self.staged.lock();
        if staged.as_ref().map(|s| s.number) == Some(params.number) {
            self.db.delete_cf(CF_META, STAGED_KEY)?;
            *staged = None;
            debug!("Rolled back block {}", params.number);
        }
        Ok(())
    }
}
