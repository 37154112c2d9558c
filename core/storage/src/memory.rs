// tessera/core/storage/src/memory.rs

// In-memory backend with two-phase commit, used by tests and tooling
use crate::entry::{Entry, TableInfo, SYS_TABLES};
use crate::error::{Result, StorageError};
use crate::interface::StorageInterface;
use crate::overlay::Overlay;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use tessera_primitives::TwoPCParams;
use tracing::debug;

type Tables = BTreeMap<String, BTreeMap<String, Entry>>;

struct Staged {
    number: u64,
    changes: Overlay,
}

pub struct MemoryStorage {
    tables: RwLock<Tables>,
    staged: Mutex<Option<Staged>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let mut tables = Tables::new();
        tables.insert(SYS_TABLES.to_string(), BTreeMap::new());
        Self {
            tables: RwLock::new(tables),
            staged: Mutex::new(None),
        }
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn prepared_block(&self) -> Option<u64> {
        self.staged.lock().as_ref().map(|s| s.number)
    }

    fn apply(tables: &mut Tables, changes: Overlay) {
        for (table, key, entry) in changes.iter() {
            let rows = tables.entry(table.to_string()).or_default();
            if entry.is_deleted() {
                rows.remove(key);
            } else {
                rows.insert(key.to_string(), entry.clone());
            }
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageInterface for MemoryStorage {
    async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<()> {
        let mut tables = self.tables.write();
        let exists = table == SYS_TABLES
            || tables
                .get(SYS_TABLES)
                .map(|schemas| schemas.contains_key(table))
                .unwrap_or(false);
        if !exists {
            return Err(StorageError::TableNotFound(table.to_string()));
        }
        let rows = tables.entry(table.to_string()).or_default();
        if entry.is_deleted() {
            rows.remove(key);
        } else {
            rows.insert(key.to_string(), entry);
        }
        Ok(())
    }

    async fn create_table(
        &self,
        name: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> Result<TableInfo> {
        let mut tables = self.tables.write();
        let schemas = tables.entry(SYS_TABLES.to_string()).or_default();
        if schemas.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        let info = TableInfo::new(name, key_column, value_columns);
        schemas.insert(name.to_string(), info.to_entry());
        tables.entry(name.to_string()).or_default();
        debug!("Created table {}", name);
        Ok(info)
    }

    async fn open_table(&self, name: &str) -> Result<Option<TableInfo>> {
        let tables = self.tables.read();
        match tables.get(SYS_TABLES).and_then(|schemas| schemas.get(name)) {
            Some(entry) => Ok(Some(TableInfo::from_entry(name, entry)?)),
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
        debug!("Prepared block {} with {} rows", params.number, changes.len());
        *staged = Some(Staged {
            number: params.number,
            changes,
        });
        Ok(())
    }

    async fn commit(&self, params: &TwoPCParams) -> Result<()> {
        let mut staged = self.staged.lock();
        let prepared = match staged.take() {
            Some(s) => s,
            None => return Err(StorageError::NotPrepared),
        };
        if prepared.number != params.number {
            let number = prepared.number;
            *staged = Some(prepared);
            return Err(StorageError::BlockMismatch {
                prepared: number,
                requested: params.number,
            });
        }
        Self::apply(&mut self.tables.write(), prepared.changes);
        debug!("Committed block {}", params.number);
        Ok(())
    }

    async fn rollback(&self, params: &TwoPCParams) -> Result<()> {
        let mut staged = self.staged.lock();
        if staged.as_ref().map(|s| s.number) == Some(params.number) {
            *staged = None;
            debug!("Rolled back block {}", params.number);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: &str) -> Entry {
        Entry::new(vec![v.to_string()])
    }

    #[tokio::test]
    async fn test_prepare_is_invisible_until_commit() {
        let storage = MemoryStorage::new();
        storage.create_table("t", "k", vec!["v".into()]).await.unwrap();

        let mut changes = Overlay::new();
        changes.put("t", "a", row("1"));
        let params = TwoPCParams::new(1);
        storage.prepare(&params, changes).await.unwrap();
        assert!(storage.get_row("t", "a").await.unwrap().is_none());

        storage.commit(&params).await.unwrap();
        assert_eq!(storage.get_row("t", "a").await.unwrap(), Some(row("1")));
        assert!(storage.prepared_block().is_none());
    }

    #[tokio::test]
    async fn test_commit_requires_matching_prepare() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage.commit(&TwoPCParams::new(1)).await,
            Err(StorageError::NotPrepared)
        );

        storage.prepare(&TwoPCParams::new(2), Overlay::new()).await.unwrap();
        assert!(matches!(
            storage.commit(&TwoPCParams::new(3)).await,
            Err(StorageError::BlockMismatch { prepared: 2, requested: 3 })
        ));
        assert!(matches!(
            storage.prepare(&TwoPCParams::new(3), Overlay::new()).await,
            Err(StorageError::AlreadyPrepared(2))
        ));
        // Staged set survives the mismatch
        storage.commit(&TwoPCParams::new(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_drops_staged_changes() {
        let storage = MemoryStorage::new();
        storage.create_table("t", "k", vec![]).await.unwrap();
        let mut changes = Overlay::new();
        changes.put("t", "a", row("1"));
        storage.prepare(&TwoPCParams::new(1), changes).await.unwrap();
        storage.rollback(&TwoPCParams::new(1)).await.unwrap();
        assert!(storage.commit(&TwoPCParams::new(1)).await.is_err());
        assert_eq!(storage.row_count("t"), 0);
    }

    #[tokio::test]
    async fn test_tombstones_delete_on_commit() {
        let storage = MemoryStorage::new();
        storage.create_table("t", "k", vec![]).await.unwrap();
        storage.set_row("t", "a", row("1")).await.unwrap();

        let mut changes = Overlay::new();
        changes.put("t", "a", Entry::deleted());
        storage.prepare(&TwoPCParams::new(1), changes).await.unwrap();
        storage.commit(&TwoPCParams::new(1)).await.unwrap();
        assert!(storage.get_primary_keys("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_row_requires_table() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.set_row("missing", "a", row("1")).await,
            Err(StorageError::TableNotFound(_))
        ));
        assert!(matches!(
            {
                storage.create_table("t", "k", vec![]).await.unwrap();
                storage.create_table("t", "k", vec![]).await
            },
            Err(StorageError::TableExists(_))
        ));
    }
}
